//! # Module Contract
//!
//! Lifecycle contract the HTTPS server is driven through: a manifest,
//! init/start/stop/reload, status and metrics.

mod config;
mod contract;
mod error;
mod manifest;
mod status;

pub use config::ModuleConfig;
pub use contract::{MetricsPayload, ModuleContract};
pub use error::{ModuleError, ModuleResult};
pub use manifest::{Capability, ModuleManifest, SemVer};
pub use status::ModuleStatus;
