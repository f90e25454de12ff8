//! # Configuration System
//!
//! TOML-based configuration for the HTTPS server binary: parsing, defaults
//! and validation.
//!
//! ## Example Configuration
//!
//! ```toml
//! [server]
//! name = "r0n-https"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [https]
//! cipher_policy = "intermediate"
//!
//! [[https.listeners]]
//! port = 443
//!
//! [[https.certificates]]
//! name = "example"
//! cert_path = "/etc/certs/example.pem"
//! key_path = "/etc/certs/example.key"
//! hostnames = ["example.com", "*.example.com"]
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{AppConfig, LogFormat, LogLevel, LoggingConfig, ServerSection};
pub use validation::{
    BasicValidator, CertificateValidator, PortConflictValidator, ValidationError,
    ValidationResult, ValidationSeverity, Validator,
};
