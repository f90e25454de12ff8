//! # R0N HTTPS
//!
//! HTTPS termination for an HTTP server that serves many certificates from
//! a single listening port.
//!
//! ## Features
//!
//! - Certificate registry with pre-built TLS contexts and lock-free lookups
//! - Certificate selection from the TLS Server Name Indication
//! - Per-connection decrypt pipeline feeding an HTTP connection handler
//! - Named cipher policies
//! - Certificate hot-reload
//!
//! ## Architecture
//!
//! The server is driven through the [`module::ModuleContract`] lifecycle.
//! The TLS pieces live in [`modules::https_server`] behind the
//! [`modules::https_server::TlsEngine`] trait so the registry and the
//! decrypt pipeline can be exercised without a real TLS stack.

pub mod config;
pub mod module;
pub mod modules;
