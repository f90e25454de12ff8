//! # Server Modules
//!
//! - [`https_server`] - TLS termination with SNI-based certificate selection

pub mod https_server;
