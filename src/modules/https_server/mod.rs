//! HTTPS Server Module
//!
//! This module terminates TLS for an HTTP server that serves several
//! certificates from one listening port.
//! It supports:
//! - A concurrently readable certificate registry with pre-built TLS contexts
//! - Certificate selection from the client's SNI during the handshake
//! - Per-packet decryption feeding an HTTP connection handler
//! - Named cipher policies (modern, intermediate, backward, fast)
//! - Certificate hot-reload

mod certificate;
mod clients;
mod config;
mod connection;
mod engine;
mod error;
mod http;
mod policy;
mod registry;
mod rustls_engine;
mod server;
mod sni;
mod transport;

#[cfg(test)]
mod testing;

pub use certificate::{hostname_matches, Certificate, CertificateBundle, CertificatePair};
pub use clients::{CannedResponseClient, ClientTable};
pub use config::{CertificateConfig, ConnectionSettings, HttpsServerConfig, ListenerConfig};
pub use connection::{serve_connection, AtomicConnectionStats, ConnectionStats, TcpSocket};
pub use engine::{
    CiphertextSink, HandshakeHandle, PendingHandshake, SniCallback, TlsEngine, TlsMethod,
    TlsSession,
};
pub use error::{TlsError, TlsResult};
pub use http::{HttpClient, HttpConnectionHandler, SharedTlsSession, Socket};
pub use policy::{
    CipherPolicy, BACKWARD_COMPATIBILITY, FAST_NOT_VERY_SECURE, INTERMEDIATE_COMPATIBILITY,
    MODERN_COMPATIBILITY,
};
pub use registry::{CertificateRegistry, RegisteredCertificate};
pub use rustls_engine::{resolve_cipher_suites, RustlsEngine, RustlsSession};
pub use server::HttpsServer;
pub use sni::SniResolver;
pub use transport::{ConnectionTransport, PlainTransport, ReceiveOutcome, TlsTransport};
