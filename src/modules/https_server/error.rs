//! HTTPS server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur while terminating TLS for the HTTPS server.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate handed to the registry was malformed.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// The TLS engine rejected the key material or cipher policy.
    #[error("failed to create TLS context: {message}")]
    ContextCreationFailure {
        /// Message from the TLS engine.
        message: String,
    },

    /// No certificate has been registered yet.
    #[error("there is no certificate registered")]
    NoCertificateAvailable,

    /// SNI lookup found no matching certificate.
    #[error("no certificate found for SNI '{sni}'")]
    HostnameNotMatched {
        /// The requested SNI.
        sni: String,
    },

    /// The ClientHello carried no server name.
    #[error("client did not send a server name")]
    MissingServerName,

    /// Malformed, corrupt or unexpected TLS data.
    #[error("could not decrypt data: {message}")]
    DecryptFailure {
        /// Error message.
        message: String,
    },

    /// TLS handshake failed.
    #[error("TLS handshake failed: {message}")]
    HandshakeError {
        /// Error message.
        message: String,
    },

    /// The socket refused part of the ciphertext.
    #[error("socket did not accept {length} bytes of ciphertext")]
    WriteFailure {
        /// Number of bytes that were offered.
        length: usize,
    },

    /// The peer sent close_notify.
    #[error("connection closed by peer")]
    PeerClosed,

    /// Internal invariant broken by a caller.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Failed to load certificate.
    #[error("failed to load certificate from '{path}': {message}")]
    CertificateLoadError {
        /// The certificate path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Failed to load private key.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoadError {
        /// The private key path.
        path: String,
        /// Error message.
        message: String,
    },

    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    BindError {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TlsError {
    /// Returns `true` for errors that only affect a single connection.
    #[must_use]
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Self::NoCertificateAvailable
                | Self::HostnameNotMatched { .. }
                | Self::MissingServerName
                | Self::DecryptFailure { .. }
                | Self::HandshakeError { .. }
                | Self::WriteFailure { .. }
                | Self::PeerClosed
        )
    }
}

/// Result type alias for HTTPS server operations.
pub type TlsResult<T> = Result<T, TlsError>;
