//! TLS engine capability.
//!
//! The HTTPS server never touches record-layer cryptography itself. It drives
//! an engine through these traits: build a server context from a certificate
//! pair, open an accept-mode session that reports the client's server name to
//! an [`SniCallback`], then stream ciphertext through [`TlsSession::decrypt`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::certificate::CertificatePair;
use super::error::TlsResult;
use super::policy::CipherPolicy;

/// Counter for generating handshake handles.
static NEXT_HANDSHAKE_ID: AtomicU64 = AtomicU64::new(1);

/// Protocol versions a server context negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMethod {
    /// TLS 1.2 and TLS 1.3.
    #[default]
    Tls,
    /// TLS 1.3 only.
    Tls13,
}

/// Opaque identifier of one in-progress handshake, used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandshakeHandle(u64);

impl HandshakeHandle {
    /// Allocate a fresh handle.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDSHAKE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the handle.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandshakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handshake#{}", self.0)
    }
}

/// Sink for ciphertext produced by a session.
///
/// Returns `true` iff every byte was accepted.
pub type CiphertextSink = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// A handshake waiting for its context.
pub trait PendingHandshake<C> {
    /// Handle of the handshake.
    fn handle(&self) -> HandshakeHandle;

    /// Bind the handshake to `context`, replacing the bootstrap context.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine refuses the context.
    fn bind_context(&mut self, context: &C) -> TlsResult<()>;
}

/// Handshake-time callback invoked once the client's server name is known.
///
/// Implementations run on the engine's handshake path: no I/O, no blocking.
pub trait SniCallback<C>: Send + Sync {
    /// Select and bind a context for `server_name`.
    ///
    /// # Errors
    ///
    /// Any error aborts the handshake.
    fn on_server_name(
        &self,
        server_name: &str,
        handshake: &mut dyn PendingHandshake<C>,
    ) -> TlsResult<()>;
}

/// Per-connection TLS state: handshake plus record layer.
pub trait TlsSession: Send {
    /// Handle identifying this session's handshake.
    fn handle(&self) -> HandshakeHandle;

    /// Feed received ciphertext.
    ///
    /// Returns `Ok(Some(_))` with decrypted application data, `Ok(None)` when
    /// more bytes are needed to complete a record (or the bytes only advanced
    /// the handshake).
    ///
    /// # Errors
    ///
    /// Returns an error on malformed records, handshake failure, integrity
    /// failure or when the peer closed the session.
    fn decrypt(&mut self, ciphertext: &[u8]) -> TlsResult<Option<Bytes>>;

    /// Encrypt application data and push the records to the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not usable or the sink refused data.
    fn encrypt(&mut self, plaintext: &[u8]) -> TlsResult<()>;

    /// Send close_notify.
    fn close(&mut self);

    /// Whether the handshake is still in progress.
    fn is_handshaking(&self) -> bool;

    /// Server name the handshake was bound for.
    fn server_name(&self) -> Option<&str>;
}

/// A TLS engine able to build server contexts and open sessions on them.
pub trait TlsEngine: Send + Sync + 'static {
    /// Pre-built, reusable server configuration.
    type Context: Clone + Send + Sync + 'static;

    /// Per-connection session type.
    type Session: TlsSession + 'static;

    /// Build a server context.
    ///
    /// # Errors
    ///
    /// Returns an error if the key material or cipher policy is rejected.
    fn create_server_context(
        &self,
        method: TlsMethod,
        pair: &CertificatePair,
        policy: CipherPolicy,
    ) -> TlsResult<Self::Context>;

    /// Open a session in server, accept-new-handshake mode.
    ///
    /// `bootstrap` seeds the session until `resolver` binds the real context.
    fn accept(
        &self,
        bootstrap: &Self::Context,
        resolver: Arc<dyn SniCallback<Self::Context>>,
        sink: CiphertextSink,
    ) -> Self::Session;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_handles_are_unique() {
        let a = HandshakeHandle::next();
        let b = HandshakeHandle::next();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_handshake_handle_display() {
        let handle = HandshakeHandle(7);
        assert_eq!(handle.to_string(), "handshake#7");
    }
}
