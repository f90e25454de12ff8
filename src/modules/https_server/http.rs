//! Seams towards the socket layer and the HTTP layer.
//!
//! The TLS core never parses HTTP. It hands plaintext to an [`HttpClient`]
//! found through an [`HttpConnectionHandler`], and writes ciphertext through
//! a [`Socket`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::engine::TlsSession;

/// A TLS session shared by the request and response sides of a client.
pub type SharedTlsSession = Arc<Mutex<dyn TlsSession>>;

/// A connected stream socket.
pub trait Socket: Send + Sync {
    /// Unique socket identifier.
    fn id(&self) -> u64;

    /// Remote address.
    fn peer_addr(&self) -> SocketAddr;

    /// Queue bytes for sending. Returns `true` iff every byte was accepted.
    fn send(&self, data: &[u8]) -> bool;

    /// Close the socket.
    fn close(&self);
}

/// Per-connection HTTP client.
pub trait HttpClient: Send + Sync {
    /// Attach the TLS session used for both directions.
    fn attach_tls(&self, session: SharedTlsSession);

    /// The attached TLS session, if any.
    fn tls_session(&self) -> Option<SharedTlsSession>;

    /// Feed decrypted (or cleartext) request bytes.
    fn process_data(&self, data: Bytes);

    /// Close the client and its socket.
    fn close(&self);
}

/// Owner of the per-connection HTTP clients.
pub trait HttpConnectionHandler: Send + Sync {
    /// Create a client for a newly connected socket.
    ///
    /// Returns `None` if the connection is refused.
    fn process_connect(&self, socket: Arc<dyn Socket>) -> Option<Arc<dyn HttpClient>>;

    /// Find the client bound to `socket_id`.
    fn find_client(&self, socket_id: u64) -> Option<Arc<dyn HttpClient>>;

    /// Drop the client bound to `socket_id`.
    fn process_disconnect(&self, socket_id: u64);
}
