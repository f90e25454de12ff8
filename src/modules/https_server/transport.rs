//! Per-connection transports feeding the HTTP layer.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use super::certificate::Certificate;
use super::connection::AtomicConnectionStats;
use super::engine::{CiphertextSink, SniCallback, TlsEngine, TlsSession};
use super::error::{TlsError, TlsResult};
use super::http::{HttpConnectionHandler, SharedTlsSession, Socket};
use super::registry::CertificateRegistry;
use super::sni::SniResolver;

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// This many plaintext bytes were handed to the client.
    Forwarded(usize),
    /// The bytes were consumed but produced no application data yet.
    NeedMoreData,
    /// The connection was closed.
    Closed,
    /// No client is bound to the socket.
    UnknownClient,
}

/// Socket event handling shared by cleartext and TLS listeners.
pub trait ConnectionTransport: Send + Sync {
    /// A socket was accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be set up.
    fn on_connected(&self, socket: Arc<dyn Socket>) -> TlsResult<()>;

    /// Bytes arrived on a socket.
    fn on_data_received(
        &self,
        socket: &Arc<dyn Socket>,
        address: SocketAddr,
        data: &[u8],
    ) -> ReceiveOutcome;

    /// The socket is gone.
    fn on_disconnected(&self, socket: &dyn Socket);
}

/// Cleartext HTTP transport.
pub struct PlainTransport {
    handler: Arc<dyn HttpConnectionHandler>,
}

impl std::fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTransport").finish_non_exhaustive()
    }
}

impl PlainTransport {
    /// Create a transport delivering to `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn HttpConnectionHandler>) -> Self {
        Self { handler }
    }
}

impl ConnectionTransport for PlainTransport {
    fn on_connected(&self, socket: Arc<dyn Socket>) -> TlsResult<()> {
        self.handler.process_connect(socket);
        Ok(())
    }

    fn on_data_received(
        &self,
        socket: &Arc<dyn Socket>,
        _address: SocketAddr,
        data: &[u8],
    ) -> ReceiveOutcome {
        let Some(client) = self.handler.find_client(socket.id()) else {
            return ReceiveOutcome::UnknownClient;
        };
        client.process_data(Bytes::copy_from_slice(data));
        ReceiveOutcome::Forwarded(data.len())
    }

    fn on_disconnected(&self, socket: &dyn Socket) {
        self.handler.process_disconnect(socket.id());
    }
}

/// TLS transport: selects certificates by SNI and decrypts every packet
/// before it reaches the HTTP layer.
pub struct TlsTransport<E: TlsEngine> {
    registry: Arc<CertificateRegistry<E>>,
    resolver: Arc<SniResolver<E>>,
    handler: Arc<dyn HttpConnectionHandler>,
    stats: Arc<AtomicConnectionStats>,
}

impl<E: TlsEngine> std::fmt::Debug for TlsTransport<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<E: TlsEngine> TlsTransport<E> {
    /// Create a TLS transport.
    #[must_use]
    pub fn new(
        registry: Arc<CertificateRegistry<E>>,
        handler: Arc<dyn HttpConnectionHandler>,
        stats: Arc<AtomicConnectionStats>,
    ) -> Self {
        let resolver = Arc::new(SniResolver::new(Arc::clone(&registry)));
        Self {
            registry,
            resolver,
            handler,
            stats,
        }
    }

    /// The certificate registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CertificateRegistry<E>> {
        &self.registry
    }

    /// Register a certificate.
    ///
    /// # Errors
    ///
    /// See [`CertificateRegistry::append_certificate`].
    pub fn append_certificate(&self, certificate: Arc<dyn Certificate>) -> TlsResult<()> {
        self.registry.append_certificate(certificate)
    }

    /// Register certificates in order.
    ///
    /// # Errors
    ///
    /// See [`CertificateRegistry::append_certificate_list`].
    pub fn append_certificate_list<I>(&self, certificates: I) -> TlsResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Certificate>>,
    {
        self.registry.append_certificate_list(certificates)
    }

    fn record_failure(&self, err: &TlsError, was_handshaking: bool) {
        match err {
            TlsError::HostnameNotMatched { .. } | TlsError::MissingServerName => {
                self.stats.record_sni_miss();
            },
            TlsError::DecryptFailure { .. } => self.stats.record_decrypt_failure(),
            _ => {},
        }
        if was_handshaking {
            self.stats.record_handshake_failure();
        }
    }
}

impl<E: TlsEngine> ConnectionTransport for TlsTransport<E> {
    fn on_connected(&self, socket: Arc<dyn Socket>) -> TlsResult<()> {
        let Some(bootstrap) = self.registry.first() else {
            error!(socket = socket.id(), "There is no certificate registered");
            return Err(TlsError::NoCertificateAvailable);
        };

        let Some(client) = self.handler.process_connect(Arc::clone(&socket)) else {
            debug!(socket = socket.id(), "HTTP layer refused the connection");
            return Ok(());
        };

        let sink_socket = Arc::clone(&socket);
        let sink: CiphertextSink = Box::new(move |data: &[u8]| sink_socket.send(data));

        let resolver: Arc<dyn SniCallback<E::Context>> = self.resolver.clone();
        let session = self
            .registry
            .engine()
            .accept(bootstrap.tls_context(), resolver, sink);

        trace!(
            socket = socket.id(),
            handshake = %session.handle(),
            "TLS session created"
        );

        let session: SharedTlsSession = Arc::new(Mutex::new(session));
        client.attach_tls(session);
        Ok(())
    }

    fn on_data_received(
        &self,
        socket: &Arc<dyn Socket>,
        address: SocketAddr,
        data: &[u8],
    ) -> ReceiveOutcome {
        let Some(client) = self.handler.find_client(socket.id()) else {
            debug!(socket = socket.id(), peer = %address, "No client for socket");
            return ReceiveOutcome::UnknownClient;
        };

        let Some(session) = client.tls_session() else {
            error!(socket = socket.id(), peer = %address, "Client has no TLS session");
            debug_assert!(false, "Client has no TLS session");
            client.close();
            return ReceiveOutcome::Closed;
        };

        let (result, was_handshaking, completed) = match session.lock() {
            Ok(mut session) => {
                let was_handshaking = session.is_handshaking();
                let result = session.decrypt(data);
                let completed = was_handshaking && result.is_ok() && !session.is_handshaking();
                (result, was_handshaking, completed)
            },
            Err(_) => (
                Err(TlsError::Internal("TLS session lock poisoned".to_string())),
                false,
                false,
            ),
        };

        if completed {
            self.stats.record_handshake_success();
        }

        match result {
            Ok(Some(plaintext)) => {
                let len = plaintext.len();
                self.stats.record_bytes_decrypted(len as u64);
                client.process_data(plaintext);
                ReceiveOutcome::Forwarded(len)
            },
            Ok(None) => ReceiveOutcome::NeedMoreData,
            Err(TlsError::PeerClosed) => {
                debug!(socket = socket.id(), peer = %address, "Peer closed TLS session");
                client.close();
                ReceiveOutcome::Closed
            },
            Err(e) => {
                if e.is_connection_scoped() {
                    warn!(
                        socket = socket.id(),
                        peer = %address,
                        error = %e,
                        "Could not decrypt data"
                    );
                } else {
                    error!(
                        socket = socket.id(),
                        peer = %address,
                        error = %e,
                        "TLS engine failure"
                    );
                    self.stats.record_internal_error();
                }
                self.record_failure(&e, was_handshaking);
                client.close();
                ReceiveOutcome::Closed
            },
        }
    }

    fn on_disconnected(&self, socket: &dyn Socket) {
        self.handler.process_disconnect(socket.id());
    }
}
