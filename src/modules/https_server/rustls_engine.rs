//! rustls-backed TLS engine.
//!
//! Sessions start on a [`rustls::server::Acceptor`], which buffers bytes until
//! the whole ClientHello is available. The server name is then handed to the
//! [`SniCallback`], and the handshake continues on whichever
//! [`ServerConfig`] the callback bound.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use tokio_rustls::rustls::crypto::aws_lc_rs::{self, cipher_suite};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::server::{Accepted, AcceptedAlert, Acceptor};
use tokio_rustls::rustls::{
    version, AlertDescription, ContentType, ServerConfig, ServerConnection, SupportedCipherSuite,
    SupportedProtocolVersion,
};
use tracing::{debug, trace, warn};

use super::certificate::CertificatePair;
use super::engine::{
    CiphertextSink, HandshakeHandle, PendingHandshake, SniCallback, TlsEngine, TlsMethod,
    TlsSession,
};
use super::error::{TlsError, TlsResult};
use super::policy::CipherPolicy;

/// ALPN protocols advertised by every context.
const ALPN_HTTP1: &[u8] = b"http/1.1";

/// TLS 1.3 suites, always enabled regardless of the policy.
fn tls13_suites() -> [SupportedCipherSuite; 3] {
    [
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
    ]
}

/// Map an OpenSSL cipher name to the rustls suites implementing it.
///
/// Plain-RSA AES128 suites have no rustls implementation and map to the
/// ECDHE AES128-GCM pair instead, so policies built on them keep TLS 1.2.
fn tls12_suites(openssl_name: &str) -> Vec<SupportedCipherSuite> {
    match openssl_name {
        "ECDHE-ECDSA-AES256-GCM-SHA384" => {
            vec![cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384]
        },
        "ECDHE-RSA-AES256-GCM-SHA384" => vec![cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384],
        "ECDHE-ECDSA-AES128-GCM-SHA256" => {
            vec![cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256]
        },
        "ECDHE-RSA-AES128-GCM-SHA256" => vec![cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256],
        "ECDHE-ECDSA-CHACHA20-POLY1305" => {
            vec![cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256]
        },
        "ECDHE-RSA-CHACHA20-POLY1305" => {
            vec![cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256]
        },
        "AES128-SHA" | "AES128-SHA256" | "AES128-GCM-SHA256" => vec![
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ],
        _ => Vec::new(),
    }
}

/// A plaintext fatal alert record, for handshakes aborted before any
/// context was bound.
fn fatal_alert(description: AlertDescription) -> [u8; 7] {
    [
        u8::from(ContentType::Alert),
        // TLS 1.2 legacy record version, as used by TLS 1.3 too
        0x03,
        0x03,
        0x00,
        0x02,
        // fatal
        0x02,
        u8::from(description),
    ]
}

/// Resolve the suites a context offers for `policy`.
///
/// Names rustls does not implement (CBC, DHE, 3DES, group aliases) are
/// skipped, the way OpenSSL skips unknown entries of a cipher list.
#[must_use]
pub fn resolve_cipher_suites(policy: CipherPolicy, method: TlsMethod) -> Vec<SupportedCipherSuite> {
    let mut suites: Vec<SupportedCipherSuite> = tls13_suites().to_vec();

    if method == TlsMethod::Tls {
        for suite in policy.ciphers().flat_map(tls12_suites) {
            if !suites.iter().any(|s| s.suite() == suite.suite()) {
                suites.push(suite);
            }
        }
    }

    suites
}

fn protocol_versions(suites: &[SupportedCipherSuite]) -> Vec<&'static SupportedProtocolVersion> {
    if suites.iter().any(|s| s.tls13().is_none()) {
        vec![&version::TLS13, &version::TLS12]
    } else {
        vec![&version::TLS13]
    }
}

/// TLS engine built on rustls with the aws-lc-rs provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustlsEngine;

impl RustlsEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TlsEngine for RustlsEngine {
    type Context = Arc<ServerConfig>;
    type Session = RustlsSession;

    fn create_server_context(
        &self,
        method: TlsMethod,
        pair: &CertificatePair,
        policy: CipherPolicy,
    ) -> TlsResult<Self::Context> {
        let suites = resolve_cipher_suites(policy, method);
        let versions = protocol_versions(&suites);

        let provider = CryptoProvider {
            cipher_suites: suites,
            ..aws_lc_rs::default_provider()
        };

        let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&versions)
            .map_err(|e| TlsError::ContextCreationFailure {
                message: e.to_string(),
            })?
            .with_no_client_auth()
            .with_single_cert(pair.chain().to_vec(), pair.private_key().clone_key())
            .map_err(|e| TlsError::ContextCreationFailure {
                message: e.to_string(),
            })?;

        config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];

        debug!(
            policy = %policy,
            method = ?method,
            suites = config.crypto_provider().cipher_suites.len(),
            "Created TLS server context"
        );

        Ok(Arc::new(config))
    }

    fn accept(
        &self,
        _bootstrap: &Self::Context,
        resolver: Arc<dyn SniCallback<Self::Context>>,
        sink: CiphertextSink,
    ) -> Self::Session {
        // rustls only commits to a configuration once the ClientHello has been
        // read, so the bootstrap context never reaches the wire.
        RustlsSession::new(resolver, sink)
    }
}

/// Handshake waiting for [`Accepted::into_connection`].
struct RustlsHandshake {
    handle: HandshakeHandle,
    accepted: Option<Accepted>,
    connection: Option<ServerConnection>,
    alert: Option<AcceptedAlert>,
}

impl PendingHandshake<Arc<ServerConfig>> for RustlsHandshake {
    fn handle(&self) -> HandshakeHandle {
        self.handle
    }

    fn bind_context(&mut self, context: &Arc<ServerConfig>) -> TlsResult<()> {
        let accepted = self.accepted.take().ok_or_else(|| {
            TlsError::InvariantViolation(format!("{} is already bound", self.handle))
        })?;

        match accepted.into_connection(Arc::clone(context)) {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            },
            Err((err, alert)) => {
                self.alert = Some(alert);
                Err(TlsError::HandshakeError {
                    message: err.to_string(),
                })
            },
        }
    }
}

enum SessionState {
    /// Waiting for a complete ClientHello.
    Accepting(Box<Acceptor>),
    /// Bound to a context.
    Established(Box<ServerConnection>),
    /// Failed or closed.
    Closed,
}

/// Per-connection rustls session.
pub struct RustlsSession {
    handle: HandshakeHandle,
    state: SessionState,
    resolver: Arc<dyn SniCallback<Arc<ServerConfig>>>,
    sink: CiphertextSink,
    server_name: Option<String>,
}

impl fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SessionState::Accepting(_) => "accepting",
            SessionState::Established(_) => "established",
            SessionState::Closed => "closed",
        };
        f.debug_struct("RustlsSession")
            .field("handle", &self.handle)
            .field("state", &state)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl RustlsSession {
    fn new(resolver: Arc<dyn SniCallback<Arc<ServerConfig>>>, sink: CiphertextSink) -> Self {
        Self {
            handle: HandshakeHandle::next(),
            state: SessionState::Accepting(Box::default()),
            resolver,
            sink,
            server_name: None,
        }
    }

    /// Feed bytes to the acceptor until the ClientHello is complete and bound.
    ///
    /// Returns `Ok(false)` while more bytes are needed.
    fn advance_handshake(&mut self, input: &mut &[u8]) -> TlsResult<bool> {
        let accepted = loop {
            let SessionState::Accepting(acceptor) = &mut self.state else {
                return Ok(true);
            };

            if input.is_empty() {
                return Ok(false);
            }

            if let Err(e) = acceptor.read_tls(input) {
                self.state = SessionState::Closed;
                return Err(TlsError::DecryptFailure {
                    message: e.to_string(),
                });
            }

            match acceptor.accept() {
                Ok(Some(accepted)) => break accepted,
                Ok(None) => continue,
                Err((err, mut alert)) => {
                    self.state = SessionState::Closed;
                    self.send_alert(&mut alert);
                    return Err(TlsError::DecryptFailure {
                        message: err.to_string(),
                    });
                },
            }
        };

        let server_name = accepted.client_hello().server_name().map(str::to_owned);
        trace!(handshake = %self.handle, sni = ?server_name, "ClientHello received");

        let mut pending = RustlsHandshake {
            handle: self.handle,
            accepted: Some(accepted),
            connection: None,
            alert: None,
        };

        let result = match server_name.as_deref() {
            Some(name) => self.resolver.on_server_name(name, &mut pending),
            None => {
                warn!(handshake = %self.handle, "Client did not send a server name");
                Err(TlsError::MissingServerName)
            },
        };

        if let Err(e) = result {
            self.state = SessionState::Closed;
            match pending.alert.take() {
                Some(mut alert) => self.send_alert(&mut alert),
                None => {
                    let description = match &e {
                        TlsError::HostnameNotMatched { .. } => AlertDescription::UnrecognisedName,
                        _ => AlertDescription::HandshakeFailure,
                    };
                    let _ = (self.sink)(&fatal_alert(description));
                },
            }
            return Err(e);
        }

        let Some(connection) = pending.connection.take() else {
            self.state = SessionState::Closed;
            return Err(TlsError::InvariantViolation(format!(
                "{} was not bound to a context",
                self.handle
            )));
        };

        self.server_name = server_name;
        self.state = SessionState::Established(Box::new(connection));
        Ok(true)
    }

    fn send_alert(&mut self, alert: &mut AcceptedAlert) {
        let mut buf = Vec::new();
        if alert.write_all(&mut buf).is_ok() && !buf.is_empty() {
            let _ = (self.sink)(&buf);
        }
    }
}

/// Push every pending TLS record to the sink.
fn flush(connection: &mut ServerConnection, sink: &mut CiphertextSink) -> TlsResult<()> {
    while connection.wants_write() {
        let mut buf = Vec::new();
        connection.write_tls(&mut buf)?;
        if buf.is_empty() {
            break;
        }
        if !sink(&buf) {
            return Err(TlsError::WriteFailure { length: buf.len() });
        }
    }
    Ok(())
}

/// Run received bytes through the record layer and collect plaintext.
fn pump(
    connection: &mut ServerConnection,
    sink: &mut CiphertextSink,
    input: &mut &[u8],
) -> TlsResult<Option<Bytes>> {
    let mut plaintext = Vec::new();

    loop {
        if !input.is_empty() {
            connection
                .read_tls(input)
                .map_err(|e| TlsError::DecryptFailure {
                    message: e.to_string(),
                })?;
        }

        let io_state = match connection.process_new_packets() {
            Ok(state) => state,
            Err(e) => {
                // rustls queued an alert describing the failure.
                let _ = flush(connection, sink);
                return Err(TlsError::DecryptFailure {
                    message: e.to_string(),
                });
            },
        };

        let available = io_state.plaintext_bytes_to_read();
        if available > 0 {
            let start = plaintext.len();
            plaintext.resize(start + available, 0);
            connection
                .reader()
                .read_exact(&mut plaintext[start..])
                .map_err(|e| TlsError::DecryptFailure {
                    message: e.to_string(),
                })?;
        }

        flush(connection, sink)?;

        if io_state.peer_has_closed() {
            if plaintext.is_empty() {
                return Err(TlsError::PeerClosed);
            }
            break;
        }

        if input.is_empty() {
            break;
        }
    }

    Ok((!plaintext.is_empty()).then(|| Bytes::from(plaintext)))
}

impl TlsSession for RustlsSession {
    fn handle(&self) -> HandshakeHandle {
        self.handle
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> TlsResult<Option<Bytes>> {
        let mut input = ciphertext;

        if !self.advance_handshake(&mut input)? {
            return Ok(None);
        }

        let result = match &mut self.state {
            SessionState::Established(connection) => pump(connection, &mut self.sink, &mut input),
            SessionState::Accepting(_) => Ok(None),
            SessionState::Closed => Err(TlsError::DecryptFailure {
                message: "session is closed".to_string(),
            }),
        };

        if matches!(
            result,
            Err(TlsError::DecryptFailure { .. } | TlsError::WriteFailure { .. })
        ) {
            self.state = SessionState::Closed;
        }

        result
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> TlsResult<()> {
        match &mut self.state {
            SessionState::Established(connection) => {
                connection.writer().write_all(plaintext)?;
                flush(connection, &mut self.sink)
            },
            SessionState::Accepting(_) => Err(TlsError::HandshakeError {
                message: "handshake has not completed".to_string(),
            }),
            SessionState::Closed => Err(TlsError::HandshakeError {
                message: "session is closed".to_string(),
            }),
        }
    }

    fn close(&mut self) {
        if let SessionState::Established(connection) = &mut self.state {
            connection.send_close_notify();
            let _ = flush(connection, &mut self.sink);
        }
        self.state = SessionState::Closed;
    }

    fn is_handshaking(&self) -> bool {
        match &self.state {
            SessionState::Accepting(_) => true,
            SessionState::Established(connection) => connection.is_handshaking(),
            SessionState::Closed => false,
        }
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}
