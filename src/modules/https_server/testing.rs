//! Test doubles for the engine and socket seams.
//!
//! `ScriptedEngine` speaks a toy record protocol instead of TLS:
//! `HELLO <name>` runs the SNI callback, `DATA <bytes>` yields plaintext,
//! `CLOSE` is a peer close, `FAULT` is an engine-side failure and anything
//! else is a corrupt record. Records end with a NUL byte; bytes without one
//! are buffered as an incomplete record.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use super::certificate::{hostname_matches, Certificate, CertificatePair};
use super::engine::{
    CiphertextSink, HandshakeHandle, PendingHandshake, SniCallback, TlsEngine, TlsMethod,
    TlsSession,
};
use super::error::{TlsError, TlsResult};
use super::http::Socket;
use super::policy::CipherPolicy;

pub(crate) struct MockCertificate {
    name: String,
    hostnames: Vec<String>,
    pair: CertificatePair,
}

impl fmt::Display for MockCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Certificate for MockCertificate {
    fn certificate_pair(&self) -> &CertificatePair {
        &self.pair
    }

    fn matches_host(&self, name: &str) -> bool {
        self.hostnames.iter().any(|h| hostname_matches(h, name))
    }

    fn hostnames(&self) -> &[String] {
        &self.hostnames
    }
}

/// Certificate whose leaf bytes are its name, so contexts can be traced back.
pub(crate) fn mock_certificate(name: &str, hostnames: &[&str]) -> Arc<dyn Certificate> {
    mock_with_chain(name, hostnames, vec![CertificateDer::from(name.as_bytes().to_vec())])
}

/// Certificate with a key but no certificate at all.
pub(crate) fn mock_certificate_without_chain(
    name: &str,
    hostnames: &[&str],
) -> Arc<dyn Certificate> {
    mock_with_chain(name, hostnames, Vec::new())
}

fn mock_with_chain(
    name: &str,
    hostnames: &[&str],
    chain: Vec<CertificateDer<'static>>,
) -> Arc<dyn Certificate> {
    Arc::new(MockCertificate {
        name: name.to_string(),
        hostnames: hostnames.iter().map(|h| (*h).to_string()).collect(),
        pair: CertificatePair::new(
            chain,
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![1u8, 2, 3])),
        ),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockContext {
    pub label: String,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedEngine {
    /// Label of the bootstrap context of every accepted session.
    pub bootstraps: Mutex<Vec<String>>,
}

impl TlsEngine for ScriptedEngine {
    type Context = MockContext;
    type Session = ScriptedSession;

    fn create_server_context(
        &self,
        _method: TlsMethod,
        pair: &CertificatePair,
        _policy: CipherPolicy,
    ) -> TlsResult<MockContext> {
        let label = pair
            .chain()
            .first()
            .map(|der| String::from_utf8_lossy(der.as_ref()).into_owned())
            .unwrap_or_default();

        if label.starts_with("reject") {
            return Err(TlsError::ContextCreationFailure {
                message: format!("{label} refused"),
            });
        }

        Ok(MockContext { label })
    }

    fn accept(
        &self,
        bootstrap: &MockContext,
        resolver: Arc<dyn SniCallback<MockContext>>,
        sink: CiphertextSink,
    ) -> ScriptedSession {
        self.bootstraps.lock().unwrap().push(bootstrap.label.clone());
        ScriptedSession {
            handle: HandshakeHandle::next(),
            resolver,
            sink,
            buffer: Vec::new(),
            bound: None,
            server_name: None,
            closed: false,
        }
    }
}

pub(crate) struct ScriptedHandshake {
    pub handle: HandshakeHandle,
    pub bound: Option<MockContext>,
}

impl ScriptedHandshake {
    pub fn new() -> Self {
        Self {
            handle: HandshakeHandle::next(),
            bound: None,
        }
    }
}

impl PendingHandshake<MockContext> for ScriptedHandshake {
    fn handle(&self) -> HandshakeHandle {
        self.handle
    }

    fn bind_context(&mut self, context: &MockContext) -> TlsResult<()> {
        if context.label.starts_with("unbindable") {
            return Err(TlsError::HandshakeError {
                message: format!("{} cannot be bound", context.label),
            });
        }
        self.bound = Some(context.clone());
        Ok(())
    }
}

pub(crate) struct ScriptedSession {
    handle: HandshakeHandle,
    resolver: Arc<dyn SniCallback<MockContext>>,
    sink: CiphertextSink,
    buffer: Vec<u8>,
    bound: Option<MockContext>,
    server_name: Option<String>,
    closed: bool,
}

impl ScriptedSession {
    fn handle_record(&mut self, record: &[u8], out: &mut Vec<u8>) -> TlsResult<()> {
        if let Some(name) = record.strip_prefix(b"HELLO ") {
            let name = String::from_utf8_lossy(name).into_owned();
            let mut handshake = ScriptedHandshake {
                handle: self.handle,
                bound: None,
            };
            self.resolver.on_server_name(&name, &mut handshake)?;
            self.bound = handshake.bound;
            self.server_name = Some(name);
            (self.sink)(b"SERVER-HELLO\n");
            Ok(())
        } else if let Some(payload) = record.strip_prefix(b"DATA ") {
            if self.bound.is_none() {
                return Err(TlsError::DecryptFailure {
                    message: "application data before handshake".to_string(),
                });
            }
            out.extend_from_slice(payload);
            Ok(())
        } else if record == b"CLOSE" {
            Err(TlsError::PeerClosed)
        } else if record == b"FAULT" {
            Err(TlsError::Internal("scripted engine fault".to_string()))
        } else {
            Err(TlsError::DecryptFailure {
                message: "corrupt record".to_string(),
            })
        }
    }
}

impl TlsSession for ScriptedSession {
    fn handle(&self) -> HandshakeHandle {
        self.handle
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> TlsResult<Option<Bytes>> {
        if self.closed {
            return Err(TlsError::DecryptFailure {
                message: "session is closed".to_string(),
            });
        }

        self.buffer.extend_from_slice(ciphertext);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == 0) {
            let record: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_record(&record[..record.len() - 1], &mut out)?;
        }

        Ok((!out.is_empty()).then(|| Bytes::from(out)))
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> TlsResult<()> {
        if self.bound.is_none() || self.closed {
            return Err(TlsError::HandshakeError {
                message: "session not established".to_string(),
            });
        }
        let mut record = b"ENC ".to_vec();
        record.extend_from_slice(plaintext);
        if (self.sink)(&record) {
            Ok(())
        } else {
            Err(TlsError::WriteFailure {
                length: record.len(),
            })
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            (self.sink)(b"CLOSE-NOTIFY\n");
        }
    }

    fn is_handshaking(&self) -> bool {
        self.bound.is_none() && !self.closed
    }

    fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

static NEXT_MOCK_SOCKET_ID: AtomicU64 = AtomicU64::new(1_000_000);

/// Socket that records everything sent to it.
#[derive(Debug)]
pub(crate) struct RecordingSocket {
    id: u64,
    peer_addr: SocketAddr,
    sent: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl RecordingSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_MOCK_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 40000)),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.sent()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Socket for RecordingSocket {
    fn id(&self) -> u64 {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn send(&self, data: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent.lock().unwrap().extend_from_slice(data);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
