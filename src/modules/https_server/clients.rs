//! Default HTTP layer answering every request with a fixed response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode};
use tracing::{debug, trace, warn};

use super::http::{HttpClient, HttpConnectionHandler, SharedTlsSession, Socket};

/// End of a request head.
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Largest request head buffered before the client is dropped.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Client that answers each request head with `200 OK`.
///
/// The body names the server name negotiated over TLS, or `unknown` for
/// cleartext connections.
pub struct CannedResponseClient {
    socket: Arc<dyn Socket>,
    tls: Mutex<Option<SharedTlsSession>>,
    buffer: Mutex<BytesMut>,
    requests: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for CannedResponseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CannedResponseClient")
            .field("socket", &self.socket.id())
            .field("requests", &self.requests())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CannedResponseClient {
    /// Create a client for `socket`.
    #[must_use]
    pub fn new(socket: Arc<dyn Socket>) -> Self {
        Self {
            socket,
            tls: Mutex::new(None),
            buffer: Mutex::new(BytesMut::new()),
            requests: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of requests answered.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn respond(&self) {
        let session = self.tls_session();

        let host = session
            .as_ref()
            .and_then(|s| {
                s.lock()
                    .ok()
                    .and_then(|s| s.server_name().map(str::to_owned))
            })
            .unwrap_or_else(|| "unknown".to_string());

        let body = format!("Hello from {host}\n");
        let response = match Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
        {
            Ok(response) => encode_response(&response),
            Err(e) => {
                warn!(socket = self.socket.id(), error = %e, "Failed to build response");
                self.close();
                return;
            },
        };

        let sent = match session {
            Some(session) => match session.lock() {
                Ok(mut session) => session
                    .encrypt(&response)
                    .inspect_err(|e| {
                        warn!(socket = self.socket.id(), error = %e, "Failed to encrypt response");
                    })
                    .is_ok(),
                Err(_) => false,
            },
            None => self.socket.send(&response),
        };

        if sent {
            self.requests.fetch_add(1, Ordering::Relaxed);
            trace!(socket = self.socket.id(), host = %host, "Sent response");
        } else {
            self.close();
        }
    }
}

/// Serialize an HTTP/1.1 response.
fn encode_response(response: &Response<String>) -> BytesMut {
    let status = response.status();
    let mut out = BytesMut::with_capacity(128 + response.body().len());

    out.put_slice(b"HTTP/1.1 ");
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.put_slice(b"\r\n");
    for (name, value) in response.headers() {
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
    out.put_slice(b"\r\n");
    out.put_slice(response.body().as_bytes());
    out
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
}

impl HttpClient for CannedResponseClient {
    fn attach_tls(&self, session: SharedTlsSession) {
        *self.tls.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    fn tls_session(&self) -> Option<SharedTlsSession> {
        self.tls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn process_data(&self, data: Bytes) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let mut complete = 0;
        let overflow = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.extend_from_slice(&data);
            while let Some(end) = find_terminator(&buffer) {
                let _head = buffer.split_to(end + HEAD_TERMINATOR.len());
                complete += 1;
            }
            buffer.len() > MAX_HEAD_SIZE
        };

        for _ in 0..complete {
            self.respond();
        }

        if overflow {
            warn!(socket = self.socket.id(), "Request head too large");
            self.close();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(session) = self.tls_session() {
            if let Ok(mut session) = session.lock() {
                session.close();
            }
        }

        self.socket.close();
        debug!(socket = self.socket.id(), requests = self.requests(), "Client closed");
    }
}

/// Table of [`CannedResponseClient`]s keyed by socket id.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: RwLock<HashMap<u64, Arc<CannedResponseClient>>>,
}

impl ClientTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no client is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every connected client.
    pub fn close_all(&self) {
        let clients: Vec<_> = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, client)| client)
            .collect();

        for client in clients {
            client.close();
        }
    }
}

impl HttpConnectionHandler for ClientTable {
    fn process_connect(&self, socket: Arc<dyn Socket>) -> Option<Arc<dyn HttpClient>> {
        let id = socket.id();
        let client = Arc::new(CannedResponseClient::new(socket));
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&client));
        Some(client)
    }

    fn find_client(&self, socket_id: u64) -> Option<Arc<dyn HttpClient>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&socket_id)
            .map(|client| Arc::clone(client) as Arc<dyn HttpClient>)
    }

    fn process_disconnect(&self, socket_id: u64) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&socket_id);
    }
}
