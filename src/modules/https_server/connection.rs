//! TCP connection handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::http::Socket;
use super::transport::{ConnectionTransport, ReceiveOutcome};

/// Counter for generating connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum WriteCommand {
    Data(Bytes),
    Close,
}

/// A connected TCP socket with a background writer task.
///
/// `send` never blocks: bytes are queued to the writer task.
pub struct TcpSocket {
    id: u64,
    peer_addr: SocketAddr,
    created_at: Instant,
    tx: mpsc::UnboundedSender<WriteCommand>,
    closed: AtomicBool,
    stats: Arc<AtomicConnectionStats>,
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("id", &self.id)
            .field("peer", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TcpSocket {
    /// Split `stream`, spawn its writer task and return the socket with the
    /// read half.
    #[must_use]
    pub fn spawn(
        stream: TcpStream,
        peer_addr: SocketAddr,
        stats: Arc<AtomicConnectionStats>,
    ) -> (Arc<Self>, OwnedReadHalf) {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(write_loop(id, writer, rx));

        let socket = Arc::new(Self {
            id,
            peer_addr,
            created_at: Instant::now(),
            tx,
            closed: AtomicBool::new(false),
            stats,
        });

        (socket, reader)
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the connection age.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl Socket for TcpSocket {
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
        let sent = self
            .tx
            .send(WriteCommand::Data(Bytes::copy_from_slice(data)))
            .is_ok();
        if sent {
            self.stats.record_bytes_written(data.len() as u64);
        }
        sent
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(WriteCommand::Close);
        }
    }
}

async fn write_loop(
    id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Data(data) => {
                if let Err(e) = writer.write_all(&data).await {
                    debug!(conn_id = id, error = %e, "Write failed");
                    return;
                }
            },
            WriteCommand::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    trace!(conn_id = id, "Writer finished");
}

/// Read from `stream` and drive `transport` until either side closes.
pub async fn serve_connection(
    transport: Arc<dyn ConnectionTransport>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    read_buffer_size: usize,
    stats: Arc<AtomicConnectionStats>,
) {
    let (socket, mut reader) = TcpSocket::spawn(stream, peer_addr, Arc::clone(&stats));
    let dyn_socket: Arc<dyn Socket> = socket.clone();

    debug!(conn_id = socket.id(), peer = %peer_addr, "Connection accepted");

    if let Err(e) = transport.on_connected(Arc::clone(&dyn_socket)) {
        warn!(conn_id = socket.id(), peer = %peer_addr, error = %e, "Connection setup failed");
        socket.close();
        return;
    }

    let mut buf = vec![0u8; read_buffer_size.max(1)];
    loop {
        if socket.is_closed() {
            break;
        }

        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(conn_id = socket.id(), error = %e, "Read failed");
                break;
            },
        };

        stats.record_bytes_read(n as u64);

        match transport.on_data_received(&dyn_socket, peer_addr, &buf[..n]) {
            ReceiveOutcome::Forwarded(_) | ReceiveOutcome::NeedMoreData => {},
            ReceiveOutcome::Closed | ReceiveOutcome::UnknownClient => break,
        }
    }

    transport.on_disconnected(dyn_socket.as_ref());
    socket.close();

    debug!(
        conn_id = socket.id(),
        age_ms = socket.age().as_millis() as u64,
        "Connection finished"
    );
}

/// Connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total connections accepted.
    pub total_connections: u64,

    /// Active connections.
    pub active_connections: u64,

    /// Connections refused at the connection limit.
    pub rejected_connections: u64,

    /// Successful handshakes.
    pub successful_handshakes: u64,

    /// Failed handshakes.
    pub failed_handshakes: u64,

    /// Handshakes aborted because no certificate matched the server name.
    pub sni_misses: u64,

    /// Connections closed on a record-layer failure.
    pub decrypt_failures: u64,

    /// Connections closed on an engine or server fault rather than a peer error.
    pub internal_errors: u64,

    /// Plaintext bytes handed to the HTTP layer.
    pub bytes_decrypted: u64,

    /// Bytes read from sockets.
    pub bytes_read: u64,

    /// Bytes queued to sockets.
    pub bytes_written: u64,
}

/// Atomic connection statistics.
#[derive(Debug, Default)]
pub struct AtomicConnectionStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
    successful_handshakes: AtomicU64,
    failed_handshakes: AtomicU64,
    sni_misses: AtomicU64,
    decrypt_failures: AtomicU64,
    internal_errors: AtomicU64,
    bytes_decrypted: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl AtomicConnectionStats {
    /// Create new atomic stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection.
    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record connection closed.
    pub fn record_connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection refused at the limit.
    pub fn record_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record successful handshake.
    pub fn record_handshake_success(&self) {
        self.successful_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record failed handshake.
    pub fn record_handshake_failure(&self) {
        self.failed_handshakes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unmatched or missing server name.
    pub fn record_sni_miss(&self) {
        self.sni_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record-layer failure.
    pub fn record_decrypt_failure(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure that was not caused by the peer.
    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record plaintext forwarded to the HTTP layer.
    pub fn record_bytes_decrypted(&self, bytes: u64) {
        self.bytes_decrypted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes read.
    pub fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get current statistics.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            successful_handshakes: self.successful_handshakes.load(Ordering::Relaxed),
            failed_handshakes: self.failed_handshakes.load(Ordering::Relaxed),
            sni_misses: self.sni_misses.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            bytes_decrypted: self.bytes_decrypted.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
