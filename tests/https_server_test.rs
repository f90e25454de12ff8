//! Integration tests driving real TLS clients against the HTTPS server.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName,
};
use tokio_rustls::rustls::{
    version, AlertDescription, ClientConfig, ClientConnection, ProtocolVersion, RootCertStore,
    SupportedProtocolVersion,
};
use tokio_rustls::TlsConnector;

use r0n_https::module::{ModuleConfig, ModuleContract};
use r0n_https::modules::https_server::{
    AtomicConnectionStats, Certificate, CertificateBundle, CertificatePair, CertificateRegistry,
    ClientTable, ConnectionTransport, HttpsServer, ReceiveOutcome, RustlsEngine, Socket,
    TlsTransport,
};

const PEER: &str = "192.0.2.10:50000";
const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: example\r\n\r\n";

/// Test certificate authority issuing leaf certificates.
struct TestPki {
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
}

/// A leaf certificate and its key.
struct Issued {
    der: CertificateDer<'static>,
    cert_pem: String,
    key_pem: String,
    pair: CertificatePair,
}

impl TestPki {
    fn new() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = params.self_signed(&ca_key).unwrap();
        Self { ca_cert, ca_key }
    }

    fn issue(&self, hostnames: &[&str]) -> Issued {
        let key = KeyPair::generate().unwrap();
        let params =
            CertificateParams::new(hostnames.iter().map(|h| h.to_string()).collect::<Vec<_>>())
                .unwrap();
        let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).unwrap();
        let der = cert.der().clone();
        let pair = CertificatePair::new(
            vec![der.clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        );
        Issued {
            der,
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            pair,
        }
    }

    fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config_for(&[&version::TLS13, &version::TLS12])
    }

    fn client_config_for(
        &self,
        versions: &[&'static SupportedProtocolVersion],
    ) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert.der().clone()).unwrap();
        Arc::new(
            ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
                .with_protocol_versions(versions)
                .unwrap()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}

/// In-memory socket collecting what the server sends.
struct MemorySocket {
    id: u64,
    outbound: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl MemorySocket {
    fn new() -> Arc<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            outbound: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut *self.outbound.lock().unwrap())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Socket for MemorySocket {
    fn id(&self) -> u64 {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        PEER.parse().unwrap()
    }

    fn send(&self, data: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbound.lock().unwrap().extend_from_slice(data);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A TLS transport with two certificates: `example.com` and `*.example.org`.
struct Harness {
    pki: TestPki,
    com: CertificateDer<'static>,
    org: CertificateDer<'static>,
    stats: Arc<AtomicConnectionStats>,
    transport: TlsTransport<RustlsEngine>,
}

impl Harness {
    fn new() -> Self {
        let pki = TestPki::new();
        let com = pki.issue(&["example.com"]);
        let org = pki.issue(&["*.example.org"]);

        let registry = Arc::new(CertificateRegistry::new(Arc::new(RustlsEngine::new())));
        let stats = Arc::new(AtomicConnectionStats::new());
        let transport = TlsTransport::new(
            registry,
            Arc::new(ClientTable::new()),
            Arc::clone(&stats),
        );

        let certificates: Vec<Arc<dyn Certificate>> = vec![
            Arc::new(CertificateBundle::from_pair(
                "com",
                com.pair,
                vec!["example.com".to_string()],
            )),
            Arc::new(CertificateBundle::from_pair(
                "org",
                org.pair,
                vec!["*.example.org".to_string()],
            )),
        ];
        transport.append_certificate_list(certificates).unwrap();

        Self {
            pki,
            com: com.der,
            org: org.der,
            stats,
            transport,
        }
    }

    fn connect(&self, server_name: &str) -> Connection<'_> {
        self.connect_with(server_name, self.pki.client_config())
    }

    fn connect_with(&self, server_name: &str, config: Arc<ClientConfig>) -> Connection<'_> {
        let socket = MemorySocket::new();
        let dyn_socket: Arc<dyn Socket> = socket.clone();
        self.transport.on_connected(Arc::clone(&dyn_socket)).unwrap();

        let name = ServerName::try_from(server_name.to_string()).unwrap();
        let client = ClientConnection::new(config, name).unwrap();

        Connection {
            harness: self,
            socket,
            dyn_socket,
            client,
        }
    }
}

/// One client connection wired to the transport through a [`MemorySocket`].
struct Connection<'a> {
    harness: &'a Harness,
    socket: Arc<MemorySocket>,
    dyn_socket: Arc<dyn Socket>,
    client: ClientConnection,
}

impl Connection<'_> {
    fn client_bytes(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while self.client.wants_write() {
            self.client.write_tls(&mut out).unwrap();
        }
        out
    }

    fn deliver(&self, data: &[u8]) -> ReceiveOutcome {
        self.harness
            .transport
            .on_data_received(&self.dyn_socket, PEER.parse().unwrap(), data)
    }

    fn feed_client(&mut self) -> bool {
        let sent = self.socket.take_sent();
        let mut rd = &sent[..];
        while !rd.is_empty() {
            self.client.read_tls(&mut rd).unwrap();
            self.client.process_new_packets().unwrap();
        }
        !sent.is_empty()
    }

    /// Exchange records until both sides go quiet.
    fn pump(&mut self) -> Vec<ReceiveOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let outbound = self.client_bytes();
            if !outbound.is_empty() {
                outcomes.push(self.deliver(&outbound));
            }
            let inbound = self.feed_client();
            if outbound.is_empty() && !inbound {
                return outcomes;
            }
        }
    }

    fn handshake(&mut self) {
        let outcomes = self.pump();
        assert!(outcomes.iter().all(|o| *o == ReceiveOutcome::NeedMoreData));
        assert!(!self.client.is_handshaking());
    }

    fn read_response(&mut self) -> String {
        let mut buf = [0u8; 4096];
        let n = self.client.reader().read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }
}

#[test]
fn test_exact_hostname_selects_matching_certificate() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");

    conn.handshake();

    let peer = conn.client.peer_certificates().unwrap();
    assert_eq!(peer[0], harness.com);
    assert_eq!(harness.stats.snapshot().successful_handshakes, 1);
}

#[test]
fn test_wildcard_hostname_selects_wildcard_certificate() {
    let harness = Harness::new();
    let mut conn = harness.connect("api.example.org");

    conn.handshake();

    let peer = conn.client.peer_certificates().unwrap();
    assert_eq!(peer[0], harness.org);
}

#[test]
fn test_unknown_hostname_aborts_handshake() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.net");

    let hello = conn.client_bytes();
    assert_eq!(conn.deliver(&hello), ReceiveOutcome::Closed);
    assert!(conn.socket.is_closed());

    // The client is told why instead of seeing a bare EOF
    let sent = conn.socket.take_sent();
    let mut rd = &sent[..];
    conn.client.read_tls(&mut rd).unwrap();
    let err = conn.client.process_new_packets().unwrap_err();
    assert_eq!(
        err,
        tokio_rustls::rustls::Error::AlertReceived(AlertDescription::UnrecognisedName)
    );

    let stats = harness.stats.snapshot();
    assert_eq!(stats.sni_misses, 1);
    assert_eq!(stats.failed_handshakes, 1);
    assert_eq!(stats.successful_handshakes, 0);
}

#[test]
fn test_tls12_only_client_under_default_policy() {
    let harness = Harness::new();
    let config = harness.pki.client_config_for(&[&version::TLS12]);
    let mut conn = harness.connect_with("example.com", config);

    conn.handshake();
    assert_eq!(conn.client.protocol_version(), Some(ProtocolVersion::TLSv1_2));
    assert_eq!(conn.client.peer_certificates().unwrap()[0], harness.com);

    conn.client.writer().write_all(REQUEST).unwrap();
    let outcomes = conn.pump();
    assert_eq!(outcomes, vec![ReceiveOutcome::Forwarded(REQUEST.len())]);
    assert!(conn.read_response().starts_with("HTTP/1.1 200 OK\r\n"));

    let stats = harness.stats.snapshot();
    assert_eq!(stats.successful_handshakes, 1);
    assert_eq!(stats.failed_handshakes, 0);
}

#[test]
fn test_client_hello_split_across_packets() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");

    let hello = conn.client_bytes();
    let (head, tail) = hello.split_at(10);

    assert_eq!(conn.deliver(head), ReceiveOutcome::NeedMoreData);
    assert!(conn.socket.take_sent().is_empty());

    assert_eq!(conn.deliver(tail), ReceiveOutcome::NeedMoreData);
    assert!(conn.feed_client());

    conn.handshake();
    assert_eq!(conn.client.peer_certificates().unwrap()[0], harness.com);
}

#[test]
fn test_request_is_decrypted_and_answered() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");
    conn.handshake();

    conn.client.writer().write_all(REQUEST).unwrap();
    let outcomes = conn.pump();
    assert_eq!(outcomes, vec![ReceiveOutcome::Forwarded(REQUEST.len())]);

    let response = conn.read_response();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("Hello from example.com\n"));
    assert_eq!(
        harness.stats.snapshot().bytes_decrypted,
        REQUEST.len() as u64
    );
}

#[test]
fn test_partial_application_record_waits_for_rest() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");
    conn.handshake();

    conn.client.writer().write_all(REQUEST).unwrap();
    let record = conn.client_bytes();
    let (head, tail) = record.split_at(record.len() / 2);

    assert_eq!(conn.deliver(head), ReceiveOutcome::NeedMoreData);
    assert_eq!(conn.deliver(tail), ReceiveOutcome::Forwarded(REQUEST.len()));
}

#[test]
fn test_corrupted_record_closes_connection() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");
    conn.handshake();

    conn.client.writer().write_all(REQUEST).unwrap();
    let mut record = conn.client_bytes();
    let last = record.len() - 1;
    record[last] ^= 0xff;

    assert_eq!(conn.deliver(&record), ReceiveOutcome::Closed);
    assert!(conn.socket.is_closed());
    assert_eq!(harness.stats.snapshot().decrypt_failures, 1);
}

#[test]
fn test_close_notify_closes_connection() {
    let harness = Harness::new();
    let mut conn = harness.connect("example.com");
    conn.handshake();

    conn.client.send_close_notify();
    let alert = conn.client_bytes();

    assert_eq!(conn.deliver(&alert), ReceiveOutcome::Closed);
    assert!(conn.socket.is_closed());
    assert_eq!(harness.stats.snapshot().decrypt_failures, 0);
}

#[tokio::test]
async fn test_server_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pki = TestPki::new();
    let issued = pki.issue(&["example.com"]);
    let cert_path = dir.path().join("example.pem");
    let key_path = dir.path().join("example.key");
    std::fs::write(&cert_path, &issued.cert_pem).unwrap();
    std::fs::write(&key_path, &issued.key_pem).unwrap();

    let config = serde_json::json!({
        "cipher_policy": "intermediate",
        "listeners": [{"address": "127.0.0.1", "port": 0}],
        "certificates": [{
            "name": "example",
            "cert_path": cert_path,
            "key_path": key_path,
            "hostnames": ["example.com"],
        }],
    });

    let mut server = HttpsServer::new();
    server
        .init(ModuleConfig::from_json(config.to_string()))
        .unwrap();
    server.start().unwrap();
    let addr = server.local_addrs()[0];

    let connector = TlsConnector::from(pki.client_config());
    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("example.com".to_string()).unwrap();
    let mut stream = connector.connect(name, tcp).await.unwrap();

    stream.write_all(REQUEST).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.ends_with(b"Hello from example.com\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(received).unwrap()
    })
    .await
    .unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(server.stats().successful_handshakes >= 1);

    server.stop().unwrap();
}
