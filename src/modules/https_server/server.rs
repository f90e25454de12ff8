//! HTTPS server module.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::module::{
    Capability, MetricsPayload, ModuleConfig, ModuleContract, ModuleError, ModuleManifest,
    ModuleResult, ModuleStatus,
};

use super::certificate::{Certificate, CertificateBundle};
use super::clients::ClientTable;
use super::config::HttpsServerConfig;
use super::connection::{serve_connection, AtomicConnectionStats, ConnectionStats};
use super::error::{TlsError, TlsResult};
use super::registry::CertificateRegistry;
use super::rustls_engine::RustlsEngine;
use super::transport::{ConnectionTransport, PlainTransport, TlsTransport};

/// The HTTPS server module.
///
/// Terminates TLS on every TLS listener, choosing the certificate from the
/// client's SNI, and serves the decrypted requests from a [`ClientTable`].
pub struct HttpsServer {
    /// Current status.
    status: ModuleStatus,

    /// Configuration.
    config: Option<HttpsServerConfig>,

    /// TLS engine shared by every registry.
    engine: Arc<RustlsEngine>,

    /// Certificate registry.
    registry: Option<Arc<CertificateRegistry<RustlsEngine>>>,

    /// Connected HTTP clients.
    clients: Arc<ClientTable>,

    /// Connection statistics.
    stats: Arc<AtomicConnectionStats>,

    /// Start time.
    started_at: Option<Instant>,

    /// Shutdown signal sender.
    shutdown_tx: Option<broadcast::Sender<()>>,

    /// Addresses the listeners are bound to.
    local_addrs: Vec<SocketAddr>,
}

impl std::fmt::Debug for HttpsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsServer")
            .field("status", &self.status)
            .field("registry", &self.registry)
            .field("local_addrs", &self.local_addrs)
            .finish_non_exhaustive()
    }
}

impl HttpsServer {
    /// Create a new HTTPS server.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: ModuleStatus::Initializing,
            config: None,
            engine: Arc::new(RustlsEngine::new()),
            registry: None,
            clients: Arc::new(ClientTable::new()),
            stats: Arc::new(AtomicConnectionStats::new()),
            started_at: None,
            shutdown_tx: None,
            local_addrs: Vec::new(),
        }
    }

    /// Get connection statistics.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    /// The certificate registry, once initialized.
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<CertificateRegistry<RustlsEngine>>> {
        self.registry.as_ref()
    }

    /// Addresses the listeners are bound to while running.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Parse the module configuration.
    ///
    /// `config_json` takes precedence over a raw TOML document.
    fn parse_config(config: &ModuleConfig) -> ModuleResult<HttpsServerConfig> {
        if let Some(config_json) = config.json() {
            return serde_json::from_str(config_json)
                .map_err(|e| ModuleError::ConfigError(format!("Invalid HTTPS config: {e}")));
        }

        if let Some(raw) = config.raw_config() {
            return toml::from_str(raw)
                .map_err(|e| ModuleError::ConfigError(format!("Invalid HTTPS config: {e}")));
        }

        Ok(HttpsServerConfig::default())
    }

    fn validate(config: &HttpsServerConfig) -> ModuleResult<()> {
        if config.listeners.is_empty() {
            return Err(ModuleError::ConfigError(
                "At least one listener is required".to_string(),
            ));
        }

        if config.listeners.iter().any(|l| l.tls) && config.certificates.is_empty() {
            return Err(ModuleError::ConfigError(
                "At least one certificate is required for TLS listeners".to_string(),
            ));
        }

        if config.connection.max_connections == 0 {
            return Err(ModuleError::ConfigError(
                "max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the bound addresses or their TLS flags differ.
    fn listeners_changed(current: &HttpsServerConfig, new: &HttpsServerConfig) -> bool {
        let endpoints = |config: &HttpsServerConfig| -> Vec<(SocketAddr, bool)> {
            config
                .listeners
                .iter()
                .map(|l| (l.socket_addr(), l.tls))
                .collect()
        };
        endpoints(current) != endpoints(new)
    }

    fn load_certificates(config: &HttpsServerConfig) -> TlsResult<Vec<Arc<dyn Certificate>>> {
        Ok(CertificateBundle::load_all(&config.certificates)?
            .into_iter()
            .map(|bundle| Arc::new(bundle) as Arc<dyn Certificate>)
            .collect())
    }

    fn bind(address: SocketAddr) -> TlsResult<TcpListener> {
        let listener = std::net::TcpListener::bind(address)
            .map_err(|source| TlsError::BindError { address, source })?;
        listener.set_nonblocking(true)?;
        Ok(TcpListener::from_std(listener)?)
    }

    async fn accept_loop(
        listener: TcpListener,
        transport: Arc<dyn ConnectionTransport>,
        read_buffer_size: usize,
        limiter: Arc<Semaphore>,
        stats: Arc<AtomicConnectionStats>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                            stats.record_rejected();
                            warn!(peer = %peer_addr, "Connection limit reached");
                            continue;
                        };

                        let transport = Arc::clone(&transport);
                        let stats = Arc::clone(&stats);

                        tokio::spawn(async move {
                            stats.record_connection();
                            serve_connection(
                                transport,
                                stream,
                                peer_addr,
                                read_buffer_size,
                                Arc::clone(&stats),
                            )
                            .await;
                            stats.record_connection_closed();
                            drop(permit);
                        });
                    },
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    },
                },
                _ = shutdown_rx.recv() => {
                    debug!("Listener shutting down");
                    break;
                }
            }
        }
    }
}

impl Default for HttpsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleContract for HttpsServer {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("https-server")
            .description("HTTPS termination with SNI-based certificate selection")
            .version(1, 0, 0)
            .capabilities([
                Capability::TcpListener,
                Capability::TlsTermination,
                Capability::SniRouting,
                Capability::HttpProtocol,
                Capability::HotReload,
                Capability::Metrics,
            ])
            .build()
    }

    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        info!("Initializing HTTPS server");

        // Live listeners hold the current registry; use reload instead.
        if matches!(self.status, ModuleStatus::Running) {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Initializing or Stopped".to_string(),
            });
        }
        self.status = ModuleStatus::Initializing;

        let server_config = Self::parse_config(&config)?;
        Self::validate(&server_config)?;

        let certificates = Self::load_certificates(&server_config)
            .map_err(|e| ModuleError::ConfigError(format!("Failed to load certificates: {e}")))?;

        let registry = Arc::new(CertificateRegistry::with_policy(
            Arc::clone(&self.engine),
            server_config.tls_method,
            server_config.cipher_policy,
        ));
        registry
            .append_certificate_list(certificates)
            .map_err(|e| {
                ModuleError::InitializationFailed(format!("Failed to register certificate: {e}"))
            })?;

        info!(
            certificates = registry.len(),
            listeners = server_config.listeners.len(),
            policy = %server_config.cipher_policy,
            "HTTPS server initialized"
        );

        self.registry = Some(registry);
        self.config = Some(server_config);
        Ok(())
    }

    fn start(&mut self) -> ModuleResult<()> {
        info!("Starting HTTPS server");

        if !matches!(
            self.status,
            ModuleStatus::Initializing | ModuleStatus::Stopped
        ) {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Initializing or Stopped".to_string(),
            });
        }

        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ModuleError::InvalidState {
                current: "No config".to_string(),
                expected: "Configuration set".to_string(),
            })?;

        let registry = self
            .registry
            .clone()
            .ok_or_else(|| ModuleError::InvalidState {
                current: "No certificate registry".to_string(),
                expected: "Certificate registry initialized".to_string(),
            })?;

        // Bind everything first so a failure leaves nothing running.
        let mut listeners = Vec::with_capacity(config.listeners.len());
        for listener_config in &config.listeners {
            let listener = Self::bind(listener_config.socket_addr())
                .map_err(|e| ModuleError::StartFailed(e.to_string()))?;
            let local_addr = listener
                .local_addr()
                .map_err(|e| ModuleError::StartFailed(e.to_string()))?;
            listeners.push((listener_config.clone(), listener, local_addr));
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let limiter = Arc::new(Semaphore::new(config.connection.max_connections));
        let read_buffer_size = config.connection.read_buffer_size;

        self.local_addrs.clear();
        for (listener_config, listener, local_addr) in listeners {
            let transport: Arc<dyn ConnectionTransport> = if listener_config.tls {
                Arc::new(TlsTransport::new(
                    Arc::clone(&registry),
                    self.clients.clone(),
                    Arc::clone(&self.stats),
                ))
            } else {
                Arc::new(PlainTransport::new(self.clients.clone()))
            };

            info!(
                addr = %local_addr,
                name = ?listener_config.name,
                tls = listener_config.tls,
                "Listener started"
            );

            tokio::spawn(Self::accept_loop(
                listener,
                transport,
                read_buffer_size,
                Arc::clone(&limiter),
                Arc::clone(&self.stats),
                shutdown_tx.subscribe(),
            ));

            self.local_addrs.push(local_addr);
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.started_at = Some(Instant::now());
        self.status = ModuleStatus::Running;

        info!("HTTPS server started");
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        info!("Stopping HTTPS server");

        if !matches!(self.status, ModuleStatus::Running) {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Running".to_string(),
            });
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.clients.close_all();
        self.local_addrs.clear();

        self.status = ModuleStatus::Stopped;
        info!("HTTPS server stopped");
        Ok(())
    }

    fn reload(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        info!("Reloading HTTPS server configuration");

        let new_config = Self::parse_config(&config)?;
        Self::validate(&new_config)?;

        let registry = self
            .registry
            .clone()
            .ok_or_else(|| ModuleError::InvalidState {
                current: "No certificate registry".to_string(),
                expected: "Certificate registry initialized".to_string(),
            })?;

        if new_config.cipher_policy != registry.policy()
            || new_config.tls_method != registry.method()
        {
            warn!(
                current = %registry.policy(),
                requested = %new_config.cipher_policy,
                "TLS method and cipher policy changes take effect after a restart"
            );
        }

        if let Some(current) = self.config.as_ref() {
            if Self::listeners_changed(current, &new_config) {
                warn!(
                    current = current.listeners.len(),
                    requested = new_config.listeners.len(),
                    "Listener changes take effect the next time the server is started"
                );
            }
        }

        let certificates = Self::load_certificates(&new_config)
            .map_err(|e| ModuleError::ConfigError(format!("Failed to load certificates: {e}")))?;
        let count = registry
            .replace_all(certificates)
            .map_err(|e| ModuleError::ConfigError(format!("Failed to register certificate: {e}")))?;

        self.config = Some(new_config);

        info!(certificates = count, "HTTPS server configuration reloaded");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        self.status.clone()
    }

    fn metrics(&self) -> MetricsPayload {
        let mut metrics = MetricsPayload::new();
        let stats = self.stats.snapshot();

        metrics.counter("total_connections", stats.total_connections);
        metrics.gauge("active_connections", stats.active_connections as f64);
        metrics.counter("rejected_connections", stats.rejected_connections);
        metrics.counter("successful_handshakes", stats.successful_handshakes);
        metrics.counter("failed_handshakes", stats.failed_handshakes);
        metrics.counter("sni_misses", stats.sni_misses);
        metrics.counter("decrypt_failures", stats.decrypt_failures);
        metrics.counter("internal_errors", stats.internal_errors);
        metrics.counter("bytes_decrypted", stats.bytes_decrypted);
        metrics.counter("bytes_read", stats.bytes_read);
        metrics.counter("bytes_written", stats.bytes_written);
        metrics.gauge(
            "registered_certificates",
            self.registry.as_ref().map_or(0, |r| r.len()) as f64,
        );
        metrics.gauge(
            "uptime_seconds",
            self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0) as f64,
        );

        metrics
    }
}
