//! HTTPS server configuration types.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use super::engine::TlsMethod;
use super::policy::CipherPolicy;

/// Configuration for the HTTPS server module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsServerConfig {
    /// Listeners to bind.
    pub listeners: Vec<ListenerConfig>,

    /// Certificates to register, in lookup order.
    pub certificates: Vec<CertificateConfig>,

    /// Cipher policy used when building registry contexts.
    pub cipher_policy: CipherPolicy,

    /// Protocol versions offered.
    pub tls_method: TlsMethod,

    /// Connection settings.
    pub connection: ConnectionSettings,
}

/// Configuration for a listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub address: IpAddr,

    /// Listen port.
    pub port: u16,

    /// Optional name for identification.
    #[serde(default)]
    pub name: Option<String>,

    /// Terminate TLS on this listener (cleartext HTTP when `false`).
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_true() -> bool {
    true
}

impl ListenerConfig {
    /// Create a new TLS listener config.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            address: default_bind_address(),
            port,
            name: None,
            tls: true,
        }
    }

    /// Set the bind address.
    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the listener name.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Serve cleartext HTTP on this listener.
    #[must_use]
    pub fn plaintext(mut self) -> Self {
        self.tls = false;
        self
    }

    /// Get the socket address.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Certificate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// Certificate name for identification.
    pub name: String,

    /// Path to the PEM certificate file.
    pub cert_path: PathBuf,

    /// Path to the PEM private key file.
    pub key_path: PathBuf,

    /// Optional path to intermediate certificates.
    #[serde(default)]
    pub chain_path: Option<PathBuf>,

    /// Hostnames served by this certificate (`*.` prefix for wildcards).
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl CertificateConfig {
    /// Create a new certificate config.
    #[must_use]
    pub fn new(name: &str, cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            cert_path,
            key_path,
            chain_path: None,
            hostnames: Vec::new(),
        }
    }

    /// Add a hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostnames.push(hostname.to_string());
        self
    }

    /// Set the intermediate chain path.
    #[must_use]
    pub fn with_chain(mut self, chain_path: PathBuf) -> Self {
        self.chain_path = Some(chain_path);
        self
    }
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Size of the socket read buffer in bytes.
    pub read_buffer_size: usize,

    /// Maximum concurrent connections per server.
    pub max_connections: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: 16 * 1024,
            max_connections: 10000,
        }
    }
}
