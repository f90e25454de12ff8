//! Certificate loading and hostname matching.

use std::fmt;
use std::fs;
use std::path::Path;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info};

use super::config::CertificateConfig;
use super::error::{TlsError, TlsResult};

/// Certificate chain (leaf first) together with its private key.
pub struct CertificatePair {
    chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl CertificatePair {
    /// Create a pair from DER material.
    #[must_use]
    pub fn new(chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Self {
        Self { chain, private_key }
    }

    /// Get the certificate chain.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Get the private key.
    #[must_use]
    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }
}

// Key material must never reach the logs.
impl fmt::Debug for CertificatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificatePair")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// A certificate that can be served by the HTTPS server.
///
/// `Display` is used for diagnostics and must not expose key material.
pub trait Certificate: fmt::Display + Send + Sync {
    /// Key material used to build a TLS context.
    fn certificate_pair(&self) -> &CertificatePair;

    /// Check whether this certificate is valid for `name`.
    fn matches_host(&self, name: &str) -> bool;

    /// Hostname patterns declared by this certificate.
    fn hostnames(&self) -> &[String];
}

/// A PEM-loaded certificate bundle.
pub struct CertificateBundle {
    /// Bundle name.
    name: String,

    /// Certificate chain and private key.
    pair: CertificatePair,

    /// Hostname patterns this certificate serves.
    hostnames: Vec<String>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("name", &self.name)
            .field("certificates_count", &self.pair.chain.len())
            .field("hostnames", &self.hostnames)
            .finish()
    }
}

impl fmt::Display for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.hostnames.join(", "))
    }
}

impl CertificateBundle {
    /// Load a certificate bundle from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key cannot be loaded.
    pub fn load(config: &CertificateConfig) -> TlsResult<Self> {
        info!(name = %config.name, cert_path = %config.cert_path.display(), "Loading certificate bundle");

        let cert_error = |path: &Path, e: std::io::Error| TlsError::CertificateLoadError {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let mut cert_pem =
            fs::read(&config.cert_path).map_err(|e| cert_error(&config.cert_path, e))?;
        if let Some(ref chain_path) = config.chain_path {
            let chain_pem = fs::read(chain_path).map_err(|e| cert_error(chain_path, e))?;
            cert_pem.push(b'\n');
            cert_pem.extend_from_slice(&chain_pem);
        }

        let key_pem = fs::read(&config.key_path).map_err(|e| TlsError::PrivateKeyLoadError {
            path: config.key_path.display().to_string(),
            message: e.to_string(),
        })?;

        let bundle = Self::from_pem(&config.name, &cert_pem, &key_pem, config.hostnames.clone())?;

        debug!(
            name = %config.name,
            cert_count = bundle.pair.chain.len(),
            hostnames = ?config.hostnames,
            "Certificate bundle loaded"
        );

        Ok(bundle)
    }

    /// Load every configured bundle, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first load error.
    pub fn load_all(configs: &[CertificateConfig]) -> TlsResult<Vec<Self>> {
        configs.iter().map(Self::load).collect()
    }

    /// Build a bundle from in-memory PEM data.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data holds no certificate or no key.
    pub fn from_pem(
        name: &str,
        cert_pem: &[u8],
        key_pem: &[u8],
        hostnames: Vec<String>,
    ) -> TlsResult<Self> {
        let chain = certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::CertificateLoadError {
                path: name.to_string(),
                message: e.to_string(),
            })?;

        if chain.is_empty() {
            return Err(TlsError::CertificateLoadError {
                path: name.to_string(),
                message: "No certificates found in PEM data".to_string(),
            });
        }

        let private_key = private_key(&mut &key_pem[..])
            .map_err(|e| TlsError::PrivateKeyLoadError {
                path: name.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| TlsError::PrivateKeyLoadError {
                path: name.to_string(),
                message: "No private key found in PEM data".to_string(),
            })?;

        Ok(Self::from_pair(
            name,
            CertificatePair::new(chain, private_key),
            hostnames,
        ))
    }

    /// Build a bundle from already-decoded key material.
    #[must_use]
    pub fn from_pair(name: &str, pair: CertificatePair, hostnames: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            pair,
            hostnames,
        }
    }

    /// Get the bundle name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Certificate for CertificateBundle {
    fn certificate_pair(&self) -> &CertificatePair {
        &self.pair
    }

    fn matches_host(&self, name: &str) -> bool {
        self.hostnames
            .iter()
            .any(|pattern| hostname_matches(pattern, name))
    }

    fn hostnames(&self) -> &[String] {
        &self.hostnames
    }
}

/// Check if a hostname pattern matches a requested name.
///
/// `*.example.com` matches `www.example.com` but neither `example.com` nor
/// `a.www.example.com`. Comparison is ASCII case-insensitive and ignores a
/// trailing root dot on the requested name.
#[must_use]
pub fn hostname_matches(pattern: &str, hostname: &str) -> bool {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    if hostname.is_empty() {
        return false;
    }

    if pattern.eq_ignore_ascii_case(hostname) {
        return true;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };

    // One label, a dot, then the suffix.
    match hostname.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
        None => false,
    }
}
