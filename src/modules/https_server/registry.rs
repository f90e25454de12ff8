//! Registry of certificates with pre-built TLS contexts.

use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::{debug, error, info};

use super::certificate::Certificate;
use super::engine::{TlsEngine, TlsMethod};
use super::error::{TlsError, TlsResult};
use super::policy::CipherPolicy;

/// A certificate paired with the server context built from it.
pub struct RegisteredCertificate<C> {
    certificate: Arc<dyn Certificate>,
    tls_context: C,
}

impl<C> RegisteredCertificate<C> {
    /// The registered certificate.
    #[must_use]
    pub fn certificate(&self) -> &Arc<dyn Certificate> {
        &self.certificate
    }

    /// The context built for the certificate.
    #[must_use]
    pub fn tls_context(&self) -> &C {
        &self.tls_context
    }
}

impl<C> fmt::Debug for RegisteredCertificate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCertificate")
            .field("certificate", &self.certificate.to_string())
            .finish_non_exhaustive()
    }
}

type Snapshot<C> = Vec<Arc<RegisteredCertificate<C>>>;

/// Ordered, append-only set of certificates served by the HTTPS server.
///
/// Lookups read a lock-free snapshot. Writers build the TLS context first,
/// then publish a new snapshot under `write_lock`. When several certificates
/// match a hostname the one registered first wins.
pub struct CertificateRegistry<E: TlsEngine> {
    engine: Arc<E>,
    method: TlsMethod,
    policy: CipherPolicy,
    entries: ArcSwap<Snapshot<E::Context>>,
    write_lock: Mutex<()>,
}

impl<E: TlsEngine> fmt::Debug for CertificateRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRegistry")
            .field("method", &self.method)
            .field("policy", &self.policy)
            .field("certificates", &self.len())
            .finish_non_exhaustive()
    }
}

impl<E: TlsEngine> CertificateRegistry<E> {
    /// Create an empty registry using the default method and policy.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_policy(engine, TlsMethod::default(), CipherPolicy::default())
    }

    /// Create an empty registry building contexts with `method` and `policy`.
    #[must_use]
    pub fn with_policy(engine: Arc<E>, method: TlsMethod, policy: CipherPolicy) -> Self {
        Self {
            engine,
            method,
            policy,
            entries: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// The engine contexts are built with.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Cipher policy applied to new contexts.
    #[must_use]
    pub fn policy(&self) -> CipherPolicy {
        self.policy
    }

    /// Protocol versions applied to new contexts.
    #[must_use]
    pub fn method(&self) -> TlsMethod {
        self.method
    }

    /// Register a certificate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a certificate without a chain or without
    /// hostnames, and the engine's error when the context cannot be built. The
    /// registry is unchanged on error.
    pub fn append_certificate(&self, certificate: Arc<dyn Certificate>) -> TlsResult<()> {
        let entry = self.build_entry(certificate)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| TlsError::Internal("Registry lock poisoned".to_string()))?;

        let mut next = Vec::clone(&self.entries.load());
        next.push(Arc::new(entry));
        let count = next.len();
        self.entries.store(Arc::new(next));

        debug!(certificates = count, "Published registry snapshot");
        Ok(())
    }

    /// Register certificates in order, stopping at the first failure.
    ///
    /// Certificates appended before the failure stay registered.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Self::append_certificate`].
    pub fn append_certificate_list<I>(&self, certificates: I) -> TlsResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Certificate>>,
    {
        for certificate in certificates {
            self.append_certificate(certificate)?;
        }
        Ok(())
    }

    /// Replace every registered certificate at once.
    ///
    /// All contexts are built before the swap; on error the previous set stays
    /// in place. Returns the number of registered certificates.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered while building contexts.
    pub fn replace_all<I>(&self, certificates: I) -> TlsResult<usize>
    where
        I: IntoIterator<Item = Arc<dyn Certificate>>,
    {
        let next = certificates
            .into_iter()
            .map(|certificate| self.build_entry(certificate).map(Arc::new))
            .collect::<TlsResult<Snapshot<E::Context>>>()?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| TlsError::Internal("Registry lock poisoned".to_string()))?;

        let count = next.len();
        self.entries.store(Arc::new(next));

        info!(certificates = count, "Replaced registered certificates");
        Ok(count)
    }

    /// Find the first certificate matching `hostname`.
    #[must_use]
    pub fn find_by_hostname(
        &self,
        hostname: &str,
    ) -> Option<Arc<RegisteredCertificate<E::Context>>> {
        self.entries
            .load()
            .iter()
            .find(|entry| entry.certificate.matches_host(hostname))
            .cloned()
    }

    /// The first registered certificate.
    #[must_use]
    pub fn first(&self) -> Option<Arc<RegisteredCertificate<E::Context>>> {
        self.entries.load().first().cloned()
    }

    /// Current snapshot of every registered certificate.
    #[must_use]
    pub fn entries(&self) -> Arc<Snapshot<E::Context>> {
        self.entries.load_full()
    }

    /// Number of registered certificates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether no certificate is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    fn build_entry(
        &self,
        certificate: Arc<dyn Certificate>,
    ) -> TlsResult<RegisteredCertificate<E::Context>> {
        if certificate.certificate_pair().chain().is_empty() {
            return Err(TlsError::InvalidArgument {
                message: format!("certificate {certificate} has an empty chain"),
            });
        }
        if certificate.hostnames().is_empty() {
            return Err(TlsError::InvalidArgument {
                message: format!("certificate {certificate} declares no hostname"),
            });
        }

        let tls_context = self
            .engine
            .create_server_context(self.method, certificate.certificate_pair(), self.policy)
            .inspect_err(|e| {
                error!(certificate = %certificate, error = %e, "Failed to create TLS context");
            })?;

        info!(
            certificate = %certificate,
            policy = %self.policy,
            "Built TLS context for certificate"
        );

        Ok(RegisteredCertificate {
            certificate,
            tls_context,
        })
    }
}
