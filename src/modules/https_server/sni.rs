//! SNI-based context selection.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::engine::{PendingHandshake, SniCallback, TlsEngine};
use super::error::{TlsError, TlsResult};
use super::registry::CertificateRegistry;

/// Handshake callback that binds the context registered for the client's
/// server name.
pub struct SniResolver<E: TlsEngine> {
    registry: Arc<CertificateRegistry<E>>,
}

impl<E: TlsEngine> std::fmt::Debug for SniResolver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("registry", &self.registry)
            .finish()
    }
}

impl<E: TlsEngine> SniResolver<E> {
    /// Create a resolver backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<CertificateRegistry<E>>) -> Self {
        Self { registry }
    }

    /// The registry lookups go to.
    #[must_use]
    pub fn registry(&self) -> &Arc<CertificateRegistry<E>> {
        &self.registry
    }
}

impl<E: TlsEngine> SniCallback<E::Context> for SniResolver<E> {
    fn on_server_name(
        &self,
        server_name: &str,
        handshake: &mut dyn PendingHandshake<E::Context>,
    ) -> TlsResult<()> {
        let handle = handshake.handle();

        let Some(entry) = self.registry.find_by_hostname(server_name) else {
            warn!(sni = %server_name, handshake = %handle, "No certificate found for SNI");
            return Err(TlsError::HostnameNotMatched {
                sni: server_name.to_string(),
            });
        };

        if let Err(e) = handshake.bind_context(entry.tls_context()) {
            error!(
                certificate = %entry.certificate(),
                handshake = %handle,
                error = %e,
                "Failed to bind TLS context"
            );
            return Err(e);
        }

        debug!(
            sni = %server_name,
            certificate = %entry.certificate(),
            handshake = %handle,
            "Selected certificate for SNI"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::https_server::testing::{mock_certificate, ScriptedEngine, ScriptedHandshake};

    fn resolver(certs: &[(&str, &[&str])]) -> SniResolver<ScriptedEngine> {
        let registry = Arc::new(CertificateRegistry::new(Arc::new(ScriptedEngine::default())));
        for (name, hosts) in certs {
            registry
                .append_certificate(mock_certificate(name, hosts))
                .unwrap();
        }
        SniResolver::new(registry)
    }

    #[test]
    fn test_binds_exact_match() {
        let resolver = resolver(&[("com", &["example.com"]), ("org", &["*.example.org"])]);
        let mut handshake = ScriptedHandshake::new();

        resolver.on_server_name("example.com", &mut handshake).unwrap();
        assert_eq!(handshake.bound.unwrap().label, "com");
    }

    #[test]
    fn test_binds_wildcard_match() {
        let resolver = resolver(&[("com", &["example.com"]), ("org", &["*.example.org"])]);
        let mut handshake = ScriptedHandshake::new();

        resolver
            .on_server_name("api.example.org", &mut handshake)
            .unwrap();
        assert_eq!(handshake.bound.unwrap().label, "org");
    }

    #[test]
    fn test_unmatched_name_fails_without_binding() {
        let resolver = resolver(&[("com", &["example.com"])]);
        let mut handshake = ScriptedHandshake::new();

        let result = resolver.on_server_name("example.net", &mut handshake);
        assert!(matches!(
            result,
            Err(TlsError::HostnameNotMatched { ref sni }) if sni == "example.net"
        ));
        assert!(handshake.bound.is_none());
    }

    #[test]
    fn test_bind_failure_is_returned() {
        let resolver = resolver(&[("unbindable", &["example.com"])]);
        let mut handshake = ScriptedHandshake::new();

        let result = resolver.on_server_name("example.com", &mut handshake);
        assert!(matches!(result, Err(TlsError::HandshakeError { .. })));
        assert!(handshake.bound.is_none());
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let resolver = resolver(&[]);
        let mut handshake = ScriptedHandshake::new();
        assert!(resolver.on_server_name("example.com", &mut handshake).is_err());
    }
}
