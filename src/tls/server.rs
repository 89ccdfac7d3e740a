//! Server-side transport adapter.
//!
//! The rustls `ServerConfig` is chosen per handshake: the client hello is
//! read first, then the config for the currently published bundle is handed
//! to the handshake. A bundle swapped in by a reload therefore applies from
//! the next accepted connection on.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rustls::crypto::CryptoProvider;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::tls::bundle::CredentialBundle;
use crate::tls::crypto_provider;
use crate::tls::error::{TlsError, TlsResult};
use crate::tls::policy::ClientAuthPolicy;
use crate::tls::reloader::Reloader;
use crate::tls::verify::UnverifiedClientAuth;

/// Serves the bundle's identity. Without one, every handshake fails.
#[derive(Debug)]
struct BundleIdentity(Option<Arc<CertifiedKey>>);

impl ResolvesServerCert for BundleIdentity {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.0.clone()
    }
}

struct CachedConfig {
    bundle: Arc<CredentialBundle>,
    config: Arc<ServerConfig>,
}

/// Accepts TLS connections using whatever bundle is current at handshake time.
#[derive(Clone)]
pub struct ServerTlsAcceptor {
    reloader: Arc<Reloader>,
    alpn_protocols: Vec<Vec<u8>>,
    cache: Arc<ArcSwapOption<CachedConfig>>,
}

impl std::fmt::Debug for ServerTlsAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTlsAcceptor")
            .field("generation", &self.reloader.generation())
            .field("alpn_protocols", &self.alpn_protocols.len())
            .finish()
    }
}

impl ServerTlsAcceptor {
    pub fn new(reloader: Arc<Reloader>) -> Self {
        Self {
            reloader,
            alpn_protocols: Vec::new(),
            cache: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Protocols to offer via ALPN, most preferred first.
    #[must_use]
    pub fn with_alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        self.alpn_protocols = protocols.into_iter().map(|p| p.as_ref().to_vec()).collect();
        self.cache.store(None);
        self
    }

    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.reloader
    }

    /// Server config for the bundle published right now.
    ///
    /// The config is rebuilt only when the published bundle changes.
    pub fn current_config(&self) -> TlsResult<Arc<ServerConfig>> {
        let bundle = self.reloader.current();
        if let Some(cached) = self.cache.load().as_ref() {
            if Arc::ptr_eq(&cached.bundle, &bundle) {
                return Ok(Arc::clone(&cached.config));
            }
        }

        let mut config = server_config(&bundle)?;
        config.alpn_protocols = self.alpn_protocols.clone();
        let config = Arc::new(config);
        tracing::debug!(
            generation = self.reloader.generation(),
            client_auth = %bundle.client_auth(),
            "Built server TLS config"
        );

        self.cache.store(Some(Arc::new(CachedConfig {
            bundle,
            config: Arc::clone(&config),
        })));
        Ok(config)
    }

    /// Run the server side of a handshake on `stream`.
    pub async fn accept<IO>(&self, stream: IO) -> TlsResult<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
            .await
            .map_err(TlsError::Handshake)?;
        let config = self.current_config()?;
        start.into_stream(config).await.map_err(TlsError::Handshake)
    }
}

/// Build a rustls server config from one bundle.
pub fn server_config(bundle: &CredentialBundle) -> TlsResult<ServerConfig> {
    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(bundle.min_protocol_version().supported_versions())?;

    let builder = match client_cert_verifier(bundle, &provider)? {
        Some(verifier) => builder.with_client_cert_verifier(verifier),
        None => builder.with_no_client_auth(),
    };

    Ok(builder.with_cert_resolver(Arc::new(BundleIdentity(bundle.certificate().cloned()))))
}

fn client_cert_verifier(
    bundle: &CredentialBundle,
    provider: &Arc<CryptoProvider>,
) -> TlsResult<Option<Arc<dyn ClientCertVerifier>>> {
    let policy = bundle.client_auth();
    let roots = bundle.trusted_client_cas();

    let verifier: Arc<dyn ClientCertVerifier> = match policy {
        ClientAuthPolicy::None => return Ok(None),
        ClientAuthPolicy::Request | ClientAuthPolicy::RequireAny => Arc::new(
            UnverifiedClientAuth::accept_any(Arc::clone(provider), policy.is_mandatory()),
        ),
        ClientAuthPolicy::VerifyIfGiven | ClientAuthPolicy::RequireAndVerify
            if roots.is_empty() =>
        {
            Arc::new(UnverifiedClientAuth::reject_presented(
                Arc::clone(provider),
                policy.is_mandatory(),
            ))
        }
        ClientAuthPolicy::VerifyIfGiven | ClientAuthPolicy::RequireAndVerify => {
            let builder =
                WebPkiClientVerifier::builder_with_provider(Arc::clone(roots), Arc::clone(provider));
            let builder = if policy.is_mandatory() {
                builder
            } else {
                builder.allow_unauthenticated()
            };
            builder
                .build()
                .map_err(|e| TlsError::Verifier(e.to_string()))?
        }
    };

    Ok(Some(verifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsSettings;
    use crate::testdata::{self, Fixture};
    use std::path::Path;

    fn reloader_for(dir: &Path, client_auth: &str) -> Arc<Reloader> {
        let settings = TlsSettings {
            cert_path: Some(dir.join("tls.crt")),
            key_path: Some(dir.join("tls.key")),
            client_ca_paths: vec![dir.join("ca.crt")],
            client_auth: client_auth.into(),
            ..TlsSettings::default()
        };
        Arc::new(Reloader::new(settings).unwrap())
    }

    #[test]
    fn config_is_cached_per_bundle() {
        let dir = testdata::material_dir(Fixture::ServerA);
        let acceptor = ServerTlsAcceptor::new(reloader_for(dir.path(), "none"));

        let first = acceptor.current_config().unwrap();
        let second = acceptor.current_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        testdata::write_material(dir.path(), Fixture::ServerB);
        acceptor.reloader().reload().unwrap();
        let third = acceptor.current_config().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn every_policy_builds() {
        let dir = testdata::material_dir(Fixture::ServerA);
        for mode in [
            "none",
            "request",
            "require",
            "verify-if-given",
            "require-and-verify",
        ] {
            let acceptor = ServerTlsAcceptor::new(reloader_for(dir.path(), mode));
            assert!(acceptor.current_config().is_ok(), "mode {mode}");
        }
    }

    #[test]
    fn alpn_is_applied() {
        let dir = testdata::material_dir(Fixture::ServerA);
        let acceptor = ServerTlsAcceptor::new(reloader_for(dir.path(), "none"))
            .with_alpn_protocols([b"h2".as_slice(), b"http/1.1".as_slice()]);
        let config = acceptor.current_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }
}
