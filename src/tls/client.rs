//! Client-side transport adapter.
//!
//! A fresh `ClientConfig` is built from the current bundle for every
//! connection, so rotated client identities and trust pools apply to the next
//! dial without touching existing connections.

use std::sync::Arc;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::{ResolvesClientCert, WebPkiServerVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::tls::bundle::CredentialBundle;
use crate::tls::crypto_provider;
use crate::tls::error::{TlsError, TlsResult};
use crate::tls::reloader::Reloader;
use crate::tls::verify::NoServerVerification;

/// Hook applied to every client config after it is built from a bundle.
pub type ClientCustomizer = Arc<dyn Fn(&mut ClientConfig, &CredentialBundle) + Send + Sync>;

#[derive(Debug)]
struct BundleClientIdentity(Arc<CertifiedKey>);

impl ResolvesClientCert for BundleClientIdentity {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Dials TLS connections with the bundle current at dial time.
#[derive(Clone)]
pub struct ClientTlsConnector {
    reloader: Arc<Reloader>,
    customize: Option<ClientCustomizer>,
}

impl std::fmt::Debug for ClientTlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTlsConnector")
            .field("generation", &self.reloader.generation())
            .field("customize", &self.customize.is_some())
            .finish()
    }
}

impl ClientTlsConnector {
    pub fn new(reloader: Arc<Reloader>, customize: Option<ClientCustomizer>) -> Self {
        Self {
            reloader,
            customize,
        }
    }

    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.reloader
    }

    /// Client config for the bundle published right now, customized.
    pub fn current_config(&self) -> TlsResult<ClientConfig> {
        let bundle = self.reloader.current();
        let mut config = client_config(&bundle)?;
        if let Some(customize) = &self.customize {
            customize(&mut config, bundle.as_ref());
        }
        Ok(config)
    }

    /// Run the client side of a handshake on `stream`.
    pub async fn connect<IO>(
        &self,
        server_name: ServerName<'static>,
        stream: IO,
    ) -> TlsResult<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let connector = TlsConnector::from(Arc::new(self.current_config()?));
        connector
            .connect(server_name, stream)
            .await
            .map_err(TlsError::Handshake)
    }
}

/// Build a rustls client config from one bundle, before customization.
pub fn client_config(bundle: &CredentialBundle) -> TlsResult<ClientConfig> {
    let provider = crypto_provider();
    let verifier = server_cert_verifier(bundle, &provider)?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(bundle.min_protocol_version().supported_versions())?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    Ok(match bundle.certificate() {
        Some(identity) => {
            builder.with_client_cert_resolver(Arc::new(BundleClientIdentity(Arc::clone(identity))))
        }
        None => builder.with_no_client_auth(),
    })
}

/// Verifier for remote servers.
///
/// Uses the bundle's server CA pool, or the bundled web roots when that pool
/// is empty. With `skip_verify` any server certificate is accepted.
pub fn server_cert_verifier(
    bundle: &CredentialBundle,
    provider: &Arc<CryptoProvider>,
) -> TlsResult<Arc<dyn ServerCertVerifier>> {
    if bundle.skip_verify() {
        return Ok(Arc::new(NoServerVerification::new(Arc::clone(provider))));
    }

    let roots = if bundle.trusted_server_cas().is_empty() {
        Arc::new(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        })
    } else {
        Arc::clone(bundle.trusted_server_cas())
    };

    let verifier = WebPkiServerVerifier::builder_with_provider(roots, Arc::clone(provider))
        .build()
        .map_err(|e| TlsError::Verifier(e.to_string()))?;
    Ok(verifier)
}
