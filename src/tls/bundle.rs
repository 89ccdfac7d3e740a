//! Credential bundle and the builder that loads it from disk.
//!
//! A [`CredentialBundle`] is one generation of TLS material: the local
//! identity, both trust pools and the policy flags. It is built in full by
//! [`build_bundle`] or not at all, and never mutated afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use serde::Serialize;

use crate::config::TlsSettings;
use crate::tls::crypto_provider;
use crate::tls::error::{TlsError, TlsResult};
use crate::tls::policy::{
    parse_client_auth_mode, parse_protocol_version, ClientAuthPolicy, ProtocolVersion,
};

/// One consistent generation of TLS material plus policy.
pub struct CredentialBundle {
    min_protocol_version: ProtocolVersion,
    identity: Option<Arc<CertifiedKey>>,
    trusted_server_cas: Arc<RootCertStore>,
    trusted_client_cas: Arc<RootCertStore>,
    client_auth: ClientAuthPolicy,
    skip_verify: bool,
    loaded_at: SystemTime,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("min_protocol_version", &self.min_protocol_version)
            .field("has_identity", &self.identity.is_some())
            .field("chain_len", &self.certificate_chain().len())
            .field("server_ca_count", &self.trusted_server_cas.len())
            .field("client_ca_count", &self.trusted_client_cas.len())
            .field("client_auth", &self.client_auth)
            .field("skip_verify", &self.skip_verify)
            .finish()
    }
}

impl CredentialBundle {
    /// Lowest protocol version offered or accepted.
    pub fn min_protocol_version(&self) -> ProtocolVersion {
        self.min_protocol_version
    }

    /// Local identity (certificate chain + signing key), if one is configured.
    pub fn certificate(&self) -> Option<&Arc<CertifiedKey>> {
        self.identity.as_ref()
    }

    /// Local certificate chain, leaf first. Empty without an identity.
    pub fn certificate_chain(&self) -> &[CertificateDer<'static>] {
        self.identity.as_ref().map(|k| k.cert.as_slice()).unwrap_or(&[])
    }

    /// Local leaf certificate.
    pub fn leaf_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.certificate_chain().first()
    }

    /// CAs used to verify remote servers. Empty means the built-in web roots.
    pub fn trusted_server_cas(&self) -> &Arc<RootCertStore> {
        &self.trusted_server_cas
    }

    /// CAs used to verify remote clients.
    pub fn trusted_client_cas(&self) -> &Arc<RootCertStore> {
        &self.trusted_client_cas
    }

    pub fn client_auth(&self) -> ClientAuthPolicy {
        self.client_auth
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    /// When the material was read from disk.
    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Serializable description of the bundle.
    pub fn summary(&self, generation: u64) -> BundleSummary {
        BundleSummary {
            generation,
            loaded_at_unix: self
                .loaded_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            min_protocol_version: self.min_protocol_version,
            client_auth: self.client_auth,
            skip_verify: self.skip_verify,
            identity: self.leaf_certificate().map(|leaf| IdentitySummary {
                subject: describe_certificate(leaf)
                    .map(|(subject, _)| subject)
                    .unwrap_or_else(|| "<unparseable>".to_string()),
                serial: describe_certificate(leaf)
                    .map(|(_, serial)| serial)
                    .unwrap_or_default(),
                chain_len: self.certificate_chain().len(),
            }),
            server_ca_count: self.trusted_server_cas.len(),
            client_ca_count: self.trusted_client_cas.len(),
        }
    }
}

/// Serializable view of a published bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub generation: u64,
    pub loaded_at_unix: u64,
    pub min_protocol_version: ProtocolVersion,
    pub client_auth: ClientAuthPolicy,
    pub skip_verify: bool,
    pub identity: Option<IdentitySummary>,
    pub server_ca_count: usize,
    pub client_ca_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub subject: String,
    pub serial: String,
    pub chain_len: usize,
}

/// Subject and serial of a DER certificate, if it parses.
pub fn describe_certificate(der: &CertificateDer<'_>) -> Option<(String, String)> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref()).ok()?;
    Some((
        cert.tbs_certificate.subject.to_string(),
        cert.tbs_certificate.raw_serial_as_string(),
    ))
}

/// Build a bundle from the configured files and policy strings.
///
/// Reads only the named files and touches no shared state, so concurrent
/// calls are safe.
pub fn build_bundle(settings: &TlsSettings) -> TlsResult<CredentialBundle> {
    let min_protocol_version = parse_protocol_version(&settings.min_version)?;
    let client_auth = parse_client_auth_mode(&settings.client_auth)?;
    let provider = crypto_provider();

    let identity = match (settings.cert_path(), settings.key_path()) {
        (Some(cert_path), Some(key_path)) => {
            Some(Arc::new(load_identity(cert_path, key_path, &provider)?))
        }
        (None, None) => None,
        (Some(cert_path), None) => {
            return Err(TlsError::CertKeyMismatch {
                reason: format!(
                    "certificate {} is configured without a private key",
                    cert_path.display()
                ),
            })
        }
        (None, Some(key_path)) => {
            return Err(TlsError::CertKeyMismatch {
                reason: format!(
                    "private key {} is configured without a certificate",
                    key_path.display()
                ),
            })
        }
    };

    let trusted_server_cas = load_ca_pool(settings.server_ca_paths())?;
    let trusted_client_cas = load_ca_pool(settings.client_ca_paths())?;

    Ok(CredentialBundle {
        min_protocol_version,
        identity,
        trusted_server_cas: Arc::new(trusted_server_cas),
        trusted_client_cas: Arc::new(trusted_client_cas),
        client_auth,
        skip_verify: settings.skip_verify,
        loaded_at: SystemTime::now(),
    })
}

fn read_file(path: &Path) -> TlsResult<Vec<u8>> {
    fs::read(path).map_err(|source| TlsError::FileUnreadable {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid_pem(path: &Path, reason: impl Into<String>) -> TlsError {
    TlsError::InvalidPem {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Load every certificate in a PEM file. A file without any is an error.
fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid_pem(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(invalid_pem(path, "no PEM-encoded certificates found"));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| invalid_pem(path, e.to_string()))?
        .ok_or_else(|| invalid_pem(path, "no PEM-encoded private key found"))
}

fn load_identity(
    cert_path: &Path,
    key_path: &Path,
    provider: &CryptoProvider,
) -> TlsResult<CertifiedKey> {
    let chain = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;

    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| invalid_pem(key_path, format!("unsupported private key: {e}")))?;

    let certified = CertifiedKey::new(chain, signing_key);
    match certified.keys_match() {
        Ok(()) => Ok(certified),
        // The key type cannot report its public half; rustls will still fail
        // the handshake if the pair is wrong.
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => Ok(certified),
        Err(rustls::Error::InconsistentKeys(_)) => Err(TlsError::CertKeyMismatch {
            reason: format!(
                "private key {} does not belong to certificate {}",
                key_path.display(),
                cert_path.display()
            ),
        }),
        Err(e) => Err(invalid_pem(cert_path, e.to_string())),
    }
}

fn load_ca_pool<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> TlsResult<RootCertStore> {
    let mut store = RootCertStore::empty();
    for path in paths {
        let certs = load_certificates(path)?;
        let (added, ignored) = store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(invalid_pem(
                path,
                format!("none of the {ignored} certificates is a usable trust anchor"),
            ));
        }
    }
    Ok(store)
}
