//! TLS probe client.
//!
//! Dials a server repeatedly, building a fresh client config from the current
//! bundle for every attempt, and reports which certificate the server showed.
//! Useful for watching a rotation land on a live server.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::tls::bundle::describe_certificate;
use crate::tls::client::server_cert_verifier;
use crate::tls::{crypto_provider, ClientCustomizer, ClientTlsConnector, CredentialBundle};

/// Runs the standard verifier, then logs the certificate it accepted.
#[derive(Debug)]
struct InspectingVerifier {
    inner: Arc<dyn ServerCertVerifier>,
}

impl ServerCertVerifier for InspectingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let verified =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        let (subject, serial) = describe_certificate(end_entity).unwrap_or_default();
        tracing::info!(
            server_name = ?server_name,
            subject = %subject,
            serial = %serial,
            intermediates = intermediates.len(),
            "Server certificate accepted"
        );
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Customizer that wraps the bundle's server verifier with [`InspectingVerifier`].
pub fn inspecting_customizer() -> ClientCustomizer {
    Arc::new(|config: &mut ClientConfig, bundle: &CredentialBundle| {
        match server_cert_verifier(bundle, &crypto_provider()) {
            Ok(inner) => config
                .dangerous()
                .set_certificate_verifier(Arc::new(InspectingVerifier { inner })),
            Err(e) => tracing::warn!(error = %e, "Cannot wrap server verifier, inspection disabled"),
        }
    })
}

/// Result of one dial.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeAttempt {
    pub attempt: u32,
    pub ok: bool,
    pub subject: Option<String>,
    pub serial: Option<String>,
    pub protocol_version: Option<String>,
    pub error: Option<String>,
}

impl fmt::Display for ProbeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, &self.subject) {
            (Some(error), _) => write!(f, "attempt {}: failed: {}", self.attempt, error),
            (None, subject) => write!(
                f,
                "attempt {}: ok subject={} serial={}",
                self.attempt,
                subject.as_deref().unwrap_or("-"),
                self.serial.as_deref().unwrap_or("-")
            ),
        }
    }
}

/// Dial `addr` `attempts` times, `interval` apart.
pub async fn probe(
    connector: &ClientTlsConnector,
    addr: &str,
    server_name: ServerName<'static>,
    attempts: u32,
    interval: Duration,
) -> Vec<ProbeAttempt> {
    let mut results = Vec::with_capacity(attempts as usize);

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(interval).await;
        }

        let result = dial_once(connector, addr, server_name.clone(), attempt).await;
        match &result.error {
            Some(error) => tracing::warn!(attempt, error = %error, "Probe failed"),
            None => tracing::debug!(attempt, subject = ?result.subject, "Probe succeeded"),
        }
        results.push(result);
    }

    results
}

async fn dial_once(
    connector: &ClientTlsConnector,
    addr: &str,
    server_name: ServerName<'static>,
    attempt: u32,
) -> ProbeAttempt {
    let failed = |error: String| ProbeAttempt {
        attempt,
        ok: false,
        subject: None,
        serial: None,
        protocol_version: None,
        error: Some(error),
    };

    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => return failed(format!("connect {addr}: {e}")),
    };
    let mut tls = match connector.connect(server_name, stream).await {
        Ok(tls) => tls,
        Err(e) => return failed(e.to_string()),
    };

    let (_, conn) = tls.get_ref();
    let described = conn
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(describe_certificate);
    let protocol_version = conn.protocol_version().map(|v| format!("{v:?}"));

    let _ = tls.shutdown().await;

    ProbeAttempt {
        attempt,
        ok: true,
        subject: described.as_ref().map(|(subject, _)| subject.clone()),
        serial: described.map(|(_, serial)| serial),
        protocol_version,
        error: None,
    }
}
