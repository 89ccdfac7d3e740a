//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tls_reloader::config::TlsSettings;
use tls_reloader::tls::{ClientTlsConnector, Reloader, ServerTlsAcceptor};

pub const GREETING: &[u8] = b"hello over tls\n";

/// Path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// One of the two server identities signed by the test CA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    A,
    B,
}

impl Generation {
    fn stem(self) -> &'static str {
        match self {
            Generation::A => "server-a",
            Generation::B => "server-b",
        }
    }

    pub fn cert(self) -> PathBuf {
        fixture(&format!("{}.crt", self.stem()))
    }

    pub fn key(self) -> PathBuf {
        fixture(&format!("{}.key", self.stem()))
    }

    /// DER of the leaf certificate.
    pub fn leaf_der(self) -> Vec<u8> {
        let pem = std::fs::read(self.cert()).unwrap();
        let leaf = rustls_pemfile::certs(&mut pem.as_slice())
            .next()
            .unwrap()
            .unwrap()
            .to_vec();
        leaf
    }
}

/// Write `tls.crt`, `tls.key` and `ca.crt` for `generation` into `dir`.
pub fn write_material(dir: &Path, generation: Generation) {
    std::fs::copy(generation.cert(), dir.join("tls.crt")).unwrap();
    std::fs::copy(generation.key(), dir.join("tls.key")).unwrap();
    std::fs::copy(fixture("ca.crt"), dir.join("ca.crt")).unwrap();
}

/// Temporary directory holding the material for `generation`.
pub fn material_dir(generation: Generation) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_material(dir.path(), generation);
    dir
}

/// Server settings reading `tls.crt`/`tls.key` from `dir`, trusting `ca.crt` for clients.
pub fn server_settings(dir: &Path) -> TlsSettings {
    TlsSettings {
        cert_path: Some(dir.join("tls.crt")),
        key_path: Some(dir.join("tls.key")),
        client_ca_paths: vec![dir.join("ca.crt")],
        watch: false,
        ..TlsSettings::default()
    }
}

/// Client settings trusting the test CA, without a client identity.
pub fn client_settings() -> TlsSettings {
    TlsSettings {
        server_ca_paths: vec![fixture("ca.crt")],
        watch: false,
        ..TlsSettings::default()
    }
}

/// Client settings trusting the test CA and presenting the test client identity.
pub fn client_settings_with_identity() -> TlsSettings {
    TlsSettings {
        cert_path: Some(fixture("client.crt")),
        key_path: Some(fixture("client.key")),
        ..client_settings()
    }
}

pub fn connector(settings: TlsSettings) -> ClientTlsConnector {
    ClientTlsConnector::new(Arc::new(Reloader::new(settings).unwrap()), None)
}

/// Loopback TLS server that greets every client and closes.
pub async fn spawn_greeting_server(acceptor: ServerTlsAcceptor) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(stream).await {
                    let _ = tls.write_all(GREETING).await;
                    let _ = tls.shutdown().await;
                }
            });
        }
    });

    addr
}

/// Dial `addr`, read the greeting, and return the server's leaf certificate.
///
/// A server that rejects the client after the handshake (TLS 1.3 client
/// auth) surfaces here as a read error.
pub async fn exchange(connector: &ClientTlsConnector, addr: SocketAddr) -> Result<Vec<u8>, String> {
    let stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    let name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| e.to_string())?;

    let leaf = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .map(|cert| cert.to_vec())
        .ok_or("no server certificate")?;

    let mut received = Vec::new();
    tls.read_to_end(&mut received)
        .await
        .map_err(|e| e.to_string())?;
    if received != GREETING {
        return Err(format!("unexpected greeting: {received:?}"));
    }
    Ok(leaf)
}
