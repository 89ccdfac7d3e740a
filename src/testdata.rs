//! Certificate fixtures shared by unit tests.

use std::path::Path;

use rustls::pki_types::CertificateDer;
use tempfile::TempDir;

pub const CA_PEM: &str = include_str!("../tests/fixtures/ca.crt");
pub const OTHER_CA_PEM: &str = include_str!("../tests/fixtures/other-ca.crt");
pub const CLIENT_CERT_PEM: &str = include_str!("../tests/fixtures/client.crt");
pub const CLIENT_KEY_PEM: &str = include_str!("../tests/fixtures/client.key");
pub const INVALID_PEM: &str = include_str!("../tests/fixtures/invalid.pem");

const SERVER_A_CERT: &str = include_str!("../tests/fixtures/server-a.crt");
const SERVER_A_KEY: &str = include_str!("../tests/fixtures/server-a.key");
const SERVER_B_CERT: &str = include_str!("../tests/fixtures/server-b.crt");
const SERVER_B_KEY: &str = include_str!("../tests/fixtures/server-b.key");

/// Two server identities signed by the same CA.
#[derive(Debug, Clone, Copy)]
pub enum Fixture {
    ServerA,
    ServerB,
}

pub fn cert_pem(fixture: Fixture) -> &'static str {
    match fixture {
        Fixture::ServerA => SERVER_A_CERT,
        Fixture::ServerB => SERVER_B_CERT,
    }
}

pub fn key_pem(fixture: Fixture) -> &'static str {
    match fixture {
        Fixture::ServerA => SERVER_A_KEY,
        Fixture::ServerB => SERVER_B_KEY,
    }
}

pub fn leaf_der(fixture: Fixture) -> CertificateDer<'static> {
    rustls_pemfile::certs(&mut cert_pem(fixture).as_bytes())
        .next()
        .unwrap()
        .unwrap()
}

/// Write `tls.crt`, `tls.key` and `ca.crt` for `fixture` into `dir`.
pub fn write_material(dir: &Path, fixture: Fixture) {
    std::fs::write(dir.join("tls.crt"), cert_pem(fixture)).unwrap();
    std::fs::write(dir.join("tls.key"), key_pem(fixture)).unwrap();
    std::fs::write(dir.join("ca.crt"), CA_PEM).unwrap();
}

/// Fresh temporary directory holding the material for `fixture`.
pub fn material_dir(fixture: Fixture) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_material(dir.path(), fixture);
    dir
}
