//! Error definitions for the TLS material subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`TlsError`].
///
/// Startup treats every kind as fatal. After startup, only
/// `WatchInfrastructure` is unexpected; the others are contained by the
/// watcher and the previously published bundle stays in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad paths or unparseable mode/version strings.
    Configuration,
    /// Unreadable file, invalid PEM, or mismatched certificate and key.
    CryptoMaterial,
    /// The filesystem event source could not be created.
    WatchInfrastructure,
    /// A single event from the filesystem event source was an error.
    TransientEvent,
}

/// Errors produced while building, publishing or serving TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate and private key do not form a usable pair.
    #[error("certificate/key mismatch: {reason}")]
    CertKeyMismatch { reason: String },

    /// A configured file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured file holds no usable PEM material.
    #[error("invalid PEM in {}: {reason}", path.display())]
    InvalidPem { path: PathBuf, reason: String },

    /// The client-auth mode string is not one of the known modes.
    #[error("unknown client auth mode: {0:?}")]
    UnknownClientAuthMode(String),

    /// The minimum protocol version string is not supported.
    #[error("unsupported TLS protocol version: {0:?}")]
    UnsupportedProtocolVersion(String),

    /// The filesystem watcher could not be created or attached.
    #[error("cannot set up certificate watch: {0}")]
    WatchSetup(#[source] notify::Error),

    /// The filesystem watcher reported an error for a single event.
    #[error("certificate watch event error: {0}")]
    WatchEvent(#[source] notify::Error),

    /// rustls rejected the material or the protocol configuration.
    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    /// A certificate verifier could not be built from the trust pool.
    #[error("cannot build certificate verifier: {0}")]
    Verifier(String),

    /// The TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
}

impl TlsError {
    /// Map the error onto the subsystem's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TlsError::UnknownClientAuthMode(_) | TlsError::UnsupportedProtocolVersion(_) => {
                ErrorKind::Configuration
            }
            TlsError::CertKeyMismatch { .. }
            | TlsError::FileUnreadable { .. }
            | TlsError::InvalidPem { .. }
            | TlsError::Rustls(_)
            | TlsError::Verifier(_)
            | TlsError::Handshake(_) => ErrorKind::CryptoMaterial,
            TlsError::WatchSetup(_) => ErrorKind::WatchInfrastructure,
            TlsError::WatchEvent(_) => ErrorKind::TransientEvent,
        }
    }

    /// The file this error is about, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            TlsError::FileUnreadable { path, .. } | TlsError::InvalidPem { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type for TLS material operations.
pub type TlsResult<T> = Result<T, TlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_path() {
        let err = TlsError::InvalidPem {
            path: PathBuf::from("/etc/tls/ca.crt"),
            reason: "no certificates found".into(),
        };
        assert!(err.to_string().contains("/etc/tls/ca.crt"));
        assert_eq!(err.path(), Some(std::path::Path::new("/etc/tls/ca.crt")));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            TlsError::UnknownClientAuthMode("bogus".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            TlsError::CertKeyMismatch { reason: "x".into() }.kind(),
            ErrorKind::CryptoMaterial
        );
        assert_eq!(
            TlsError::WatchSetup(notify::Error::generic("no inotify")).kind(),
            ErrorKind::WatchInfrastructure
        );
        assert_eq!(
            TlsError::WatchEvent(notify::Error::generic("overflow")).kind(),
            ErrorKind::TransientEvent
        );
    }
}
