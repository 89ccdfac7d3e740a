//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! The TLS section keeps mode and version as strings; they are parsed by the
//! bundle builder so that a bad value surfaces as a TLS build error.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration for the demo server.
    pub listener: ListenerConfig,

    /// TLS material and policy.
    pub tls: TlsSettings,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long to wait for open connections after shutdown is requested.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8443".to_string(),
            max_connections: 1024,
            drain_timeout_secs: 10,
        }
    }
}

/// TLS material locations and policy flags.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsSettings {
    /// Bypass TLS entirely (plaintext, development only).
    pub insecure: bool,

    /// Path to the certificate chain (PEM).
    pub cert_path: Option<PathBuf>,

    /// Path to the private key (PEM).
    pub key_path: Option<PathBuf>,

    /// CA bundles used to verify remote servers.
    pub server_ca_paths: Vec<PathBuf>,

    /// CA bundles used to verify remote clients.
    pub client_ca_paths: Vec<PathBuf>,

    /// Minimum protocol version ("tls12" or "tls13").
    pub min_version: String,

    /// Client authentication mode.
    pub client_auth: String,

    /// Disable verification of the remote identity (development only).
    pub skip_verify: bool,

    /// Watch the material on disk and reload on change.
    pub watch: bool,

    /// Delay between the first change event and the reload.
    pub reload_debounce_ms: u64,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            insecure: false,
            cert_path: None,
            key_path: None,
            server_ca_paths: Vec::new(),
            client_ca_paths: Vec::new(),
            min_version: "tls13".to_string(),
            client_auth: "none".to_string(),
            skip_verify: false,
            watch: true,
            reload_debounce_ms: 1000,
        }
    }
}

impl TlsSettings {
    /// Configured certificate path, ignoring empty values.
    pub fn cert_path(&self) -> Option<&PathBuf> {
        self.cert_path.as_ref().filter(|p| !p.as_os_str().is_empty())
    }

    /// Configured key path, ignoring empty values.
    pub fn key_path(&self) -> Option<&PathBuf> {
        self.key_path.as_ref().filter(|p| !p.as_os_str().is_empty())
    }

    /// Server-trust CA paths, ignoring empty values.
    pub fn server_ca_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.server_ca_paths.iter().filter(|p| !p.as_os_str().is_empty())
    }

    /// Client-trust CA paths, ignoring empty values.
    pub fn client_ca_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.client_ca_paths.iter().filter(|p| !p.as_os_str().is_empty())
    }

    /// Every file the bundle is built from.
    pub fn material_paths(&self) -> Vec<PathBuf> {
        self.cert_path()
            .into_iter()
            .chain(self.key_path())
            .chain(self.server_ca_paths())
            .chain(self.client_ca_paths())
            .cloned()
            .collect()
    }

    /// Debounce window for the change watcher.
    pub fn reload_debounce(&self) -> Duration {
        Duration::from_millis(self.reload_debounce_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert!(!config.tls.insecure);
        assert!(config.tls.watch);
        assert_eq!(config.tls.min_version, "tls13");
        assert_eq!(config.tls.reload_debounce(), Duration::from_secs(1));
        assert_eq!(config.listener.max_connections, 1024);
    }

    #[test]
    fn material_paths_skip_empty_entries() {
        let settings = TlsSettings {
            cert_path: Some(PathBuf::from("/tls/tls.crt")),
            key_path: Some(PathBuf::new()),
            server_ca_paths: vec![PathBuf::from("/tls/ca.crt"), PathBuf::new()],
            client_ca_paths: vec![PathBuf::from("/tls/clients.crt")],
            ..TlsSettings::default()
        };
        assert!(settings.key_path().is_none());
        assert_eq!(
            settings.material_paths(),
            vec![
                PathBuf::from("/tls/tls.crt"),
                PathBuf::from("/tls/ca.crt"),
                PathBuf::from("/tls/clients.crt"),
            ]
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [tls]
            cert_path = "/run/secrets/tls/tls.crt"
            key_path = "/run/secrets/tls/tls.key"
            client_auth = "require-and-verify"
            "#,
        )
        .unwrap();
        assert_eq!(config.tls.client_auth, "require-and-verify");
        assert_eq!(config.tls.min_version, "tls13");
        assert_eq!(config.listener.bind_address, "127.0.0.1:8443");
        assert_eq!(config.observability.log_format, "pretty");
    }
}
