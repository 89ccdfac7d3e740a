//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that certificate and key are configured as a pair
//! - Check that mode and version strings parse
//! - Validate value ranges (connection limit, debounce window)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Files are not opened here; reading them is the bundle builder's job

use std::fmt;

use crate::config::schema::{AppConfig, TlsSettings};
use crate::observability::LogFormat;
use crate::tls::policy::{parse_client_auth_mode, parse_protocol_version};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the whole configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }

    if LogFormat::parse(&config.observability.log_format).is_none() {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!(
                "unknown format {:?} (expected \"pretty\" or \"json\")",
                config.observability.log_format
            ),
        ));
    }

    if let Err(tls_errors) = validate_tls_settings(&config.tls) {
        errors.extend(tls_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the TLS section. Insecure settings are always valid.
pub fn validate_tls_settings(settings: &TlsSettings) -> Result<(), Vec<ValidationError>> {
    if settings.insecure {
        return Ok(());
    }

    let mut errors = Vec::new();

    match (settings.cert_path(), settings.key_path()) {
        (Some(_), None) => errors.push(ValidationError::new(
            "tls.key_path",
            "a certificate is configured without a private key",
        )),
        (None, Some(_)) => errors.push(ValidationError::new(
            "tls.cert_path",
            "a private key is configured without a certificate",
        )),
        _ => {}
    }

    if let Err(e) = parse_protocol_version(&settings.min_version) {
        errors.push(ValidationError::new("tls.min_version", e.to_string()));
    }

    if let Err(e) = parse_client_auth_mode(&settings.client_auth) {
        errors.push(ValidationError::new("tls.client_auth", e.to_string()));
    }

    if settings.watch && settings.reload_debounce_ms == 0 {
        errors.push(ValidationError::new(
            "tls.reload_debounce_ms",
            "must be greater than zero while watching",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = AppConfig::default();
        config.listener.max_connections = 0;
        config.tls.cert_path = Some(PathBuf::from("/tls/tls.crt"));
        config.tls.min_version = "tls10".into();
        config.tls.client_auth = "bogus".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.max_connections",
                "tls.key_path",
                "tls.min_version",
                "tls.client_auth",
            ]
        );
    }

    #[test]
    fn insecure_skips_tls_checks() {
        let settings = TlsSettings {
            insecure: true,
            key_path: Some(PathBuf::from("/tls/tls.key")),
            client_auth: "bogus".into(),
            ..TlsSettings::default()
        };
        assert!(validate_tls_settings(&settings).is_ok());
    }

    #[test]
    fn zero_debounce_only_matters_when_watching() {
        let mut settings = TlsSettings {
            reload_debounce_ms: 0,
            ..TlsSettings::default()
        };
        assert!(validate_tls_settings(&settings).is_err());
        settings.watch = false;
        assert!(validate_tls_settings(&settings).is_ok());
    }

    #[test]
    fn unknown_log_format() {
        let mut config = AppConfig::default();
        config.observability.log_format = "xml".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.log_format");
    }

    #[test]
    fn log_format_is_case_insensitive() {
        let mut config = AppConfig::default();
        for format in ["JSON", "Pretty", "json"] {
            config.observability.log_format = format.into();
            assert!(validate_config(&config).is_ok(), "format {format}");
        }
    }
}
