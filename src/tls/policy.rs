//! Protocol version floor and client authentication policy.

use std::fmt;
use std::str::FromStr;

use rustls::SupportedProtocolVersion;
use serde::Serialize;

use crate::tls::error::TlsError;

/// Lowest TLS protocol version a bundle will negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    Tls12,
    #[default]
    Tls13,
}

impl ProtocolVersion {
    /// rustls protocol versions enabled by this floor, newest first.
    pub fn supported_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
        static TLS12_AND_UP: &[&SupportedProtocolVersion] =
            &[&rustls::version::TLS13, &rustls::version::TLS12];

        match self {
            ProtocolVersion::Tls12 => TLS12_AND_UP,
            ProtocolVersion::Tls13 => TLS13_ONLY,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Tls12 => f.write_str("tls12"),
            ProtocolVersion::Tls13 => f.write_str("tls13"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_protocol_version(s)
    }
}

/// Parse a minimum protocol version string.
///
/// An empty value selects TLS 1.3.
pub fn parse_protocol_version(value: &str) -> Result<ProtocolVersion, TlsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "tls13" => Ok(ProtocolVersion::Tls13),
        "tls12" => Ok(ProtocolVersion::Tls12),
        _ => Err(TlsError::UnsupportedProtocolVersion(value.to_string())),
    }
}

/// How strictly the server side asks for a client certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClientAuthPolicy {
    /// Never ask for a client certificate.
    #[default]
    None,
    /// Ask for a certificate, accept the connection without one, do not verify.
    Request,
    /// Require a certificate, do not verify it.
    RequireAny,
    /// Verify a certificate if the client sends one.
    VerifyIfGiven,
    /// Require a certificate and verify it against the client CA pool.
    RequireAndVerify,
}

impl ClientAuthPolicy {
    /// Whether the server asks the client for a certificate at all.
    pub fn requests_certificate(self) -> bool {
        !matches!(self, ClientAuthPolicy::None)
    }

    /// Whether a client without a certificate is turned away.
    pub fn is_mandatory(self) -> bool {
        matches!(self, ClientAuthPolicy::RequireAny | ClientAuthPolicy::RequireAndVerify)
    }

    /// Whether a presented certificate is checked against the client CA pool.
    pub fn verifies(self) -> bool {
        matches!(self, ClientAuthPolicy::VerifyIfGiven | ClientAuthPolicy::RequireAndVerify)
    }

    /// Configuration spelling of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientAuthPolicy::None => "none",
            ClientAuthPolicy::Request => "request",
            ClientAuthPolicy::RequireAny => "require",
            ClientAuthPolicy::VerifyIfGiven => "verify-if-given",
            ClientAuthPolicy::RequireAndVerify => "require-and-verify",
        }
    }
}

impl fmt::Display for ClientAuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuthPolicy {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_client_auth_mode(s)
    }
}

/// Parse a client-auth mode string, case-insensitively.
///
/// An empty value selects [`ClientAuthPolicy::None`].
pub fn parse_client_auth_mode(value: &str) -> Result<ClientAuthPolicy, TlsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(ClientAuthPolicy::None),
        "request" => Ok(ClientAuthPolicy::Request),
        "require" => Ok(ClientAuthPolicy::RequireAny),
        "verify-if-given" => Ok(ClientAuthPolicy::VerifyIfGiven),
        "require-and-verify" => Ok(ClientAuthPolicy::RequireAndVerify),
        _ => Err(TlsError::UnknownClientAuthMode(value.to_string())),
    }
}
