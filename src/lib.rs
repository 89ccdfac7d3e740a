//! Hot-reloadable TLS for servers and clients.
//!
//! Certificates, keys and CA bundles are read from disk into an immutable
//! bundle, published atomically, and re-read when the files change. Server
//! handshakes and client dials always use the bundle current at that moment.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod probe;
pub mod tls;

#[cfg(test)]
pub(crate) mod testdata;

pub use config::{AppConfig, TlsSettings};
pub use lifecycle::Shutdown;
pub use tls::{
    build_client_transport_config, build_server_transport_config, Reloader, TlsContext, TlsError,
};
