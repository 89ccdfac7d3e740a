//! Dynamic TLS material subsystem.
//!
//! # Data Flow
//! ```text
//! TlsSettings (paths + policy strings)
//!     → bundle.rs   (read PEM files, check cert/key pair, build trust pools)
//!     → reloader.rs (publish the bundle atomically, newest build wins)
//!     → server.rs   (per-handshake ServerConfig from the current bundle)
//!     → client.rs   (per-dial ClientConfig from the current bundle)
//!
//! watcher.rs: directory events → filter by name → debounce → Reloader::reload
//! ```
//!
//! # Responsibilities
//! - Turn files on disk into one consistent [`CredentialBundle`]
//! - Keep exactly one bundle published and let readers snapshot it lock-free
//! - Notice rotations, including `..data` symlink swaps, and reload once per burst
//! - Hand rustls configs to the accept and dial paths at handshake time
//!
//! # Design Decisions
//! - A bundle is immutable; a reload builds a new one and swaps the pointer
//! - A failed reload never replaces the published bundle
//! - Paths are fixed for the process lifetime; only file contents change
//! - `insecure` bypasses the subsystem before any file is opened

pub mod bundle;
pub mod client;
pub mod error;
pub mod policy;
pub mod reloader;
pub mod server;
pub mod verify;
pub mod watcher;

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use tokio::task::JoinHandle;

use crate::config::TlsSettings;
use crate::lifecycle::Shutdown;

pub use bundle::{build_bundle, BundleSummary, CredentialBundle};
pub use client::{ClientCustomizer, ClientTlsConnector};
pub use error::{ErrorKind, TlsError, TlsResult};
pub use policy::{parse_client_auth_mode, parse_protocol_version, ClientAuthPolicy, ProtocolVersion};
pub use reloader::Reloader;
pub use server::ServerTlsAcceptor;
pub use watcher::{CertWatcher, ReloadReport};

/// Process-wide provider if one is installed, otherwise ring.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

/// A running TLS subsystem: the reloader plus its watcher task.
pub struct TlsContext {
    reloader: Arc<Reloader>,
    watcher: Option<JoinHandle<()>>,
}

impl TlsContext {
    /// Build the initial bundle and, if configured, start watching for changes.
    ///
    /// Returns `Ok(None)` for insecure settings without reading any file.
    /// Must be called inside a Tokio runtime when watching is enabled.
    pub fn start(settings: TlsSettings, shutdown: &Shutdown) -> TlsResult<Option<Self>> {
        if settings.insecure {
            tracing::warn!("TLS disabled, serving plaintext");
            return Ok(None);
        }

        let watch = settings.watch;
        let reloader = Arc::new(Reloader::new(settings)?);
        let watcher = if watch {
            Some(CertWatcher::new(Arc::clone(&reloader)).spawn(shutdown.subscribe())?)
        } else {
            None
        };

        let summary = reloader.summary();
        tracing::info!(
            generation = summary.generation,
            min_version = %summary.min_protocol_version,
            client_auth = %summary.client_auth,
            watch,
            "TLS material loaded"
        );

        Ok(Some(Self { reloader, watcher }))
    }

    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.reloader
    }

    /// Whether a watcher task was started and is still running.
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn server_acceptor(&self) -> ServerTlsAcceptor {
        ServerTlsAcceptor::new(Arc::clone(&self.reloader))
    }

    pub fn client_connector(&self, customize: Option<ClientCustomizer>) -> ClientTlsConnector {
        ClientTlsConnector::new(Arc::clone(&self.reloader), customize)
    }
}

/// Server-side TLS for `settings`, or `None` when TLS is disabled.
pub fn build_server_transport_config(
    settings: TlsSettings,
    shutdown: &Shutdown,
) -> TlsResult<Option<ServerTlsAcceptor>> {
    Ok(TlsContext::start(settings, shutdown)?.map(|ctx| ctx.server_acceptor()))
}

/// Client-side TLS for `settings`, or `None` when TLS is disabled.
///
/// `customize` runs on every client config built, after the bundle has been
/// applied.
pub fn build_client_transport_config(
    settings: TlsSettings,
    shutdown: &Shutdown,
    customize: Option<ClientCustomizer>,
) -> TlsResult<Option<ClientTlsConnector>> {
    Ok(TlsContext::start(settings, shutdown)?.map(|ctx| ctx.client_connector(customize)))
}
