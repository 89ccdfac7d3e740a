//! OS signal handling.
//!
//! # Responsibilities
//! - SIGINT / SIGTERM trigger graceful shutdown
//! - SIGHUP forces an immediate reload of the TLS material
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failed forced reload is logged; the published material stays in force

use std::sync::Arc;

use crate::lifecycle::Shutdown;
use crate::tls::Reloader;

/// Wait for SIGINT or SIGTERM, then trigger `shutdown`.
pub async fn shutdown_on_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    shutdown.trigger();
}

/// Reload `reloader` on every SIGHUP until `shutdown` fires.
#[cfg(unix)]
pub async fn reload_on_hangup(reloader: Arc<Reloader>, shutdown: Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP, forced reloads disabled");
            return;
        }
    };
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            received = hangups.recv() => {
                if received.is_none() {
                    break;
                }
                let reloader = Arc::clone(&reloader);
                match tokio::task::spawn_blocking(move || reloader.reload()).await {
                    Ok(Ok(generation)) => tracing::info!(generation, "TLS material reloaded on SIGHUP"),
                    Ok(Err(e)) => tracing::error!(
                        kind = ?e.kind(),
                        path = ?e.path(),
                        error = %e,
                        "Forced TLS reload failed, keeping previous material"
                    ),
                    Err(e) => tracing::error!(error = %e, "Forced TLS reload task failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn reload_on_hangup(_reloader: Arc<Reloader>, _shutdown: Shutdown) {}
