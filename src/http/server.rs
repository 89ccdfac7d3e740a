//! HTTPS demo server.
//!
//! # Responsibilities
//! - Accept TCP connections through the bounded listener
//! - Run the TLS handshake with the bundle current at accept time
//! - Serve HTTP/1.1 and HTTP/2 per connection via hyper-util
//! - Report the peer's TLS details and the published bundle
//! - Drain open connections on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::tls::bundle::describe_certificate;
use crate::tls::{Reloader, ServerTlsAcceptor};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Absent when TLS is disabled.
    pub reloader: Option<Arc<Reloader>>,
}

/// What the server learned about the peer during the handshake.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub tls: bool,
    pub protocol_version: Option<String>,
    pub client_subject: Option<String>,
}

impl PeerInfo {
    fn plain(addr: SocketAddr) -> Self {
        Self {
            addr,
            tls: false,
            protocol_version: None,
            client_subject: None,
        }
    }

    fn from_tls(addr: SocketAddr, conn: &rustls::ServerConnection) -> Self {
        Self {
            addr,
            tls: true,
            protocol_version: conn.protocol_version().map(|v| format!("{v:?}")),
            client_subject: conn
                .peer_certificates()
                .and_then(|chain| chain.first())
                .and_then(describe_certificate)
                .map(|(subject, _)| subject),
        }
    }
}

/// Build the router with all handlers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(whoami))
        .route("/healthz", get(healthz))
        .route("/tls", get(tls_summary))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn whoami(Extension(peer): Extension<PeerInfo>) -> Json<PeerInfo> {
    Json(peer)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn tls_summary(State(state): State<AppState>) -> Response {
    match &state.reloader {
        Some(reloader) => Json(reloader.summary()).into_response(),
        None => (StatusCode::NOT_FOUND, "TLS disabled").into_response(),
    }
}

/// HTTPS server over a bounded listener.
pub struct HttpServer {
    listener: Listener,
    acceptor: Option<ServerTlsAcceptor>,
    router: Router,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl HttpServer {
    /// `acceptor` of `None` serves plaintext.
    pub fn new(listener: Listener, acceptor: Option<ServerTlsAcceptor>, drain_timeout: Duration) -> Self {
        let acceptor = acceptor.map(|a| a.with_alpn_protocols([b"h2".as_slice(), b"http/1.1".as_slice()]));
        let state = AppState {
            reloader: acceptor.as_ref().map(|a| Arc::clone(a.reloader())),
        };
        Self {
            listener,
            acceptor,
            router: router(state),
            tracker: ConnectionTracker::new(),
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        let address = self.listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %address,
            tls = self.acceptor.is_some(),
            "HTTP server starting"
        );

        loop {
            let (stream, peer_addr, slot) = tokio::select! {
                _ = stop.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let guard = self.tracker.track(peer_addr);
            let acceptor = self.acceptor.clone();
            let router = self.router.clone();
            let conn_stop = shutdown.subscribe();

            tokio::spawn(async move {
                let _slot = slot;
                let connection_id = guard.id();
                match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls) => {
                            let peer = PeerInfo::from_tls(peer_addr, tls.get_ref().1);
                            tracing::debug!(
                                %connection_id,
                                peer_addr = %peer_addr,
                                client_subject = ?peer.client_subject,
                                "TLS handshake complete"
                            );
                            serve_connection(tls, router, peer, conn_stop).await;
                        }
                        Err(e) => tracing::warn!(
                            %connection_id,
                            peer_addr = %peer_addr,
                            error = %e,
                            "TLS handshake failed"
                        ),
                    },
                    None => serve_connection(stream, router, PeerInfo::plain(peer_addr), conn_stop).await,
                }
                drop(guard);
            });
        }

        tracing::info!(
            active = self.tracker.active_count(),
            "HTTP server draining connections"
        );
        if !self.tracker.drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout elapsed, dropping open connections"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection<IO>(
    io: IO,
    router: Router,
    peer: PeerInfo,
    mut stop: broadcast::Receiver<()>,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(peer.clone());
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = stop.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Connection closed with error");
    }
}
