//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → tls::ServerTlsAcceptor (skipped in insecure mode)
//!     → server.rs (hyper-util auto: HTTP/1.1 or HTTP/2)
//!     → axum Router: /, /healthz, /tls
//! ```

pub mod server;

pub use server::{router, AppState, HttpServer, PeerInfo};
