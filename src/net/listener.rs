//! Bounded TCP listener for the demo server.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limit was closed; no more connections will be accepted.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind(e) | ListenerError::Accept(e) => Some(e),
            ListenerError::Closed => None,
        }
    }
}

/// TCP listener that holds at most `max_connections` sockets open.
///
/// Once the limit is reached, `accept` stops taking connections off the
/// backlog until a [`ConnectionSlot`] is dropped.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then for the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionSlot), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.slots.available_permits(),
            "Connection accepted"
        );
        Ok((stream, peer, ConnectionSlot { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// An occupied connection slot, freed on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}
