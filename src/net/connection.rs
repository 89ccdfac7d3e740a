//! Open-connection bookkeeping for the demo server.
//!
//! Every accepted socket gets a [`ConnectionGuard`]; the tracker counts the
//! live guards and lets shutdown wait for the count to reach zero.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    active: AtomicU64,
    idle: Notify,
}

/// Counts open connections so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection from `peer`. It stays open until the guard drops.
    pub fn track(&self, peer: SocketAddr) -> ConnectionGuard {
        self.counts.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id: ConnectionId::next(),
            peer,
            opened: Instant::now(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.active.load(Ordering::SeqCst)
    }

    /// Wait for every connection to close, up to `timeout`.
    ///
    /// Returns `false` if connections were still open when time ran out.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.counts.idle.notified();
                if self.active_count() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// One open connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: ConnectionId,
    peer: SocketAddr,
    opened: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.counts.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counts.idle.notify_waiters();
        }
        tracing::trace!(
            connection_id = %self.id,
            peer_addr = %self.peer,
            open_ms = self.opened.elapsed().as_millis() as u64,
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn ids_are_distinct() {
        let tracker = ConnectionTracker::new();
        let a = tracker.track(peer());
        let b = tracker.track(peer());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.peer(), peer());
    }

    #[test]
    fn guards_are_counted() {
        let tracker = ConnectionTracker::new();
        let first = tracker.track(peer());
        let second = tracker.clone().track(peer());
        assert_eq!(tracker.active_count(), 2);

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        drop(second);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_with_open_connections() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(peer());
        assert!(!tracker.drain(Duration::from_secs(1)).await);

        drop(guard);
        assert!(tracker.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_wakes_when_last_connection_closes() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(peer());

        let closer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            drop(guard);
        });
        assert!(tracker.drain(Duration::from_secs(5)).await);
        closer.await.unwrap();
    }
}
