//! RPC connection tracking.
//!
//! Each RPC client connection gets a bounded mpsc channel for its replies,
//! drained by a single writer task, and a cancellation token the registry
//! uses to close it during shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use eventmux_core::RpcResponse;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::ConnectionConfig;

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Error returned when queueing a reply to a connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("reply queue stayed full past the send timeout")]
    Timeout,
    #[error("connection closed")]
    Disconnected,
}

/// Handle to one RPC connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    /// Sender end of the bounded reply channel.
    pub tx: mpsc::Sender<RpcResponse>,
    connected_at: Instant,
    /// Cancelled when the gateway closes the connection.
    pub closed: CancellationToken,
    calls: AtomicU64,
}

impl ConnectionHandle {
    /// Queues a reply, waiting at most `timeout` for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns `SendError::Timeout` if the channel stays full, and
    /// `SendError::Disconnected` if the writer has gone away.
    pub async fn send_timeout(&self, reply: RpcResponse, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(reply)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Time since the connection was registered.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Records one received call and returns the new total.
    pub fn record_call(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Thread-safe registry of live RPC connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection, returning its handle and the reply receiver.
    ///
    /// The receiver belongs to the connection's writer task.
    pub fn register(
        &self,
        peer: SocketAddr,
        config: &ConnectionConfig,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<RpcResponse>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity.max(1));

        let handle = Arc::new(ConnectionHandle {
            id,
            peer,
            tx,
            connected_at: Instant::now(),
            closed: CancellationToken::new(),
            calls: AtomicU64::new(0),
        });

        self.connections.insert(id, Arc::clone(&handle));
        (handle, rx)
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Removes every connection and signals each to close. Used during shutdown.
    pub fn close_all(&self) -> usize {
        let keys: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();

        let mut closed = 0;
        for key in keys {
            if let Some((_, handle)) = self.connections.remove(&key) {
                handle.closed.cancel();
                closed += 1;
            }
        }
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use eventmux_core::RpcResult;

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn reply(call_id: u64) -> RpcResponse {
        RpcResponse {
            call_id,
            result: RpcResult::Consumed,
        }
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let registry = ConnectionRegistry::new();
        let config = ConnectionConfig::default();

        let (first, _rx1) = registry.register(peer(), &config);
        let (second, _rx2) = registry.register(peer(), &config);
        assert_eq!(first.id, ConnectionId(1));
        assert_eq!(second.id, ConnectionId(2));
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(peer(), &ConnectionConfig::default());

        assert!(registry.remove(handle.id).is_some());
        assert!(registry.remove(handle.id).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn close_all_cancels_every_connection() {
        let registry = ConnectionRegistry::new();
        let config = ConnectionConfig::default();
        let (a, _rx1) = registry.register(peer(), &config);
        let (b, _rx2) = registry.register(peer(), &config);

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.count(), 0);
        assert!(a.closed.is_cancelled());
        assert!(b.closed.is_cancelled());
    }

    #[test]
    fn calls_are_counted() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(peer(), &ConnectionConfig::default());
        assert_eq!(handle.record_call(), 1);
        assert_eq!(handle.record_call(), 2);
        assert_eq!(handle.call_count(), 2);
    }

    #[tokio::test]
    async fn send_timeout_reports_disconnect() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = registry.register(peer(), &ConnectionConfig::default());

        drop(rx);
        let result = handle.send_timeout(reply(1), Duration::from_secs(1)).await;
        assert_eq!(result, Err(SendError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn age_counts_from_registration() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(peer(), &ConnectionConfig::default());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(handle.age() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_when_queue_stays_full() {
        let registry = ConnectionRegistry::new();
        let config = ConnectionConfig {
            outbound_channel_capacity: 1,
            ..ConnectionConfig::default()
        };
        let (handle, mut rx) = registry.register(peer(), &config);

        handle.send_timeout(reply(1), Duration::from_millis(10)).await.unwrap();
        let result = handle.send_timeout(reply(2), Duration::from_millis(10)).await;
        assert_eq!(result, Err(SendError::Timeout));
        assert_eq!(rx.recv().await.unwrap().call_id, 1);
    }
}
