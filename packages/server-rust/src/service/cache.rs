//! Time-bounded store of pending requests keyed by correlation id.
//!
//! Each entry owns the sending half of a oneshot channel. Removing an entry
//! is the only way to claim it, and `DashMap` removal is atomic per key, so
//! the receive path, the expiry sweep, and shutdown can race freely: whoever
//! removes the entry finalizes it, and nobody else ever sees it again.
//!
//! An entry that expires is finalized by dropping its sender. The waiting
//! caller observes a closed channel, never a value.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Errors returned by [`PendingCache::insert`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("correlation id already pending: {id}")]
    Occupied { id: String },
}

/// Bookkeeping for one request awaiting a response.
#[derive(Debug)]
struct PendingEntry<T> {
    handle: oneshot::Sender<T>,
    created_at: Instant,
    deadline: Instant,
}

/// Concurrent map of correlation id to delivery handle with per-entry expiry.
#[derive(Debug)]
pub struct PendingCache<T> {
    entries: DashMap<String, PendingEntry<T>>,
    default_ttl: Duration,
}

impl<T> PendingCache<T> {
    /// Creates an empty cache applying `default_ttl` to callers without a deadline.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    /// Computes the time-to-live for a caller's optional deadline.
    ///
    /// A deadline that has already passed yields a zero ttl, which expires
    /// the entry immediately. No deadline yields the configured default.
    #[must_use]
    pub fn ttl_for(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.default_ttl,
        }
    }

    /// Registers `handle` under `id`, expiring after `ttl` if unclaimed.
    ///
    /// Returns the entry's deadline.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Occupied` if `id` is already pending. The handle
    /// is dropped in that case.
    pub fn insert(
        &self,
        id: String,
        handle: oneshot::Sender<T>,
        ttl: Duration,
    ) -> Result<Instant, CacheError> {
        let now = Instant::now();
        let deadline = now + ttl;
        match self.entries.entry(id) {
            Entry::Occupied(occupied) => Err(CacheError::Occupied {
                id: occupied.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    handle,
                    created_at: now,
                    deadline,
                });
                Ok(deadline)
            }
        }
    }

    /// Atomically removes and returns the handle registered under `id`.
    ///
    /// Returns `None` if the id is unknown, already claimed, or expired. An
    /// expired entry found here is removed and finalized on the spot.
    pub fn take(&self, id: &str) -> Option<oneshot::Sender<T>> {
        let (_, entry) = self.entries.remove(id)?;
        if entry.deadline <= Instant::now() {
            tracing::trace!(
                id,
                age = ?entry.created_at.elapsed(),
                "pending entry expired before claim"
            );
            return None;
        }
        Some(entry.handle)
    }

    /// Removes every expired entry, finalizing each without a value.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired = 0;
        self.entries.retain(|_, entry| {
            let live = entry.deadline > now;
            if !live {
                expired += 1;
            }
            live
        });
        expired
    }

    /// Removes and returns every live handle. Used when the owning stream closes.
    pub fn drain(&self) -> Vec<oneshot::Sender<T>> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.entries.remove(id))
            .map(|(_, entry)| entry.handle)
            .collect()
    }

    /// Returns the number of entries currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` is currently held.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn take_returns_handle_once() {
        let cache = PendingCache::<u32>::new(TTL);
        let (tx, rx) = oneshot::channel();
        cache.insert("a".to_string(), tx, TTL).unwrap();

        let handle = cache.take("a").expect("entry should be present");
        assert!(cache.take("a").is_none());

        handle.send(7).unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn take_unknown_id_is_none() {
        let cache = PendingCache::<u32>::new(TTL);
        assert!(cache.take("missing").is_none());
    }

    #[tokio::test]
    async fn insert_rejects_live_duplicate() {
        let cache = PendingCache::<u32>::new(TTL);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        cache.insert("dup".to_string(), tx1, TTL).unwrap();

        let err = cache.insert("dup".to_string(), tx2, TTL).unwrap_err();
        assert_eq!(err, CacheError::Occupied { id: "dup".to_string() });
        // The rejected handle was dropped, never stored.
        assert!(rx2.await.is_err());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_from_deadline() {
        let cache = PendingCache::<u32>::new(TTL);
        assert_eq!(cache.ttl_for(None), TTL);

        let future = Instant::now() + Duration::from_millis(250);
        assert_eq!(cache.ttl_for(Some(future)), Duration::from_millis(250));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.ttl_for(Some(future)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_expires_immediately() {
        let cache = PendingCache::<u32>::new(TTL);
        let (tx, rx) = oneshot::channel();
        cache.insert("now".to_string(), tx, Duration::ZERO).unwrap();

        assert!(cache.take("now").is_none());
        assert!(cache.is_empty());
        assert!(rx.await.is_err(), "expired entry must close without a value");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_finalizes_only_expired_entries() {
        let cache = PendingCache::<u32>::new(TTL);
        let (short_tx, short_rx) = oneshot::channel();
        let (long_tx, _long_rx) = oneshot::channel();
        cache
            .insert("short".to_string(), short_tx, Duration::from_millis(100))
            .unwrap();
        cache
            .insert("long".to_string(), long_tx, Duration::from_secs(10))
            .unwrap();

        assert_eq!(cache.sweep(), 0);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.sweep(), 1);

        assert!(short_rx.await.is_err());
        assert!(!cache.contains("short"));
        assert!(cache.take("long").is_some());
    }

    #[tokio::test]
    async fn drain_returns_all_handles() {
        let cache = PendingCache::<&'static str>::new(TTL);
        let mut receivers = Vec::new();
        for i in 0..5 {
            let (tx, rx) = oneshot::channel();
            cache.insert(format!("id-{i}"), tx, TTL).unwrap();
            receivers.push(rx);
        }

        let handles = cache.drain();
        assert_eq!(handles.len(), 5);
        assert!(cache.is_empty());

        for handle in handles {
            handle.send("closed").unwrap();
        }
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), "closed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_take_and_sweep_claim_once() {
        let cache = Arc::new(PendingCache::<u32>::new(TTL));
        let mut receivers = Vec::new();
        for i in 0..200 {
            let (tx, rx) = oneshot::channel();
            // Half of the entries are already expired.
            let ttl = if i % 2 == 0 { Duration::ZERO } else { TTL };
            cache.insert(i.to_string(), tx, ttl).unwrap();
            receivers.push(rx);
        }

        let sweeper = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.sweep() })
        };
        let mut takers = Vec::new();
        for _ in 0..2 {
            let cache = Arc::clone(&cache);
            takers.push(tokio::spawn(async move {
                let mut claimed = 0u32;
                for i in 0..200u32 {
                    if let Some(handle) = cache.take(&i.to_string()) {
                        handle.send(i).unwrap();
                        claimed += 1;
                    }
                }
                claimed
            }));
        }

        sweeper.await.unwrap();
        let mut claimed = 0;
        for taker in takers {
            claimed += taker.await.unwrap();
        }

        // Only the 100 live entries can be claimed, each exactly once.
        assert_eq!(claimed, 100);
        assert!(cache.is_empty());
        for (i, rx) in receivers.into_iter().enumerate() {
            match rx.await {
                Ok(v) => assert_eq!(v as usize, i),
                Err(_) => assert_eq!(i % 2, 0),
            }
        }
    }
}
