//! Periodic background work.
//!
//! A [`BackgroundWorker`] drives one [`BackgroundRunnable`] on its own task,
//! calling `on_tick` every interval until stopped. Each multiplexer runs a
//! [`CacheSweeper`] this way to expire pending entries that were never
//! answered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cache::PendingCache;

/// Work driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    async fn on_tick(&mut self);

    /// Runs once after the worker stops. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// CacheSweeper
// ---------------------------------------------------------------------------

/// Expires stale entries of a [`PendingCache`].
pub struct CacheSweeper<T> {
    cache: Arc<PendingCache<T>>,
    processor: String,
}

impl<T> CacheSweeper<T> {
    #[must_use]
    pub fn new(cache: Arc<PendingCache<T>>, processor: impl Into<String>) -> Self {
        Self {
            cache,
            processor: processor.into(),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> BackgroundRunnable for CacheSweeper<T> {
    async fn on_tick(&mut self) {
        let expired = self.cache.sweep();
        if expired > 0 {
            debug!(
                processor = %self.processor,
                expired,
                remaining = self.cache.len(),
                "swept expired pending requests"
            );
        }
    }

    async fn shutdown(&mut self) {
        debug!(processor = %self.processor, outstanding = self.cache.len(), "sweeper stopped");
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Owns the task running a [`BackgroundRunnable`].
///
/// The first tick fires one full interval after start. Missed ticks are
/// skipped rather than replayed in a burst.
pub struct BackgroundWorker {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    /// Spawns the worker. Must be called inside a tokio runtime.
    pub fn start<R: BackgroundRunnable>(mut runnable: R, tick: Duration) -> Self {
        let stop = CancellationToken::new();

        let stopped = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + tick, tick);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = stopped.cancelled() => break,
                    _ = ticks.tick() => runnable.on_tick().await,
                }
            }
            runnable.shutdown().await;
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the worker and waits for its task to finish. Idempotent.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
