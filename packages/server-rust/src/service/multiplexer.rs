//! Stream multiplexer: many concurrent callers over one processor stream.
//!
//! A `Multiplexer` owns both halves of a duplex processor stream. Callers
//! submit requests concurrently; each one gets a fresh correlation id, a
//! pending entry in the [`PendingCache`], and a oneshot receiver to wait on.
//!
//! Three tasks run for the multiplexer's open lifetime:
//! 1. **Writer** -- the only task that touches the sink. Fed by a bounded
//!    queue, so a saturated stream pushes back on submitting callers.
//! 2. **Reader** -- the only task that reads the stream and the only path
//!    that delivers responses. A oneshot send never waits on the receiver,
//!    so a slow or departed caller cannot stall the next read.
//! 3. **Sweeper** -- expires pending entries nobody claimed.
//!
//! A read error, end of stream, or an explicit [`Multiplexer::close`]
//! moves the multiplexer to `Closed`. Whichever gets there first fails every
//! pending entry; the other is a no-op.

use std::fmt;
use std::pin::pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use eventmux_core::{CorrelationEnvelope, Request, RequestKind, ResponseEnvelope};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cache::{CacheError, PendingCache};
use super::call::{CallContext, Delivery, MuxError, Outcome};
use super::config::MultiplexerConfig;
use super::router::ProcessorId;
use super::worker::{BackgroundWorker, CacheSweeper};

/// Upper bound on flushing the sink when the outbound queue ends.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle state of a multiplexer. There is no way back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Open,
    Closed,
}

impl MuxState {
    /// Returns a lowercase label for health output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A queued outbound frame and the channel that reports its write result.
struct Outbound<K> {
    envelope: CorrelationEnvelope<K>,
    ack: oneshot::Sender<Result<(), String>>,
}

/// State shared between the handle and its background tasks.
struct Shared {
    processor: ProcessorId,
    pending: Arc<PendingCache<Delivery>>,
    /// Set exactly once, by whichever of shutdown or stream failure wins.
    closed: OnceLock<MuxError>,
    shutdown: CancellationToken,
}

impl Shared {
    fn closed_reason(&self) -> Option<&MuxError> {
        self.closed.get()
    }

    /// Transitions to `Closed` and fails all pending entries with `reason`.
    ///
    /// Returns `false` if the multiplexer was already closed.
    fn close(&self, reason: MuxError) -> bool {
        if self.closed.set(reason.clone()).is_err() {
            return false;
        }
        self.shutdown.cancel();

        let handles = self.pending.drain();
        let failed = handles.len();
        for handle in handles {
            let _ = handle.send(Err(reason.clone()));
        }
        info!(
            processor = %self.processor,
            failed,
            reason = %reason,
            "multiplexer closed"
        );
        true
    }

    fn deliver(&self, envelope: ResponseEnvelope) {
        let ResponseEnvelope { id, outcome } = envelope;
        match self.pending.take(&id) {
            Some(handle) => {
                if handle.send(Ok(outcome)).is_err() {
                    debug!(processor = %self.processor, %id, "caller stopped waiting; response discarded");
                } else {
                    debug!(processor = %self.processor, %id, "delivered processor response");
                }
            }
            None => {
                debug!(processor = %self.processor, %id, "discarding orphan response");
                counter!("eventmux_orphan_responses_total", "processor" => self.processor.to_string())
                    .increment(1);
            }
        }
    }
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    sweeper: Option<BackgroundWorker>,
}

struct Admission {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// Shares one processor stream among many concurrent request/response exchanges.
pub struct Multiplexer<K: RequestKind> {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound<K>>,
    admission: Option<Admission>,
    tasks: Mutex<Tasks>,
}

impl<K: RequestKind> Multiplexer<K> {
    /// Takes ownership of a processor stream and starts serving it.
    ///
    /// `sink` receives outbound correlation envelopes; `stream` yields
    /// inbound response envelopes. Must be called inside a tokio runtime.
    pub fn spawn<W, WE, R, RE>(
        processor: ProcessorId,
        sink: W,
        stream: R,
        config: &MultiplexerConfig,
    ) -> Self
    where
        W: Sink<CorrelationEnvelope<K>, Error = WE> + Send + 'static,
        WE: fmt::Display + Send + 'static,
        R: Stream<Item = Result<ResponseEnvelope, RE>> + Send + 'static,
        RE: fmt::Display + Send + 'static,
    {
        let pending = Arc::new(PendingCache::new(config.default_ttl));
        let shared = Arc::new(Shared {
            processor: processor.clone(),
            pending: Arc::clone(&pending),
            closed: OnceLock::new(),
            shutdown: CancellationToken::new(),
        });

        let (outbound, queue) = mpsc::channel(config.send_queue_capacity.max(1));
        let writer = tokio::spawn(write_loop(Arc::clone(&shared), sink, queue));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), stream));
        let sweeper = BackgroundWorker::start(
            CacheSweeper::new(pending, processor.to_string()),
            config.sweep_interval,
        );

        let admission = config.max_in_flight.map(|limit| Admission {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        });

        info!(processor = %processor, family = %K::FAMILY, "multiplexer open");

        Self {
            shared,
            outbound,
            admission,
            tasks: Mutex::new(Tasks {
                reader: Some(reader),
                writer: Some(writer),
                sweeper: Some(sweeper),
            }),
        }
    }

    /// Returns the id of the processor this multiplexer is bound to.
    #[must_use]
    pub fn processor_id(&self) -> &ProcessorId {
        &self.shared.processor
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MuxState {
        if self.shared.closed_reason().is_some() {
            MuxState::Closed
        } else {
            MuxState::Open
        }
    }

    /// Returns the number of pending entries, including expired ones not yet swept.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Sends `request` to the processor and waits for its response.
    ///
    /// Waiting ends when the response arrives, the context is cancelled, or
    /// the deadline (or the default ttl) passes. Cancellation and timeout
    /// are outcomes, not errors; the request is not retracted from the
    /// processor, and a late response is discarded by the receive path.
    ///
    /// # Errors
    ///
    /// - `MuxError::Closed` / `MuxError::StreamFailure` if the multiplexer is
    ///   closed, or closes while the call is pending.
    /// - `MuxError::SendFailure` if the frame could not be written. The
    ///   request is not retried.
    /// - `MuxError::Overloaded` if the admission limit is reached.
    pub async fn submit(&self, ctx: &CallContext, request: Request<K>) -> Result<Outcome, MuxError> {
        let result = self.exchange(ctx, request).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(err) => err.as_str(),
        };
        counter!(
            "eventmux_submit_total",
            "family" => K::FAMILY.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn exchange(&self, ctx: &CallContext, request: Request<K>) -> Result<Outcome, MuxError> {
        if let Some(reason) = self.shared.closed_reason() {
            return Err(reason.clone());
        }
        if ctx.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let _permit = self.admit()?;

        let ttl = self.shared.pending.ttl_for(ctx.deadline());
        if ttl.is_zero() {
            return Ok(Outcome::TimedOut);
        }
        let (id, rx, expires_at) = loop {
            let id = Uuid::new_v4().to_string();
            let (tx, rx) = oneshot::channel::<Delivery>();
            match self.shared.pending.insert(id.clone(), tx, ttl) {
                Ok(expires_at) => break (id, rx, expires_at),
                Err(CacheError::Occupied { id }) => {
                    warn!(processor = %self.shared.processor, %id, "correlation id collision, regenerating");
                }
            }
        };

        // A close that drained the cache before our insert would miss it.
        if let Some(reason) = self.shared.closed_reason() {
            drop(self.shared.pending.take(&id));
            return Err(reason.clone());
        }

        let envelope = CorrelationEnvelope {
            id: id.clone(),
            request,
        };

        let wait = async {
            if let Err(reason) = self.enqueue(envelope).await {
                error!(processor = %self.shared.processor, %id, %reason, "failed to send request to processor");
                if self.shared.pending.take(&id).is_some() {
                    return Err(MuxError::SendFailure { reason });
                }
                // Already finalized by shutdown or a stream failure.
                return match rx.await {
                    Ok(delivery) => delivery.map(Outcome::from),
                    Err(_) => Err(MuxError::SendFailure { reason }),
                };
            }
            debug!(processor = %self.shared.processor, %id, "sent request to processor");

            match rx.await {
                Ok(delivery) => delivery.map(Outcome::from),
                // The handle was dropped unanswered: the entry expired.
                Err(_) => Ok(Outcome::TimedOut),
            }
        };

        tokio::select! {
            biased;
            () = ctx.cancelled() => {
                debug!(processor = %self.shared.processor, %id, "caller cancelled");
                Ok(Outcome::Cancelled)
            }
            result = wait => result,
            () = tokio::time::sleep_until(expires_at) => {
                debug!(processor = %self.shared.processor, %id, "request timed out");
                Ok(Outcome::TimedOut)
            }
        }
    }

    fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, MuxError> {
        let Some(admission) = &self.admission else {
            return Ok(None);
        };
        Arc::clone(&admission.semaphore)
            .try_acquire_owned()
            .map(Some)
            .map_err(|_| MuxError::Overloaded {
                limit: admission.limit,
            })
    }

    async fn enqueue(&self, envelope: CorrelationEnvelope<K>) -> Result<(), String> {
        let (ack, written) = oneshot::channel();
        self.outbound
            .send(Outbound { envelope, ack })
            .await
            .map_err(|_| "stream writer stopped".to_string())?;
        written
            .await
            .map_err(|_| "stream writer stopped".to_string())?
    }

    /// Closes the multiplexer and releases the stream.
    ///
    /// New submits are rejected, pending ones fail with `MuxError::Closed`,
    /// and the background tasks are stopped and awaited. Safe to call more
    /// than once and concurrently with a stream failure.
    pub async fn close(&self) {
        self.shared.close(MuxError::Closed);

        let (reader, writer, sweeper) = {
            let mut tasks = self.tasks.lock();
            (
                tasks.reader.take(),
                tasks.writer.take(),
                tasks.sweeper.take(),
            )
        };
        if let Some(mut sweeper) = sweeper {
            sweeper.stop().await;
        }
        // A write stalled on a processor that stopped reading never completes.
        if let Some(writer) = writer {
            writer.abort();
            let _ = writer.await;
        }
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }
}

impl<K: RequestKind> Drop for Multiplexer<K> {
    fn drop(&mut self) {
        self.shared.close(MuxError::Closed);
    }
}

impl<K: RequestKind> fmt::Debug for Multiplexer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("processor", &self.shared.processor)
            .field("family", &K::FAMILY)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

async fn write_loop<K, W, E>(shared: Arc<Shared>, sink: W, mut queue: mpsc::Receiver<Outbound<K>>)
where
    W: Sink<CorrelationEnvelope<K>, Error = E>,
    E: fmt::Display,
{
    let mut sink = pin!(sink);
    loop {
        let next = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            next = queue.recv() => next,
        };
        let Some(Outbound { envelope, ack }) = next else {
            break;
        };

        let result = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            result = sink.send(envelope) => result.map_err(|e| e.to_string()),
        };
        let _ = ack.send(result);
    }

    // After shutdown the sink is dropped unflushed: flushing could wait on
    // the same frame that stalled.
    if !shared.shutdown.is_cancelled() {
        match tokio::time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(processor = %shared.processor, error = %e, "error closing processor sink"),
            Err(_) => debug!(processor = %shared.processor, "timed out closing processor sink"),
        }
    }
    debug!(processor = %shared.processor, "stream writer stopped");
}

async fn read_loop<R, E>(shared: Arc<Shared>, stream: R)
where
    R: Stream<Item = Result<ResponseEnvelope, E>>,
    E: fmt::Display,
{
    let mut stream = pin!(stream);
    loop {
        let frame = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(envelope)) => shared.deliver(envelope),
            Some(Err(e)) => {
                error!(processor = %shared.processor, error = %e, "failed to read from processor stream");
                counter!("eventmux_stream_failures_total", "processor" => shared.processor.to_string())
                    .increment(1);
                shared.close(MuxError::StreamFailure {
                    reason: e.to_string(),
                });
                break;
            }
            None => {
                warn!(processor = %shared.processor, "processor stream ended");
                counter!("eventmux_stream_failures_total", "processor" => shared.processor.to_string())
                    .increment(1);
                shared.close(MuxError::StreamFailure {
                    reason: "stream ended by processor".to_string(),
                });
                break;
            }
        }
    }
    debug!(processor = %shared.processor, "stream reader stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
