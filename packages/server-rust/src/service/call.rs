//! Per-call context, outcomes, and multiplexer errors.

use std::time::Duration;

use eventmux_core::Response;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-side context for a single submit.
///
/// The deadline bounds how long the caller waits and how long the pending
/// entry lives. Cancelling the token only stops the caller from waiting; the
/// request stays with the processor and in the pending cache.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// A context with no deadline and no cancellation source.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::default().with_deadline(Instant::now() + timeout)
    }

    /// Sets the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Non-error result of a submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The processor answered with content.
    Content(Vec<u8>),
    /// The processor consumed the request without content.
    Consumed,
    /// The caller's context was cancelled before a response arrived.
    Cancelled,
    /// The deadline or the pending entry's expiry fired first.
    TimedOut,
}

impl Outcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Consumed => "consumed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl From<Response> for Outcome {
    fn from(resp: Response) -> Self {
        match resp {
            Response::Content(bytes) => Self::Content(bytes),
            Response::Consumed => Self::Consumed,
        }
    }
}

/// Errors returned by `Multiplexer::submit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    #[error("failed to send request to processor: {reason}")]
    SendFailure { reason: String },
    #[error("processor stream failed: {reason}")]
    StreamFailure { reason: String },
    #[error("multiplexer is closed")]
    Closed,
    #[error("too many pending requests (limit {limit})")]
    Overloaded { limit: usize },
}

impl MuxError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendFailure { .. } => "send_failure",
            Self::StreamFailure { .. } => "stream_failure",
            Self::Closed => "closed",
            Self::Overloaded { .. } => "overloaded",
        }
    }
}

/// What the receive path (or shutdown) hands to a waiting submit.
pub(crate) type Delivery = Result<Response, MuxError>;
