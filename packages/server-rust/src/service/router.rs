//! Request routing: selects the processor multiplexer for a request by type.
//!
//! The route table and the multiplexer map are built once at startup and
//! never mutated while serving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use eventmux_core::{ActionType, EventType, Family, Request, RequestKind, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use super::call::{CallContext, MuxError, Outcome};
use super::multiplexer::{MuxState, Multiplexer};

// ---------------------------------------------------------------------------
// ProcessorId
// ---------------------------------------------------------------------------

/// Identifies a backend processor. Also its dial address (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProcessorId(String);

impl ProcessorId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RouteError
// ---------------------------------------------------------------------------

/// Errors returned by [`Router::route`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("no route for {family} type {kind}")]
    UnknownType { family: Family, kind: String },

    #[error("processor {processor} is unavailable")]
    ProcessorUnavailable { processor: ProcessorId },

    #[error(transparent)]
    Processor(#[from] MuxError),
}

impl RouteError {
    /// Maps the error onto the RPC status vocabulary.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::InvalidArgument,
            Self::UnknownType { .. } => StatusCode::NotFound,
            Self::ProcessorUnavailable { .. } => StatusCode::Unimplemented,
            Self::Processor(MuxError::Overloaded { .. }) => StatusCode::ResourceExhausted,
            Self::Processor(MuxError::Closed | MuxError::StreamFailure { .. }) => {
                StatusCode::Unavailable
            }
            Self::Processor(MuxError::SendFailure { .. }) => StatusCode::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Immutable mapping of request type to processor id.
#[derive(Debug, Clone)]
pub struct RouteTable<K> {
    routes: HashMap<K, ProcessorId>,
}

impl<K: RequestKind> RouteTable<K> {
    #[must_use]
    pub fn new(routes: HashMap<K, ProcessorId>) -> Self {
        Self { routes }
    }

    /// Returns the processor responsible for `kind`, if any.
    #[must_use]
    pub fn lookup(&self, kind: K) -> Option<&ProcessorId> {
        self.routes.get(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Processor state as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorState {
    pub processor: ProcessorId,
    pub state: &'static str,
    pub pending: usize,
}

/// Routes requests of one family to the multiplexer of their processor.
pub struct Router<K: RequestKind> {
    table: RouteTable<K>,
    processors: HashMap<ProcessorId, Arc<Multiplexer<K>>>,
}

impl<K: RequestKind> Router<K> {
    /// Creates a router from a fixed route table and the multiplexers
    /// established for it. A route whose processor has no multiplexer is
    /// kept; requests on it fail with `ProcessorUnavailable`.
    #[must_use]
    pub fn new(table: RouteTable<K>, processors: HashMap<ProcessorId, Arc<Multiplexer<K>>>) -> Self {
        Self { table, processors }
    }

    /// Forwards `request` to its processor and maps the outcome to a response.
    ///
    /// Consumed, timed-out and cancelled calls all yield `Response::Consumed`.
    ///
    /// # Errors
    ///
    /// - `RouteError::InvalidRequest` if `request` is absent.
    /// - `RouteError::UnknownType` if the type has no route.
    /// - `RouteError::ProcessorUnavailable` if the routed processor has no multiplexer.
    /// - `RouteError::Processor` if the multiplexer fails the call.
    pub async fn route(
        &self,
        ctx: &CallContext,
        request: Option<Request<K>>,
    ) -> Result<Response, RouteError> {
        let request = request.ok_or_else(|| RouteError::InvalidRequest {
            reason: "request is missing".to_string(),
        })?;

        let processor = self
            .table
            .lookup(request.kind)
            .ok_or_else(|| RouteError::UnknownType {
                family: K::FAMILY,
                kind: request.kind.to_string(),
            })?;

        let mux = self
            .processors
            .get(processor)
            .ok_or_else(|| RouteError::ProcessorUnavailable {
                processor: processor.clone(),
            })?;

        let kind = request.kind;
        let outcome = mux.submit(ctx, request).await?;
        debug!(family = %K::FAMILY, %kind, %processor, outcome = outcome.as_str(), "routed request");

        Ok(match outcome {
            Outcome::Content(bytes) => Response::Content(bytes),
            Outcome::Consumed | Outcome::TimedOut | Outcome::Cancelled => Response::Consumed,
        })
    }

    /// Returns the state of every known processor, sorted by id.
    #[must_use]
    pub fn processor_states(&self) -> Vec<ProcessorState> {
        let mut states: Vec<ProcessorState> = self
            .processors
            .iter()
            .map(|(id, mux)| ProcessorState {
                processor: id.clone(),
                state: mux.state().as_str(),
                pending: mux.pending_count(),
            })
            .collect();
        states.sort_by(|a, b| a.processor.cmp(&b.processor));
        states
    }

    /// Returns `true` if every multiplexer is open.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.processors
            .values()
            .all(|mux| mux.state() == MuxState::Open)
    }

    /// Closes every multiplexer. Idempotent.
    pub async fn shutdown(&self) {
        for mux in self.processors.values() {
            mux.close().await;
        }
        info!(family = %K::FAMILY, processors = self.processors.len(), "router shut down");
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Both family routers, shared by every front adapter.
pub struct Gateway {
    pub events: Router<EventType>,
    pub actions: Router<ActionType>,
}

impl Gateway {
    #[must_use]
    pub fn new(events: Router<EventType>, actions: Router<ActionType>) -> Self {
        Self { events, actions }
    }

    /// Closes every multiplexer of both families.
    pub async fn shutdown(&self) {
        self.events.shutdown().await;
        self.actions.shutdown().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
