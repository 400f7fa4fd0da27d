//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors and into the RPC server) and re-exports all handler functions
//! for building the router.

pub mod health;
pub mod ingest;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use ingest::{action_handler, event_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};
use crate::service::{CallContext, Gateway};

/// Shared state passed to every front-end handler.
///
/// Holds `Arc` references so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Event and action routers.
    pub gateway: Arc<Gateway>,
    /// Live RPC connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Gateway start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(gateway: Arc<Gateway>, shutdown: Arc<ShutdownController>, config: NetworkConfig) -> Self {
        Self {
            gateway,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Returns a fresh call context bounded by the configured request timeout.
    #[must_use]
    pub fn call_context(&self) -> CallContext {
        CallContext::with_timeout(self.config.request_timeout)
    }
}
