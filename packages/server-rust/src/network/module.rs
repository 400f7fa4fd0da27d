//! Front-end lifecycle with deferred startup.
//!
//! `new()` takes the gateway, `start()` binds both listeners, and `serve()`
//! runs the HTTP and RPC front ends until shutdown. Binding before serving
//! lets callers learn OS-assigned ports first.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    action_handler, event_handler, health_handler, liveness_handler, readiness_handler, AppState,
};
use super::middleware::with_http_layers;
use super::rpc::serve_rpc;
use super::shutdown::ShutdownController;
use crate::service::Gateway;

/// Ports actually bound by [`NetworkModule::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundPorts {
    pub http: u16,
    pub rpc: u16,
}

/// Owns the gateway's listeners and serves both front ends.
pub struct NetworkModule {
    config: NetworkConfig,
    gateway: Arc<Gateway>,
    http_listener: Option<TcpListener>,
    rpc_listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, gateway: Arc<Gateway>) -> Self {
        Self {
            config,
            gateway,
            http_listener: None,
            rpc_listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// - `POST /event`, `POST /action` -- JSON ingest
    /// - `GET /health`, `/health/live`, `/health/ready` -- probes
    pub fn build_router(state: AppState) -> Router {
        let routes = Router::new()
            .route("/event", post(event_handler))
            .route("/action", post(action_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(DefaultBodyLimit::max(state.config.max_body_bytes));

        with_http_layers(routes, &state.config).with_state(state)
    }

    /// Binds the HTTP and RPC listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<BoundPorts> {
        let http_addr = format!("{}:{}", self.config.host, self.config.http_port);
        let http = TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("failed to bind http listener on {http_addr}"))?;
        let rpc_addr = format!("{}:{}", self.config.host, self.config.rpc_port);
        let rpc = TcpListener::bind(&rpc_addr)
            .await
            .with_context(|| format!("failed to bind rpc listener on {rpc_addr}"))?;

        let ports = BoundPorts {
            http: http.local_addr()?.port(),
            rpc: rpc.local_addr()?.port(),
        };
        info!(host = %self.config.host, http_port = ports.http, rpc_port = ports.rpc, "listeners bound");

        self.http_listener = Some(http);
        self.rpc_listener = Some(rpc);
        Ok(ports)
    }

    /// Serves both front ends until `shutdown` completes.
    ///
    /// After the signal: health moves to Draining, both listeners stop
    /// accepting, RPC connections are closed, in-flight calls get up to
    /// `drain_timeout` to finish, and finally every multiplexer is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, or if a server fails.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let (Some(http_listener), Some(rpc_listener)) = (self.http_listener, self.rpc_listener)
        else {
            anyhow::bail!("start() must be called before serve()");
        };
        let ctrl = self.shutdown;
        let gateway = self.gateway;
        let drain_timeout = self.config.drain_timeout;

        let state = AppState::new(Arc::clone(&gateway), Arc::clone(&ctrl), self.config);
        let router = Self::build_router(state.clone());

        ctrl.set_ready();
        {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move {
                shutdown.await;
                info!("shutdown signal received");
                ctrl.trigger_shutdown();
            });
        }

        let http_shutdown = {
            let ctrl = Arc::clone(&ctrl);
            async move { ctrl.wait_for_shutdown().await }
        };
        let rpc_shutdown = {
            let ctrl = Arc::clone(&ctrl);
            async move { ctrl.wait_for_shutdown().await }
        };

        let http = async {
            axum::serve(http_listener, router)
                .with_graceful_shutdown(http_shutdown)
                .await
                .context("http server failed")
        };
        let rpc = serve_rpc(rpc_listener, state, rpc_shutdown);
        let served = tokio::try_join!(http, rpc);

        // A server error ends serving too; drain the same way.
        ctrl.trigger_shutdown();
        if ctrl.wait_for_drain(drain_timeout).await {
            info!("all in-flight calls drained");
        } else {
            warn!(
                remaining = ctrl.in_flight_count(),
                "drain timeout expired with calls in flight"
            );
        }
        gateway.shutdown().await;

        served.map(|_| ())
    }
}
