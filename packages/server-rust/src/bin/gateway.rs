//! eventmux gateway: accepts events and actions over HTTP and binary RPC and
//! forwards them to backend processors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use eventmux_core::{ActionType, EventType};
use eventmux_server::network::{build_router, NetworkConfig, NetworkModule};
use eventmux_server::service::{FamilyConfig, Gateway, GatewayConfig};
use eventmux_server::telemetry;
use tracing::info;

#[derive(Parser)]
#[command(name = "eventmux-gateway")]
#[command(about = "Forwards events and actions to backend processors", long_about = None)]
#[command(version)]
struct Cli {
    /// Address of the processor handling HELLO for both families
    #[arg(long, env = "EVENTMUX_PROCESSOR", default_value = "127.0.0.1:12345")]
    processor: String,

    /// Bind address for the HTTP and RPC listeners
    #[arg(long, env = "EVENTMUX_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "EVENTMUX_HTTP_PORT", default_value_t = 8080)]
    http_port: u16,

    #[arg(long, env = "EVENTMUX_RPC_PORT", default_value_t = 9090)]
    rpc_port: u16,

    /// Per-request deadline applied by both front ends
    #[arg(long, env = "EVENTMUX_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    request_timeout_ms: u64,

    /// Admission limit per processor; unbounded when omitted
    #[arg(long, env = "EVENTMUX_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "EVENTMUX_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, env = "EVENTMUX_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "EVENTMUX_LOG_JSON")]
    json_logs: bool,
}

impl Cli {
    fn gateway_config(&self) -> GatewayConfig {
        let network = NetworkConfig {
            host: self.host.clone(),
            http_port: self.http_port,
            rpc_port: self.rpc_port,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..NetworkConfig::default()
        };

        let mut events = FamilyConfig::<EventType>::default().route(EventType::Hello, self.processor.as_str());
        events.multiplexer.max_in_flight = self.max_in_flight;
        let mut actions =
            FamilyConfig::<ActionType>::default().route(ActionType::Hello, self.processor.as_str());
        actions.multiplexer.max_in_flight = self.max_in_flight;

        GatewayConfig {
            network,
            events,
            actions,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.json_logs)?;

    if let Some(port) = cli.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        telemetry::install_metrics_exporter(addr)?;
        info!(%addr, "metrics exporter listening");
    }

    let config = cli.gateway_config();
    let events = build_router(&config.events)
        .await
        .context("failed to build event router")?;
    let actions = build_router(&config.actions)
        .await
        .context("failed to build action router")?;
    let gateway = Arc::new(Gateway::new(events, actions));

    let mut module = NetworkModule::new(config.network, gateway);
    let ports = module.start().await?;
    info!(http = ports.http, rpc = ports.rpc, processor = %cli.processor, "gateway started");

    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("gateway stopped");
    Ok(())
}
