//! Reference processor: answers every request with its own payload, or
//! consumes it when started with `--consume`.

use clap::Parser;
use eventmux_server::network::{EchoMode, EchoProcessor};
use eventmux_server::telemetry;
use tracing::info;

#[derive(Parser)]
#[command(name = "echo-processor")]
#[command(about = "Echoes or consumes forwarded requests", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, env = "ECHO_LISTEN_ADDR", default_value = "0.0.0.0:12345")]
    listen: String,

    /// Consume requests instead of echoing their payload
    #[arg(long)]
    consume: bool,

    #[arg(long, env = "ECHO_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "ECHO_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.json_logs)?;

    let mode = if cli.consume {
        EchoMode::Consume
    } else {
        EchoMode::Content
    };
    let processor = EchoProcessor::bind(&cli.listen).await?.with_mode(mode);
    info!(addr = %processor.local_addr()?, ?mode, "echo processor listening");

    tokio::select! {
        result = processor.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("echo processor stopped"),
    }
    Ok(())
}
