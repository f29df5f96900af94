//! MJPEG relay server.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌────────────────────────────────────────────────┐
//!                          │                  MJPEG RELAY                   │
//!                          │                                                │
//!     Viewer GET /cam      │  ┌────────┐   ┌─────────────┐   ┌───────────┐  │
//!     ─────────────────────┼─▶│  http  │──▶│RelaySession │──▶│ Upstream  │◀─┼──── Camera
//!                          │  │ server │   │   (actor)   │   │ Connector │  │
//!                          │  └────────┘   └──────┬──────┘   └─────┬─────┘  │
//!                          │                      │   rewritten    │        │
//!     Viewer body          │  ┌────────┐   ┌──────▼──────┐  chunks  │        │
//!     ◀────────────────────┼──│ viewer │◀──│ Subscriber  │◀─────────┘        │
//!                          │  │ stream │   │  Registry   │                   │
//!                          │  └────────┘   └─────────────┘                   │
//!                          └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mjpeg_relay::config::load_config;
use mjpeg_relay::lifecycle::{serve, trigger_on_signal, Shutdown};
use mjpeg_relay::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "mjpeg-relay")]
#[command(about = "Relay MJPEG camera streams to many viewers over one upstream connection", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "mjpeg-relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability);
    tracing::info!("mjpeg-relay v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        streams = config.streams.len(),
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    trigger_on_signal(shutdown.clone());
    serve(config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
