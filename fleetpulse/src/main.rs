mod migrations;
mod server;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetpulse_core::{
    bootstrap::{init_store, load_config},
    logging, Normalizer,
};
use fleetpulse_hub::{BroadcastHub, BrokerBridge, IngestPipeline};

use server::FleetPulseServer;

#[derive(Parser, Debug)]
#[command(name = "fleetpulse")]
#[command(about = "Vehicle telemetry ingestion and live fan-out", long_about = None)]
struct Args {
    /// Config file; overrides FLEETPULSE_CONFIG_PATH and the default search paths
    #[arg(long, short = 'c')]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Starting FleetPulse v{}", env!("CARGO_PKG_VERSION"));

    // 3. Telemetry store (PostgreSQL or in-memory)
    let (store, pool) = init_store(&config).await?;
    if let Some(pool) = &pool {
        migrations::run_migrations(pool).await?;
    }

    // 4. Hub and shared ingestion pipeline
    let hub = BroadcastHub::with_capacity(config.hub.channel_capacity);
    let pipeline = IngestPipeline::new(
        Normalizer::new(config.validation.ev_emissions),
        store,
        hub,
    );
    info!(
        channel_capacity = config.hub.channel_capacity,
        ev_emissions = ?config.validation.ev_emissions,
        "Broadcast hub ready"
    );

    let shutdown = CancellationToken::new();

    // 5. Broker bridge
    let bridge = if config.broker.enabled {
        let bridge = BrokerBridge::new(&config.broker, pipeline.clone(), shutdown.clone())?;
        info!(topic = %bridge.topic(), "Starting broker bridge");
        Some(bridge.spawn())
    } else {
        info!("Broker bridge disabled");
        None
    };

    // 6. HTTP server until shutdown
    FleetPulseServer::new(config, pipeline, pool, bridge, shutdown)
        .run()
        .await
}
