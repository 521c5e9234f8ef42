use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use bonding_exchange::cli::Cli;
use bonding_exchange::config::Config;
use bonding_exchange::realtime::RealtimeBroadcaster;
use bonding_exchange::services::{MarketService, WalletService};
use bonding_exchange::store::{MemoryStore, Store};
use bonding_exchange::trading::{SystemClock, TradeSettlementEngine};
use bonding_exchange::web::{AppState, WebServer};
use bonding_exchange::{logging, metrics};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("config/config.toml"));
    let mut config = Config::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("Configuration loading failed for {:?}: {}", config_path, e))?;
    config.apply_env_overrides()?;

    let level = if cli.debug { "debug" } else { config.logging.level.as_str() };
    logging::init(level, config.logging.log_file.as_deref())?;
    info!("Starting bonding exchange...");

    if config.monitoring.enable_prometheus {
        metrics::init()?;
        info!("Prometheus metrics registered.");
    } else {
        warn!("Prometheus metrics disabled.");
    }

    let store: Arc<dyn Store> = Arc::new(MemoryStore::from_config(&config.engine));
    let broadcaster = Arc::new(RealtimeBroadcaster::with_buffer(config.server.subscriber_buffer));
    let engine = Arc::new(
        TradeSettlementEngine::new(
            config.engine.clone(),
            store.clone(),
            broadcaster.clone(),
            Arc::new(SystemClock),
        )
        .await?,
    );
    info!("Settlement engine initialized.");

    let state = AppState {
        market: Arc::new(MarketService::new(store.clone(), engine.clone(), broadcaster.clone())),
        wallets: Arc::new(WalletService::new(store, engine, config.wallets.clone())),
        broadcaster,
        metrics_enabled: config.monitoring.enable_prometheus,
    };

    WebServer::new(state)
        .start(&config.server.host, config.server.port)
        .await?;
    Ok(())
}
