#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use bonding_exchange::config::{Config, EngineConfig, WalletConfig};
use bonding_exchange::models::{Token, WalletId};
use bonding_exchange::realtime::RealtimeBroadcaster;
use bonding_exchange::services::{MarketService, NewToken, WalletService};
use bonding_exchange::store::{MemoryStore, Store};
use bonding_exchange::trading::{ManualClock, TradeSettlementEngine};
use bonding_exchange::web::AppState;

pub const START: i64 = 1_700_000_000;

pub fn start_time() -> DateTime<Utc> {
    Utc.timestamp_opt(START, 0).unwrap()
}

pub fn relative_eq(actual: f64, expected: f64, tolerance: f64) -> bool {
    ((actual - expected) / expected).abs() <= tolerance
}

/// Everything wired the way the binary wires it, with a manual clock.
pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<TradeSettlementEngine>,
    pub market: Arc<MarketService>,
    pub wallets: Arc<WalletService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_wallets(wallets: WalletConfig) -> Self {
        Self::with_config(Config {
            wallets,
            ..Config::default()
        })
        .await
    }

    pub async fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::from_config(&config.engine));
        let broadcaster = Arc::new(RealtimeBroadcaster::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = Arc::new(
            TradeSettlementEngine::new(
                config.engine.clone(),
                store.clone(),
                broadcaster.clone(),
                clock.clone(),
            )
            .await
            .expect("engine starts on an empty store"),
        );
        let shared: Arc<dyn Store> = store.clone();
        let market = Arc::new(MarketService::new(shared.clone(), engine.clone(), broadcaster.clone()));
        let wallets = Arc::new(WalletService::new(shared, engine.clone(), config.wallets.clone()));

        Self {
            config,
            store,
            broadcaster,
            clock,
            engine,
            market,
            wallets,
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config.engine
    }

    pub async fn wallet(&self, id: &str) -> WalletId {
        let wallet_id = WalletId::from(id);
        self.wallets
            .open_wallet(&wallet_id)
            .await
            .expect("wallet opens");
        wallet_id
    }

    /// Launches a token created by a fresh `creator` wallet.
    pub async fn launch(&self, symbol: &str) -> Token {
        let creator = self.wallet("creator").await;
        self.market
            .create_token(
                &creator,
                NewToken {
                    name: format!("{} token", symbol),
                    symbol: symbol.to_string(),
                    description: "Launched for tests".to_string(),
                },
            )
            .await
            .expect("token launches")
    }

    pub fn app_state(&self, metrics_enabled: bool) -> AppState {
        AppState {
            market: self.market.clone(),
            wallets: self.wallets.clone(),
            broadcaster: self.broadcaster.clone(),
            metrics_enabled,
        }
    }
}
