use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub wallets: WalletConfig,
    pub logging: LoggingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Realtime messages queued per WebSocket client before it is dropped.
    pub subscriber_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            subscriber_buffer: crate::realtime::DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Pricing and settlement parameters.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Proportional fee taken from the trade input before it reaches the curve.
    pub fee_rate: f64,
    pub trade_cooldown_secs: u64,
    pub min_price: f64,
    pub max_price: f64,
    /// Token reserve used when seeding a new pool or reseeding a broken one.
    pub default_token_reserve: f64,
    pub launch_price: f64,
    pub total_supply: f64,
    /// Relative tolerance when checking `base * tokens == invariant`.
    pub invariant_tolerance: f64,
    /// Smallest high-low range drawn for one-second candles.
    pub candle_min_spread: f64,
    /// Buckets retained per token and timeframe.
    pub max_candles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: 0.003,
            trade_cooldown_secs: 5,
            min_price: 1e-4,
            max_price: 1e6,
            default_token_reserve: 2_000_000.0,
            launch_price: 0.01,
            total_supply: 100_000_000.0,
            invariant_tolerance: 1e-9,
            candle_min_spread: 1e-4,
            max_candles: crate::trading::DEFAULT_MAX_CANDLES,
        }
    }
}

impl EngineConfig {
    pub fn trade_cooldown(&self) -> Duration {
        Duration::from_secs(self.trade_cooldown_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WalletConfig {
    pub opening_balance: f64,
    pub faucet_amount: f64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            opening_balance: 10_000.0,
            faucet_amount: 100.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_prometheus: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No configuration at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Applies `EXCHANGE_HOST` and `EXCHANGE_PORT` from the environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("EXCHANGE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("EXCHANGE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid EXCHANGE_PORT '{}': {}", port, e))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if !(0.0..1.0).contains(&engine.fee_rate) {
            anyhow::bail!("fee_rate must be in [0, 1), got {}", engine.fee_rate);
        }
        if engine.min_price <= 0.0 || engine.min_price >= engine.max_price {
            anyhow::bail!(
                "price bounds must satisfy 0 < min_price < max_price, got [{}, {}]",
                engine.min_price,
                engine.max_price
            );
        }
        if engine.default_token_reserve <= 0.0 || engine.launch_price <= 0.0 {
            anyhow::bail!("default_token_reserve and launch_price must be positive");
        }
        if engine.total_supply <= 0.0 {
            anyhow::bail!("total_supply must be positive");
        }
        if self.server.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be positive");
        }
        if engine.max_candles < crate::store::SNAPSHOT_CANDLE_LIMIT {
            anyhow::bail!(
                "max_candles must be at least {}, got {}",
                crate::store::SNAPSHOT_CANDLE_LIMIT,
                engine.max_candles
            );
        }
        if self.wallets.opening_balance < 0.0 || self.wallets.faucet_amount <= 0.0 {
            anyhow::bail!("wallet opening_balance must be >= 0 and faucet_amount > 0");
        }
        Ok(())
    }
}
