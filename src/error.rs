use std::io;
use std::result::Result as StdResult;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Invalid trade output: {0}")]
    InvalidTradeOutput(String),
    #[error("Trade cooldown active, retry in {:.1}s", .remaining.as_secs_f64())]
    TradeCooldown { remaining: Duration },
    #[error("Pool invariant broken: {0}")]
    PoolInvariantBroken(String),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("Token not found: {0}")]
    TokenNotFound(String),
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl Error {
    /// Stable name used in API error bodies and rejection metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InsufficientBalance(_) => "insufficient_balance",
            Error::InvalidTradeOutput(_) => "invalid_trade_output",
            Error::TradeCooldown { .. } => "trade_cooldown",
            Error::PoolInvariantBroken(_) => "pool_invariant_broken",
            Error::PersistenceFailure(_) => "persistence_failure",
            Error::TokenNotFound(_) => "token_not_found",
            Error::WalletNotFound(_) => "wallet_not_found",
            Error::ValidationError(_) => "validation_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::ConfigError(_) => "config_error",
            Error::InternalError(_) => "internal_error",
            Error::IoError(_) => "io_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidAmount(_)
            | Error::InsufficientBalance(_)
            | Error::InvalidTradeOutput(_)
            | Error::ValidationError(_) => 400,
            Error::Unauthorized(_) => 403,
            Error::TokenNotFound(_) | Error::WalletNotFound(_) => 404,
            Error::TradeCooldown { .. } => 429,
            Error::PoolInvariantBroken(_)
            | Error::PersistenceFailure(_)
            | Error::ConfigError(_)
            | Error::InternalError(_)
            | Error::IoError(_) => 500,
        }
    }

    /// Rejections are expected outcomes of a well-formed request and leave no trace.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidAmount(_)
                | Error::InsufficientBalance(_)
                | Error::InvalidTradeOutput(_)
                | Error::TradeCooldown { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ValidationError(err.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::InternalError(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::InternalError(err.to_string())
    }
}

pub type Result<T> = StdResult<T, Error>;
