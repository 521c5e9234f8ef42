use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod market;

pub use market::{Candle, Holder, Timeframe, TokenState, TradingState};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(TokenId);
string_id!(WalletId);

/// Globally unique, strictly increasing trade identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("buy"),
            TradeSide::Sell => f.write_str("sell"),
        }
    }
}

impl FromStr for TradeSide {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(crate::Error::ValidationError(format!(
                "Unknown trade side '{}', expected buy or sell",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub creator_id: WalletId,
    pub total_supply: f64,
    pub current_price: f64,
    pub cumulative_volume: f64,
    pub tokens_sold: f64,
    pub created_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

/// Constant-product liquidity pool of one token against the base currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub base_reserve: f64,
    pub token_reserve: f64,
    pub invariant: f64,
}

impl Pool {
    pub fn new(base_reserve: f64, token_reserve: f64) -> Self {
        Self {
            base_reserve,
            token_reserve,
            invariant: base_reserve * token_reserve,
        }
    }

    /// Pool holding `token_reserve` tokens priced at `price`.
    pub fn seeded(price: f64, token_reserve: f64) -> Self {
        Self::new(price * token_reserve, token_reserve)
    }

    pub fn spot_price(&self) -> f64 {
        self.base_reserve / self.token_reserve
    }

    /// Reserves are positive and finite and their product matches `invariant`
    /// within the relative `tolerance`.
    pub fn invariant_holds(&self, tolerance: f64) -> bool {
        let reserves_valid = self.base_reserve.is_finite()
            && self.token_reserve.is_finite()
            && self.invariant.is_finite()
            && self.base_reserve > 0.0
            && self.token_reserve > 0.0
            && self.invariant > 0.0;
        if !reserves_valid {
            return false;
        }
        let product = self.base_reserve * self.token_reserve;
        ((product - self.invariant) / self.invariant).abs() <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub base_balance: f64,
    pub token_balances: BTreeMap<TokenId, f64>,
}

impl Wallet {
    pub fn new(id: WalletId, base_balance: f64) -> Self {
        Self {
            id,
            base_balance,
            token_balances: BTreeMap::new(),
        }
    }

    pub fn token_balance(&self, token_id: &TokenId) -> f64 {
        self.token_balances.get(token_id).copied().unwrap_or(0.0)
    }
}

/// One accepted trade. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub token_id: TokenId,
    pub wallet_id: WalletId,
    pub side: TradeSide,
    pub base_amount: f64,
    pub token_amount: f64,
    pub execution_price: f64,
    pub timestamp: DateTime<Utc>,
}
