use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{Pool, Token, WalletId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    OneSecond,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::OneSecond,
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::OneHour,
    ];

    pub fn width_secs(self) -> i64 {
        match self {
            Timeframe::OneSecond => 1,
            Timeframe::OneMinute => 60,
            Timeframe::FiveMinutes => 300,
            Timeframe::FifteenMinutes => 900,
            Timeframe::OneHour => 3600,
        }
    }

    /// Start of the bucket containing `unix_secs`.
    pub fn bucket_start(self, unix_secs: i64) -> i64 {
        unix_secs.div_euclid(self.width_secs()) * self.width_secs()
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::OneSecond => "1s",
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::OneHour => "1h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.label() == s)
            .ok_or_else(|| crate::Error::ValidationError(format!("Unknown timeframe '{}'", s)))
    }
}

/// OHLC summary of one time bucket. `bucket_start` is in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holder {
    pub wallet_id: WalletId,
    pub amount: f64,
    pub share: f64,
}

/// Pool plus derived market views for a single token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingState {
    pub pool: Pool,
    pub candles: BTreeMap<Timeframe, Vec<Candle>>,
    pub holders: Vec<Holder>,
}

/// Full read snapshot of one token, served on initial page load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub token: Token,
    #[serde(flatten)]
    pub trading: TradingState,
}
