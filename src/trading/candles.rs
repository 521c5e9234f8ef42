use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::models::{Candle, Timeframe, TokenId, Trade};

/// Buckets kept per token and timeframe unless configured otherwise.
pub const DEFAULT_MAX_CANDLES: usize = 1_000;

/// Multi-timeframe OHLC series per token, fed by execution prices.
///
/// Buckets only ever move forward: a price stamped before the newest bucket
/// of a timeframe is folded into that newest bucket instead of reopening a
/// closed one. Each timeframe keeps at most `max_candles` buckets; the
/// oldest are dropped as new ones open.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    min_spread: f64,
    max_candles: usize,
    series: HashMap<TokenId, HashMap<Timeframe, BTreeMap<i64, Candle>>>,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new(0.0, DEFAULT_MAX_CANDLES)
    }
}

impl CandleAggregator {
    pub fn new(min_spread: f64, max_candles: usize) -> Self {
        Self {
            min_spread,
            max_candles: max_candles.max(1),
            series: HashMap::new(),
        }
    }

    /// Replays trades in settlement order into a fresh aggregator.
    pub fn rebuild<'a>(
        min_spread: f64,
        max_candles: usize,
        trades: impl IntoIterator<Item = &'a Trade>,
    ) -> Self {
        let mut aggregator = Self::new(min_spread, max_candles);
        for trade in trades {
            aggregator.record(&trade.token_id, trade.execution_price, trade.timestamp);
        }
        aggregator
    }

    /// Folds `price` into every timeframe and returns the touched candles.
    pub fn record(
        &mut self,
        token_id: &TokenId,
        price: f64,
        executed_at: DateTime<Utc>,
    ) -> Vec<(Timeframe, Candle)> {
        let unix_secs = executed_at.timestamp();
        let token_series = self.series.entry(token_id.clone()).or_default();
        let mut touched = Vec::with_capacity(Timeframe::ALL.len());

        for tf in Timeframe::ALL {
            let buckets = token_series.entry(tf).or_default();
            let latest = buckets.iter().next_back().map(|(start, candle)| (*start, *candle));
            let bucket_start = match latest {
                Some((latest_start, _)) => tf.bucket_start(unix_secs).max(latest_start),
                None => tf.bucket_start(unix_secs),
            };

            let mut candle = match buckets.get(&bucket_start) {
                Some(existing) => Candle {
                    high: existing.high.max(price),
                    low: existing.low.min(price),
                    close: price,
                    ..*existing
                },
                None => {
                    let open = latest.map(|(_, previous)| previous.close).unwrap_or(price);
                    Candle {
                        bucket_start,
                        open,
                        high: open.max(price),
                        low: open.min(price),
                        close: price,
                    }
                }
            };

            if tf == Timeframe::OneSecond {
                widen_flat_candle(&mut candle, self.min_spread);
            }
            buckets.insert(bucket_start, candle);
            while buckets.len() > self.max_candles {
                buckets.pop_first();
            }
            touched.push((tf, candle));
        }
        touched
    }

    /// The most recent `limit` candles of one timeframe, oldest first.
    pub fn series<'a>(
        &'a self,
        token_id: &TokenId,
        timeframe: Timeframe,
        limit: usize,
    ) -> impl Iterator<Item = Candle> + 'a {
        let window = self
            .series
            .get(token_id)
            .and_then(|s| s.get(&timeframe))
            .and_then(|b| Some((b, *b.keys().rev().take(limit).last()?)));
        window
            .into_iter()
            .flat_map(|(b, first)| b.range(first..).map(|(_, candle)| *candle))
    }

    pub fn latest(&self, token_id: &TokenId, timeframe: Timeframe) -> Option<Candle> {
        self.series
            .get(token_id)
            .and_then(|s| s.get(&timeframe))
            .and_then(|b| b.values().next_back().copied())
    }

    /// All timeframes for a token, each capped at `limit` candles.
    pub fn snapshot(&self, token_id: &TokenId, limit: usize) -> BTreeMap<Timeframe, Vec<Candle>> {
        Timeframe::ALL
            .into_iter()
            .map(|tf| (tf, self.series(token_id, tf, limit).collect()))
            .collect()
    }
}

fn widen_flat_candle(candle: &mut Candle, min_spread: f64) {
    if candle.high - candle.low < min_spread {
        candle.high = candle.open.max(candle.close) + min_spread;
        candle.low = (candle.open.min(candle.close) - min_spread).max(0.0);
    }
}
