use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{Pool, TradeSide};
use crate::validation::validate_amount;

/// Result of pricing one trade against a pool. Nothing is mutated; the caller
/// decides whether to commit `pool`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub side: TradeSide,
    pub amount_in: f64,
    /// Portion of the input retained by the pool without moving the curve.
    pub fee: f64,
    pub effective_in: f64,
    pub amount_out: f64,
    pub execution_price: f64,
    pub pool: Pool,
}

impl Quote {
    /// Base currency moved by the trade: paid in on a buy, received on a sell.
    pub fn base_amount(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.amount_in,
            TradeSide::Sell => self.amount_out,
        }
    }

    pub fn token_amount(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.amount_out,
            TradeSide::Sell => self.amount_in,
        }
    }
}

/// Constant-product pricing with a proportional input fee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceCurve {
    fee_rate: f64,
    min_price: f64,
    max_price: f64,
}

impl PriceCurve {
    pub fn new(fee_rate: f64, min_price: f64, max_price: f64) -> Self {
        Self {
            fee_rate,
            min_price,
            max_price,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fee_rate, config.min_price, config.max_price)
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn quote(&self, pool: &Pool, side: TradeSide, amount: f64) -> Result<Quote> {
        match side {
            TradeSide::Buy => self.buy(pool, amount),
            TradeSide::Sell => self.sell(pool, amount),
        }
    }

    /// Positive amounts buy tokens with that much base currency, negative
    /// amounts sell that many tokens.
    pub fn trade_signed(&self, pool: &Pool, amount: f64) -> Result<Quote> {
        if amount < 0.0 {
            self.sell(pool, -amount)
        } else {
            self.buy(pool, amount)
        }
    }

    pub fn buy(&self, pool: &Pool, base_in: f64) -> Result<Quote> {
        validate_amount(base_in)?;
        let effective_in = base_in * (1.0 - self.fee_rate);
        let base_reserve = pool.base_reserve + effective_in;
        let token_reserve = pool.invariant / base_reserve;
        let tokens_out = pool.token_reserve - token_reserve;
        self.finish(TradeSide::Buy, pool, base_in, effective_in, tokens_out, base_reserve, token_reserve)
    }

    pub fn sell(&self, pool: &Pool, tokens_in: f64) -> Result<Quote> {
        validate_amount(tokens_in)?;
        let effective_in = tokens_in * (1.0 - self.fee_rate);
        let token_reserve = pool.token_reserve + effective_in;
        let base_reserve = pool.invariant / token_reserve;
        let base_out = pool.base_reserve - base_reserve;
        self.finish(TradeSide::Sell, pool, tokens_in, effective_in, base_out, base_reserve, token_reserve)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        side: TradeSide,
        pool: &Pool,
        amount_in: f64,
        effective_in: f64,
        amount_out: f64,
        base_reserve: f64,
        token_reserve: f64,
    ) -> Result<Quote> {
        if !(base_reserve.is_finite() && base_reserve > 0.0)
            || !(token_reserve.is_finite() && token_reserve > 0.0)
        {
            return Err(Error::InvalidTradeOutput(format!(
                "reserves would become base={} tokens={}",
                base_reserve, token_reserve
            )));
        }
        if !(amount_out.is_finite() && amount_out > 0.0) {
            return Err(Error::InvalidTradeOutput(format!(
                "{} of {} yields non-positive output {}",
                side, amount_in, amount_out
            )));
        }
        let execution_price = base_reserve / token_reserve;
        if !(self.min_price..=self.max_price).contains(&execution_price) {
            return Err(Error::InvalidTradeOutput(format!(
                "execution price {} outside [{}, {}]",
                execution_price, self.min_price, self.max_price
            )));
        }

        Ok(Quote {
            side,
            amount_in,
            fee: amount_in - effective_in,
            effective_in,
            amount_out,
            execution_price,
            pool: Pool {
                base_reserve,
                token_reserve,
                invariant: pool.invariant,
            },
        })
    }
}
