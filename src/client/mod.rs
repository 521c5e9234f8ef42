//! Client-side view of a token's trade list.
//!
//! A client shows its own trades immediately as pending predictions and
//! replaces them once the exchange confirms them. Confirmed trades arriving
//! over the realtime feed are merged by trade id, so a trade seen both in a
//! trade response and in a broadcast is listed once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{Pool, TokenId, Trade, TradeId, TradeSide};
use crate::realtime::RealtimeEvent;
use crate::trading::PriceCurve;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTrade {
    pub local_ref: u64,
    pub side: TradeSide,
    pub base_amount: f64,
    pub token_amount: f64,
    pub price: f64,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClientTrade {
    Pending(PendingTrade),
    Confirmed(Trade),
}

impl ClientTrade {
    pub fn is_pending(&self) -> bool {
        matches!(self, ClientTrade::Pending(_))
    }
}

#[derive(Debug, Clone)]
pub struct TradeFeed {
    token_id: TokenId,
    curve: PriceCurve,
    pool: Pool,
    next_ref: u64,
    pending: Vec<PendingTrade>,
    confirmed: BTreeMap<TradeId, Trade>,
}

impl TradeFeed {
    pub fn new(token_id: TokenId, curve: PriceCurve, pool: Pool) -> Self {
        Self {
            token_id,
            curve,
            pool,
            next_ref: 0,
            pending: Vec::new(),
            confirmed: BTreeMap::new(),
        }
    }

    pub fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    /// Pool including the effect of local predictions.
    pub fn pool(&self) -> Pool {
        self.pool
    }

    /// Prices the trade locally, lists it as pending and returns its local
    /// reference for a later `confirm` or `reject`.
    pub fn predict(&mut self, side: TradeSide, amount: f64, placed_at: DateTime<Utc>) -> Result<u64> {
        let quote = self.curve.quote(&self.pool, side, amount)?;
        self.next_ref += 1;
        self.pending.push(PendingTrade {
            local_ref: self.next_ref,
            side,
            base_amount: quote.base_amount(),
            token_amount: quote.token_amount(),
            price: quote.execution_price,
            placed_at,
        });
        self.pool = quote.pool;
        Ok(self.next_ref)
    }

    /// Replaces the pending trade with the exchange's record of it.
    pub fn confirm(&mut self, local_ref: u64, trade: Trade) -> bool {
        let found = self.take_pending(local_ref).is_some();
        self.merge(trade);
        found
    }

    pub fn reject(&mut self, local_ref: u64) -> Option<PendingTrade> {
        self.take_pending(local_ref)
    }

    /// Adds a confirmed trade unless one with the same id is already listed.
    pub fn merge(&mut self, trade: Trade) -> bool {
        if trade.token_id != self.token_id || self.confirmed.contains_key(&trade.id) {
            return false;
        }
        self.confirmed.insert(trade.id, trade);
        true
    }

    /// Replaces confirmed history with a freshly fetched list, keeping
    /// predictions that are still in flight.
    pub fn resync(&mut self, trades: Vec<Trade>, pool: Pool) {
        self.confirmed = trades
            .into_iter()
            .filter(|trade| trade.token_id == self.token_id)
            .map(|trade| (trade.id, trade))
            .collect();
        self.pool = pool;
    }

    pub fn apply_event(&mut self, event: &RealtimeEvent) {
        match event {
            RealtimeEvent::Trade { trade, .. } => {
                self.merge(trade.clone());
            }
            RealtimeEvent::TradingStateUpdate { state, .. } => self.pool = state.pool,
            _ => {}
        }
    }

    /// Pending trades first, then confirmed ones, each newest first.
    pub fn view(&self) -> Vec<ClientTrade> {
        self.pending
            .iter()
            .rev()
            .cloned()
            .map(ClientTrade::Pending)
            .chain(self.confirmed.values().rev().cloned().map(ClientTrade::Confirmed))
            .collect()
    }

    fn take_pending(&mut self, local_ref: u64) -> Option<PendingTrade> {
        let index = self.pending.iter().position(|p| p.local_ref == local_ref)?;
        Some(self.pending.remove(index))
    }
}
