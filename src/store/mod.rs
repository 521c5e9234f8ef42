//! Transactional row storage behind the settlement engine.
//!
//! Tokens, pools, wallets and the append-only trade log are the rows of
//! record. Candles and holder balances are materialized views over the trade
//! log, updated inside the same commit and rebuildable from it at any time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Pool, Token, TokenId, TokenState, Trade, TradeId, Wallet, WalletId};

mod memory;

pub use memory::MemoryStore;

/// Most recent buckets per timeframe included in a pushed or fetched snapshot.
pub const SNAPSHOT_CANDLE_LIMIT: usize = 120;

/// Every row written by one settlement. Applied entirely or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementBatch {
    pub token: Token,
    pub pool: Pool,
    pub wallet: Wallet,
    pub trade: Trade,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn token(&self, token_id: &TokenId) -> Result<Option<Token>>;

    /// All tokens, newest first.
    async fn tokens(&self) -> Result<Vec<Token>>;

    async fn pool(&self, token_id: &TokenId) -> Result<Option<Pool>>;

    async fn wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>>;

    async fn insert_token(&self, token: Token, pool: Pool) -> Result<()>;

    /// Inserts `wallet` unless a wallet with its id exists; returns the stored one.
    async fn open_wallet(&self, wallet: Wallet) -> Result<Wallet>;

    async fn put_wallet(&self, wallet: Wallet) -> Result<()>;

    /// Atomically writes the batch and folds its trade into the views.
    async fn commit(&self, batch: SettlementBatch) -> Result<()>;

    /// Token, pool, candles and holders read under one consistent view.
    async fn token_state(&self, token_id: &TokenId, candle_limit: usize) -> Result<Option<TokenState>>;

    /// Trades of one token, newest first.
    async fn trades(&self, token_id: &TokenId, limit: usize) -> Result<Vec<Trade>>;

    /// Trades across all tokens, newest (highest id) first.
    async fn recent_trades(&self, limit: usize) -> Result<Vec<Trade>>;

    async fn last_trade_id(&self) -> Result<Option<TradeId>>;

    /// Trades stamped at or after `since`, in id order.
    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>>;

    /// Discards candle and holder views and replays the trade log.
    async fn rebuild_views(&self) -> Result<()>;
}
