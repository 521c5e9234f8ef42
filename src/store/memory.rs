use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{SettlementBatch, Store};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{Pool, Token, TokenId, TokenState, Trade, TradeId, TradingState, Wallet, WalletId};
use crate::trading::{CandleAggregator, HolderLedger};

#[derive(Debug, Default)]
struct Tables {
    tokens: HashMap<TokenId, Token>,
    pools: HashMap<TokenId, Pool>,
    wallets: HashMap<WalletId, Wallet>,
    trades: BTreeMap<TradeId, Trade>,
    trades_by_token: HashMap<TokenId, Vec<TradeId>>,
    candles: CandleAggregator,
    holders: HashMap<TokenId, HolderLedger>,
}

/// Process-local store. One write lock covers every table, so a commit is
/// visible to readers either completely or not at all.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    candle_min_spread: f64,
    max_candles: usize,
}

impl MemoryStore {
    pub fn new(candle_min_spread: f64, max_candles: usize) -> Self {
        Self {
            tables: RwLock::new(Tables {
                candles: CandleAggregator::new(candle_min_spread, max_candles),
                ..Tables::default()
            }),
            candle_min_spread,
            max_candles,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.candle_min_spread, config.max_candles)
    }
}

fn check_batch(tables: &Tables, batch: &SettlementBatch) -> Result<()> {
    let trade = &batch.trade;
    if trade.token_id != batch.token.id || trade.wallet_id != batch.wallet.id {
        return Err(Error::PersistenceFailure(format!(
            "trade {} does not belong to token {} and wallet {}",
            trade.id, batch.token.id, batch.wallet.id
        )));
    }
    if !tables.tokens.contains_key(&batch.token.id) || !tables.pools.contains_key(&batch.token.id) {
        return Err(Error::PersistenceFailure(format!("no rows for token {}", batch.token.id)));
    }
    if !tables.wallets.contains_key(&batch.wallet.id) {
        return Err(Error::PersistenceFailure(format!("no row for wallet {}", batch.wallet.id)));
    }
    if tables.trades.contains_key(&trade.id) {
        return Err(Error::PersistenceFailure(format!("trade {} already recorded", trade.id)));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn token(&self, token_id: &TokenId) -> Result<Option<Token>> {
        Ok(self.tables.read().await.tokens.get(token_id).cloned())
    }

    async fn tokens(&self) -> Result<Vec<Token>> {
        let tables = self.tables.read().await;
        let mut tokens: Vec<Token> = tables.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tokens)
    }

    async fn pool(&self, token_id: &TokenId) -> Result<Option<Pool>> {
        Ok(self.tables.read().await.pools.get(token_id).copied())
    }

    async fn wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>> {
        Ok(self.tables.read().await.wallets.get(wallet_id).cloned())
    }

    async fn insert_token(&self, token: Token, pool: Pool) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.tokens.contains_key(&token.id) {
            return Err(Error::ValidationError(format!("Token {} already exists", token.id)));
        }
        tables.pools.insert(token.id.clone(), pool);
        tables.holders.insert(token.id.clone(), HolderLedger::new());
        tables.tokens.insert(token.id.clone(), token);
        Ok(())
    }

    async fn open_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .wallets
            .entry(wallet.id.clone())
            .or_insert(wallet)
            .clone())
    }

    async fn put_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.wallets.contains_key(&wallet.id) {
            return Err(Error::WalletNotFound(wallet.id.to_string()));
        }
        tables.wallets.insert(wallet.id.clone(), wallet);
        Ok(())
    }

    async fn commit(&self, batch: SettlementBatch) -> Result<()> {
        let mut guard = self.tables.write().await;
        check_batch(&guard, &batch)?;

        let tables = &mut *guard;
        let SettlementBatch { token, pool, wallet, trade } = batch;
        tables
            .candles
            .record(&trade.token_id, trade.execution_price, trade.timestamp);
        tables
            .holders
            .entry(trade.token_id.clone())
            .or_default()
            .apply(&trade);
        tables
            .trades_by_token
            .entry(trade.token_id.clone())
            .or_default()
            .push(trade.id);
        tables.pools.insert(token.id.clone(), pool);
        tables.tokens.insert(token.id.clone(), token);
        tables.wallets.insert(wallet.id.clone(), wallet);
        tables.trades.insert(trade.id, trade);
        Ok(())
    }

    async fn token_state(&self, token_id: &TokenId, candle_limit: usize) -> Result<Option<TokenState>> {
        let tables = self.tables.read().await;
        let (Some(token), Some(pool)) = (tables.tokens.get(token_id), tables.pools.get(token_id)) else {
            return Ok(None);
        };
        let holders = tables
            .holders
            .get(token_id)
            .map(|ledger| ledger.snapshot(token.total_supply))
            .unwrap_or_default();

        Ok(Some(TokenState {
            token: token.clone(),
            trading: TradingState {
                pool: *pool,
                candles: tables.candles.snapshot(token_id, candle_limit),
                holders,
            },
        }))
    }

    async fn trades(&self, token_id: &TokenId, limit: usize) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades_by_token
            .get(token_id)
            .into_iter()
            .flat_map(|ids| ids.iter().rev())
            .filter_map(|id| tables.trades.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_trades(&self, limit: usize) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables.trades.values().rev().take(limit).cloned().collect())
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades
            .values()
            .filter(|trade| trade.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn last_trade_id(&self) -> Result<Option<TradeId>> {
        Ok(self.tables.read().await.trades.keys().next_back().copied())
    }

    async fn rebuild_views(&self) -> Result<()> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;

        let mut ordered: Vec<&Trade> = tables.trades.values().collect();
        ordered.sort_by_key(|trade| (trade.timestamp, trade.id));

        let candles = CandleAggregator::rebuild(self.candle_min_spread, self.max_candles, ordered.iter().copied());
        let mut holders: HashMap<TokenId, HolderLedger> = tables
            .tokens
            .keys()
            .map(|id| (id.clone(), HolderLedger::new()))
            .collect();
        for trade in &ordered {
            holders.entry(trade.token_id.clone()).or_default().apply(trade);
        }

        info!("Rebuilt market views from {} trades", ordered.len());
        tables.candles = candles;
        tables.holders = holders;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Timeframe, TradeSide};
    use chrono::{TimeZone, Utc};

    fn token(id: &str) -> Token {
        Token {
            id: TokenId::from(id),
            name: "Frog".to_string(),
            symbol: "FROG".to_string(),
            description: "ribbit".to_string(),
            creator_id: WalletId::from("creator"),
            total_supply: 100_000_000.0,
            current_price: 0.01,
            cumulative_volume: 0.0,
            tokens_sold: 0.0,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            last_trade_at: None,
        }
    }

    fn batch(id: u64, wallet: &Wallet, side: TradeSide, tokens: f64, secs: i64) -> SettlementBatch {
        let mut wallet = wallet.clone();
        wallet.token_balances.insert(TokenId::from("frog"), tokens);
        SettlementBatch {
            token: token("frog"),
            pool: Pool::new(20_000.0, 2_000_000.0),
            wallet,
            trade: Trade {
                id: TradeId(id),
                token_id: TokenId::from("frog"),
                wallet_id: WalletId::from("alice"),
                side,
                base_amount: 10.0,
                token_amount: tokens,
                execution_price: 0.01 + id as f64 * 0.001,
                timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            },
        }
    }

    async fn seeded() -> (MemoryStore, Wallet) {
        let store = MemoryStore::new(1e-4, 1_000);
        store
            .insert_token(token("frog"), Pool::new(20_000.0, 2_000_000.0))
            .await
            .unwrap();
        let wallet = store
            .open_wallet(Wallet::new(WalletId::from("alice"), 10_000.0))
            .await
            .unwrap();
        (store, wallet)
    }

    #[tokio::test]
    async fn test_commit_updates_rows_and_views() -> Result<()> {
        let (store, wallet) = seeded().await;
        store.commit(batch(1, &wallet, TradeSide::Buy, 500.0, 10)).await?;

        let state = store.token_state(&TokenId::from("frog"), 100).await?.unwrap();
        assert_eq!(state.trading.holders.len(), 1);
        assert_eq!(state.trading.holders[0].amount, 500.0);
        assert_eq!(state.trading.candles[&Timeframe::OneMinute].len(), 1);
        assert_eq!(store.last_trade_id().await?, Some(TradeId(1)));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_commit_changes_nothing() -> Result<()> {
        let (store, wallet) = seeded().await;
        store.commit(batch(1, &wallet, TradeSide::Buy, 500.0, 10)).await?;
        let before = store.token_state(&TokenId::from("frog"), 100).await?;

        let duplicate = store.commit(batch(1, &wallet, TradeSide::Buy, 900.0, 20)).await;
        assert!(matches!(duplicate, Err(Error::PersistenceFailure(_))));

        let mut unknown_wallet = batch(2, &wallet, TradeSide::Buy, 900.0, 20);
        unknown_wallet.wallet.id = WalletId::from("mallory");
        unknown_wallet.trade.wallet_id = WalletId::from("mallory");
        assert!(store.commit(unknown_wallet).await.is_err());

        assert_eq!(store.token_state(&TokenId::from("frog"), 100).await?, before);
        assert_eq!(store.trades(&TokenId::from("frog"), 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_trades_newest_first() -> Result<()> {
        let (store, wallet) = seeded().await;
        for id in 1..=4 {
            store.commit(batch(id, &wallet, TradeSide::Buy, 10.0, id as i64)).await?;
        }
        let ids: Vec<u64> = store
            .trades(&TokenId::from("frog"), 3)
            .await?
            .iter()
            .map(|t| t.id.0)
            .collect();
        assert_eq!(ids, vec![4, 3, 2]);
        let recent: Vec<u64> = store.recent_trades(2).await?.iter().map(|t| t.id.0).collect();
        assert_eq!(recent, vec![4, 3]);
        assert!(store.trades(&TokenId::from("toad"), 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_trades_since_cutoff() -> Result<()> {
        let (store, wallet) = seeded().await;
        for id in 1..=4 {
            store.commit(batch(id, &wallet, TradeSide::Buy, 10.0, id as i64 * 10)).await?;
        }
        let since: Vec<u64> = store
            .trades_since(Utc.timestamp_opt(20, 0).unwrap())
            .await?
            .iter()
            .map(|t| t.id.0)
            .collect();
        assert_eq!(since, vec![2, 3, 4]);
        assert!(store.trades_since(Utc.timestamp_opt(41, 0).unwrap()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rebuild_views_matches_incremental() -> Result<()> {
        let (store, wallet) = seeded().await;
        store.commit(batch(1, &wallet, TradeSide::Buy, 300.0, 1)).await?;
        store.commit(batch(2, &wallet, TradeSide::Sell, 100.0, 61)).await?;
        store.commit(batch(3, &wallet, TradeSide::Buy, 50.0, 62)).await?;

        let incremental = store.token_state(&TokenId::from("frog"), 1_000).await?;
        store.rebuild_views().await?;
        let rebuilt = store.token_state(&TokenId::from("frog"), 1_000).await?;
        assert_eq!(incremental, rebuilt);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_wallet_is_idempotent() -> Result<()> {
        let (store, _) = seeded().await;
        let again = store
            .open_wallet(Wallet::new(WalletId::from("alice"), 1.0))
            .await?;
        assert_eq!(again.base_balance, 10_000.0);
        assert!(store.put_wallet(Wallet::new(WalletId::from("ghost"), 1.0)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let (store, _) = seeded().await;
        let result = store
            .insert_token(token("frog"), Pool::new(1.0, 1.0))
            .await;
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }
}
