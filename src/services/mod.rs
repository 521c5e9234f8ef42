use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::WalletConfig;
use crate::error::{Error, Result};
use crate::models::{Pool, Token, TokenId, TokenState, Trade, TradeSide, Wallet, WalletId};
use crate::realtime::{RealtimeBroadcaster, RealtimeEvent, Topic};
use crate::store::{Store, SNAPSHOT_CANDLE_LIMIT};
use crate::trading::{Quote, Settlement, TradeSettlementEngine};
use crate::validation::{validate_description, validate_name, validate_symbol};

pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;
pub const MAX_TRANSACTION_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewToken {
    pub name: String,
    pub symbol: String,
    pub description: String,
}

/// Read side of the exchange plus token minting and trade entry.
pub struct MarketService {
    store: Arc<dyn Store>,
    engine: Arc<TradeSettlementEngine>,
    broadcaster: Arc<RealtimeBroadcaster>,
}

impl MarketService {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<TradeSettlementEngine>,
        broadcaster: Arc<RealtimeBroadcaster>,
    ) -> Self {
        Self {
            store,
            engine,
            broadcaster,
        }
    }

    pub async fn get_token(&self, token_id: &TokenId) -> Result<Token> {
        self.store
            .token(token_id)
            .await?
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))
    }

    /// Full snapshot for an observer's initial load or resync.
    pub async fn get_token_state(&self, token_id: &TokenId) -> Result<TokenState> {
        self.store
            .token_state(token_id, SNAPSHOT_CANDLE_LIMIT)
            .await?
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))
    }

    /// Newest first.
    pub async fn get_transactions(&self, token_id: &TokenId, limit: usize) -> Result<Vec<Trade>> {
        self.get_token(token_id).await?;
        self.store.trades(token_id, clamp_limit(limit)).await
    }

    pub async fn recent_transactions(&self, limit: usize) -> Result<Vec<Trade>> {
        self.store.recent_trades(clamp_limit(limit)).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<Token>> {
        self.store.tokens().await
    }

    pub async fn tokens_by_creator(&self, creator_id: &WalletId) -> Result<Vec<Token>> {
        let mut tokens = self.store.tokens().await?;
        tokens.retain(|token| &token.creator_id == creator_id);
        Ok(tokens)
    }

    pub async fn create_token(&self, creator_id: &WalletId, request: NewToken) -> Result<Token> {
        let name = validate_name(&request.name)?;
        let symbol = validate_symbol(&request.symbol)?;
        let description = validate_description(&request.description)?;

        if self.store.wallet(creator_id).await?.is_none() {
            return Err(Error::WalletNotFound(creator_id.to_string()));
        }

        let config = self.engine.config();
        let created_at = self.engine.now();
        let token = Token {
            id: TokenId::new(format!("{}-{}-{}", creator_id, symbol, created_at.timestamp_millis())),
            name,
            symbol,
            description,
            creator_id: creator_id.clone(),
            total_supply: config.total_supply,
            current_price: config.launch_price,
            cumulative_volume: 0.0,
            tokens_sold: 0.0,
            created_at,
            last_trade_at: None,
        };
        let pool = Pool::seeded(config.launch_price, config.default_token_reserve);
        self.store.insert_token(token.clone(), pool).await?;

        info!("Wallet {} launched token {} ({})", creator_id, token.id, token.symbol);
        self.broadcaster
            .publish(Topic::Market, RealtimeEvent::NewToken { token: token.clone() })
            .await;
        Ok(token)
    }

    pub async fn trade(
        &self,
        token_id: &TokenId,
        wallet_id: &WalletId,
        side: TradeSide,
        amount: f64,
    ) -> Result<Settlement> {
        self.engine.settle(token_id, wallet_id, side, amount).await
    }

    pub async fn quote(&self, token_id: &TokenId, side: TradeSide, amount: f64) -> Result<Quote> {
        self.engine.quote(token_id, side, amount).await
    }
}

pub struct WalletService {
    store: Arc<dyn Store>,
    engine: Arc<TradeSettlementEngine>,
    config: WalletConfig,
}

impl WalletService {
    pub fn new(store: Arc<dyn Store>, engine: Arc<TradeSettlementEngine>, config: WalletConfig) -> Self {
        Self { store, engine, config }
    }

    /// Creates the wallet with the opening balance unless it already exists.
    pub async fn open_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        if wallet_id.as_str().trim().is_empty() {
            return Err(Error::ValidationError("Wallet id cannot be empty".to_string()));
        }
        self.store
            .open_wallet(Wallet::new(wallet_id.clone(), self.config.opening_balance))
            .await
    }

    pub async fn wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))
    }

    pub async fn faucet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.engine
            .credit_wallet(wallet_id, self.config.faucet_amount)
            .await
    }
}

fn clamp_limit(limit: usize) -> usize {
    match limit {
        0 => DEFAULT_TRANSACTION_LIMIT,
        n => n.min(MAX_TRANSACTION_LIMIT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use crate::trading::ManualClock;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        market: MarketService,
        wallets: WalletService,
        broadcaster: Arc<RealtimeBroadcaster>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(1e-4, 1_000));
        let broadcaster = Arc::new(RealtimeBroadcaster::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let engine = Arc::new(
            TradeSettlementEngine::new(
                EngineConfig::default(),
                store.clone(),
                broadcaster.clone(),
                clock.clone(),
            )
            .await
            .unwrap(),
        );
        Fixture {
            market: MarketService::new(store.clone(), engine.clone(), broadcaster.clone()),
            wallets: WalletService::new(store, engine, WalletConfig::default()),
            broadcaster,
            clock,
        }
    }

    fn frog() -> NewToken {
        NewToken {
            name: "Frog Coin".to_string(),
            symbol: "frog".to_string(),
            description: "Ribbit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_token_seeds_pool_and_announces() -> Result<()> {
        let f = fixture().await;
        let alice = WalletId::from("alice");
        f.wallets.open_wallet(&alice).await?;
        let mut market = f.broadcaster.subscribe_to(Topic::Market).await?;

        let token = f.market.create_token(&alice, frog()).await?;
        assert_eq!(token.id.as_str(), "alice-FROG-1700000000000");
        assert_eq!(token.symbol, "FROG");
        assert_eq!(token.current_price, 0.01);
        assert_eq!(token.total_supply, 100_000_000.0);

        let state = f.market.get_token_state(&token.id).await?;
        assert_eq!(state.trading.pool, Pool::seeded(0.01, 2_000_000.0));
        assert!(state.trading.holders.is_empty());
        assert!(state.trading.candles.values().all(Vec::is_empty));

        match market.recv().await.map(|envelope| envelope.event) {
            Some(RealtimeEvent::NewToken { token: announced }) => assert_eq!(announced, token),
            other => panic!("unexpected event {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_create_token_validation() -> Result<()> {
        let f = fixture().await;
        let alice = WalletId::from("alice");

        let err = f.market.create_token(&alice, frog()).await.unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));

        f.wallets.open_wallet(&alice).await?;
        let err = f
            .market
            .create_token(&alice, NewToken { symbol: "FR-OG".into(), ..frog() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        f.market.create_token(&alice, frog()).await?;
        let err = f.market.create_token(&alice, frog()).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_tokens_listing() -> Result<()> {
        let f = fixture().await;
        let alice = WalletId::from("alice");
        let bob = WalletId::from("bob");
        f.wallets.open_wallet(&alice).await?;
        f.wallets.open_wallet(&bob).await?;

        let first = f.market.create_token(&alice, frog()).await?;
        f.clock.advance(std::time::Duration::from_secs(1));
        let second = f
            .market
            .create_token(&bob, NewToken { symbol: "TOAD".into(), ..frog() })
            .await?;

        let all = f.market.list_tokens().await?;
        assert_eq!(all.iter().map(|t| &t.id).collect::<Vec<_>>(), vec![&second.id, &first.id]);
        assert_eq!(f.market.tokens_by_creator(&alice).await?, vec![first]);
        Ok(())
    }

    #[tokio::test]
    async fn test_transactions_for_unknown_token() {
        let f = fixture().await;
        let err = f
            .market
            .get_transactions(&TokenId::from("nope"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenNotFound(_)));
    }

    #[tokio::test]
    async fn test_wallet_opening_and_faucet() -> Result<()> {
        let f = fixture().await;
        let alice = WalletId::from("alice");

        let opened = f.wallets.open_wallet(&alice).await?;
        assert_eq!(opened.base_balance, 10_000.0);

        let mut updates = f.broadcaster.subscribe_to(Topic::Wallet(alice.clone())).await?;
        let funded = f.wallets.faucet(&alice).await?;
        assert_eq!(funded.base_balance, 10_100.0);

        let reopened = f.wallets.open_wallet(&alice).await?;
        assert_eq!(reopened.base_balance, 10_100.0);

        match updates.recv().await.map(|envelope| envelope.event) {
            Some(RealtimeEvent::WalletUpdate { trade_id, wallet }) => {
                assert_eq!(trade_id, None);
                assert_eq!(wallet.base_balance, 10_100.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(f.wallets.open_wallet(&WalletId::from("  ")).await.is_err());
        Ok(())
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), DEFAULT_TRANSACTION_LIMIT);
        assert_eq!(clamp_limit(10), 10);
        assert_eq!(clamp_limit(10_000), MAX_TRANSACTION_LIMIT);
    }
}
