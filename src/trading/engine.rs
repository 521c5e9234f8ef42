use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Clock, CooldownTracker, PriceCurve, Quote, SettlementLocks};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics::{POOL_SELF_HEALS, SETTLEMENT_LATENCY, TRADES_REJECTED, TRADES_SETTLED};
use crate::models::{Pool, Token, TokenId, Trade, TradeId, TradeSide, Wallet, WalletId};
use crate::realtime::{RealtimeBroadcaster, RealtimeEvent, Topic};
use crate::store::{SettlementBatch, Store, SNAPSHOT_CANDLE_LIMIT};
use crate::validation::validate_amount;

/// Everything a caller learns about an accepted trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub trade: Trade,
    pub pool: Pool,
    pub wallet: Wallet,
    pub token: Token,
}

pub struct TradeSettlementEngine {
    store: Arc<dyn Store>,
    broadcaster: Arc<RealtimeBroadcaster>,
    locks: SettlementLocks,
    cooldowns: CooldownTracker,
    curve: PriceCurve,
    clock: Arc<dyn Clock>,
    next_trade_id: AtomicU64,
    config: EngineConfig,
}

impl TradeSettlementEngine {
    /// Trade ids continue after the highest id already in the store, and
    /// cooldowns still running at startup are restored from the trade log.
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        broadcaster: Arc<RealtimeBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let last_id = store.last_trade_id().await?.map_or(0, |id| id.0);
        info!("Settlement engine starting after trade id {}", last_id);

        let cooldowns = CooldownTracker::new(config.trade_cooldown());
        let cutoff = clock.now() - chrono::Duration::seconds(config.trade_cooldown_secs as i64);
        let recent = store.trades_since(cutoff).await?;
        for trade in &recent {
            cooldowns.record(&trade.wallet_id, &trade.token_id, trade.timestamp).await;
        }
        if !recent.is_empty() {
            debug!("Restored cooldowns from {} recent trades", recent.len());
        }

        Ok(Self {
            store,
            broadcaster,
            locks: SettlementLocks::new(),
            cooldowns,
            curve: PriceCurve::from_config(&config),
            clock,
            next_trade_id: AtomicU64::new(last_id),
            config,
        })
    }

    pub fn curve(&self) -> &PriceCurve {
        &self.curve
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn settle(
        &self,
        token_id: &TokenId,
        wallet_id: &WalletId,
        side: TradeSide,
        amount: f64,
    ) -> Result<Settlement> {
        let timer = SETTLEMENT_LATENCY.start_timer();
        let result = self.settle_locked(token_id, wallet_id, side, amount).await;
        timer.observe_duration();

        match &result {
            Ok(settlement) => {
                TRADES_SETTLED
                    .with_label_values(&[side.to_string().as_str()])
                    .inc();
                info!(
                    "Settled trade {}: {} {} {} for {} at {:.8}",
                    settlement.trade.id,
                    wallet_id,
                    side,
                    settlement.trade.token_amount,
                    settlement.trade.base_amount,
                    settlement.trade.execution_price
                );
            }
            Err(e) => {
                TRADES_REJECTED.with_label_values(&[e.kind()]).inc();
                if e.is_rejection() {
                    debug!("Rejected {} of {} on {} by {}: {}", side, amount, token_id, wallet_id, e);
                } else {
                    error!("Settlement of {} on {} by {} failed: {}", side, token_id, wallet_id, e);
                }
            }
        }
        result
    }

    async fn settle_locked(
        &self,
        token_id: &TokenId,
        wallet_id: &WalletId,
        side: TradeSide,
        amount: f64,
    ) -> Result<Settlement> {
        validate_amount(amount)?;

        // Held until the broadcast below has been handed to every subscriber.
        let _guard = self.locks.acquire(token_id, wallet_id).await;

        let mut token = self
            .store
            .token(token_id)
            .await?
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))?;
        let stored_pool = self.store.pool(token_id).await?;
        let mut wallet = self
            .store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;

        let now = self.clock.now();
        let executed_at = token.last_trade_at.map_or(now, |last| now.max(last));
        self.cooldowns.check(wallet_id, token_id, executed_at).await?;

        let available = match side {
            TradeSide::Buy => wallet.base_balance,
            TradeSide::Sell => wallet.token_balance(token_id),
        };
        if amount > available {
            return Err(Error::InsufficientBalance(format!(
                "{} of {} exceeds available {}",
                side, amount, available
            )));
        }

        let pool = self.usable_pool(&token, stored_pool)?;
        let quote = self.curve.quote(&pool, side, amount)?;

        let trade = Trade {
            id: TradeId(self.next_trade_id.fetch_add(1, Ordering::SeqCst) + 1),
            token_id: token_id.clone(),
            wallet_id: wallet_id.clone(),
            side,
            base_amount: quote.base_amount(),
            token_amount: quote.token_amount(),
            execution_price: quote.execution_price,
            timestamp: executed_at,
        };

        apply_to_token(&mut token, &trade);
        apply_to_wallet(&mut wallet, &trade);

        self.store
            .commit(SettlementBatch {
                token: token.clone(),
                pool: quote.pool,
                wallet: wallet.clone(),
                trade: trade.clone(),
            })
            .await
            .map_err(|e| match e {
                Error::PersistenceFailure(_) => e,
                other => Error::PersistenceFailure(other.to_string()),
            })?;

        self.cooldowns.record(wallet_id, token_id, executed_at).await;
        self.broadcast_settlement(&trade, &token, &wallet).await;

        Ok(Settlement {
            trade,
            pool: quote.pool,
            wallet,
            token,
        })
    }

    /// Returns the pool to price against, reseeding it from the token's last
    /// price when the stored reserves no longer satisfy the invariant.
    fn usable_pool(&self, token: &Token, stored: Option<Pool>) -> Result<Pool> {
        let (pool, healed) = reseed_if_broken(&self.config, token, stored)?;
        if healed {
            POOL_SELF_HEALS.inc();
            warn!(
                "Pool for token {} broke its invariant ({:?}); reseeded to base={} tokens={}",
                token.id, stored, pool.base_reserve, pool.token_reserve
            );
        }
        Ok(pool)
    }

    async fn broadcast_settlement(&self, trade: &Trade, token: &Token, wallet: &Wallet) {
        let token_topic = Topic::Token(trade.token_id.clone());
        let mut messages = vec![
            (
                token_topic.clone(),
                RealtimeEvent::Trade {
                    trade_id: trade.id,
                    trade: trade.clone(),
                },
            ),
            (
                Topic::Wallet(wallet.id.clone()),
                RealtimeEvent::WalletUpdate {
                    trade_id: Some(trade.id),
                    wallet: wallet.clone(),
                },
            ),
            (
                token_topic.clone(),
                RealtimeEvent::TokenUpdate {
                    trade_id: trade.id,
                    token: token.clone(),
                },
            ),
        ];

        match self.store.token_state(&trade.token_id, SNAPSHOT_CANDLE_LIMIT).await {
            Ok(Some(state)) => messages.push((
                token_topic,
                RealtimeEvent::TradingStateUpdate {
                    trade_id: trade.id,
                    state: state.trading,
                },
            )),
            Ok(None) => warn!("Token {} vanished before its state could be broadcast", trade.token_id),
            Err(e) => warn!("Could not load state of token {} for broadcast: {}", trade.token_id, e),
        }

        self.broadcaster.publish_batch(messages).await;
    }

    /// Credits base currency to a wallet outside of any trade.
    pub async fn credit_wallet(&self, wallet_id: &WalletId, amount: f64) -> Result<Wallet> {
        validate_amount(amount)?;
        let _guard = self.locks.wallet(wallet_id).await;

        let mut wallet = self
            .store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;
        wallet.base_balance += amount;
        self.store.put_wallet(wallet.clone()).await?;

        info!("Credited {} to wallet {}", amount, wallet_id);
        self.broadcaster
            .publish(
                Topic::Wallet(wallet_id.clone()),
                RealtimeEvent::WalletUpdate {
                    trade_id: None,
                    wallet: wallet.clone(),
                },
            )
            .await;
        Ok(wallet)
    }

    /// Prices a trade against the current pool without locking or writing.
    pub async fn quote(&self, token_id: &TokenId, side: TradeSide, amount: f64) -> Result<Quote> {
        let token = self
            .store
            .token(token_id)
            .await?
            .ok_or_else(|| Error::TokenNotFound(token_id.to_string()))?;
        let stored = self.store.pool(token_id).await?;
        let (pool, _) = reseed_if_broken(&self.config, &token, stored)?;
        self.curve.quote(&pool, side, amount)
    }
}

fn reseed_if_broken(config: &EngineConfig, token: &Token, stored: Option<Pool>) -> Result<(Pool, bool)> {
    if let Some(pool) = stored {
        if pool.invariant_holds(config.invariant_tolerance) {
            return Ok((pool, false));
        }
    }

    let price = token.current_price;
    if !(price.is_finite() && price > 0.0) {
        return Err(Error::PoolInvariantBroken(format!(
            "pool of token {} is broken and its price {} cannot reseed it",
            token.id, price
        )));
    }
    let token_reserve = stored
        .map(|pool| pool.token_reserve)
        .filter(|reserve| reserve.is_finite() && *reserve > 0.0)
        .unwrap_or(config.default_token_reserve);
    Ok((Pool::seeded(price, token_reserve), true))
}

fn apply_to_token(token: &mut Token, trade: &Trade) {
    token.current_price = trade.execution_price;
    token.cumulative_volume += trade.base_amount;
    token.tokens_sold = match trade.side {
        TradeSide::Buy => token.tokens_sold + trade.token_amount,
        TradeSide::Sell => (token.tokens_sold - trade.token_amount).max(0.0),
    };
    token.last_trade_at = Some(trade.timestamp);
}

fn apply_to_wallet(wallet: &mut Wallet, trade: &Trade) {
    let held = wallet.token_balance(&trade.token_id);
    let (base_balance, token_balance) = match trade.side {
        TradeSide::Buy => (wallet.base_balance - trade.base_amount, held + trade.token_amount),
        TradeSide::Sell => (wallet.base_balance + trade.base_amount, held - trade.token_amount),
    };
    wallet.base_balance = base_balance;
    wallet.token_balances.insert(trade.token_id.clone(), token_balance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MockStore};
    use crate::trading::ManualClock;
    use chrono::TimeZone;

    fn launch_token(id: &str) -> Token {
        Token {
            id: TokenId::from(id),
            name: "Frog".to_string(),
            symbol: "FROG".to_string(),
            description: "Ribbit".to_string(),
            creator_id: WalletId::from("creator"),
            total_supply: 100_000_000.0,
            current_price: 0.01,
            cumulative_volume: 0.0,
            tokens_sold: 0.0,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            last_trade_at: None,
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_100, 0).unwrap()))
    }

    async fn memory_engine(pool: Pool) -> (TradeSettlementEngine, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new(1e-4, 1_000));
        store.insert_token(launch_token("frog"), pool).await.unwrap();
        store
            .open_wallet(Wallet::new(WalletId::from("alice"), 10_000.0))
            .await
            .unwrap();
        let clock = clock();
        let engine = TradeSettlementEngine::new(
            EngineConfig::default(),
            store.clone(),
            Arc::new(RealtimeBroadcaster::new()),
            clock.clone(),
        )
        .await
        .unwrap();
        (engine, store, clock)
    }

    fn failing_store(failure: Error) -> MockStore {
        let mut store = MockStore::new();
        store.expect_last_trade_id().returning(|| Ok(None));
        store.expect_trades_since().returning(|_| Ok(Vec::new()));
        store
            .expect_token()
            .returning(|_| Ok(Some(launch_token("frog"))));
        store
            .expect_pool()
            .returning(|_| Ok(Some(Pool::new(20_000.0, 2_000_000.0))));
        store
            .expect_wallet()
            .returning(|id| Ok(Some(Wallet::new(id.clone(), 10_000.0))));
        let mut failure = Some(failure);
        store
            .expect_commit()
            .times(1)
            .returning(move |_| Err(failure.take().unwrap_or_else(|| Error::InternalError("again".into()))));
        store
    }

    #[tokio::test]
    async fn test_commit_failure_is_persistence_failure_and_silent() -> Result<()> {
        let broadcaster = Arc::new(RealtimeBroadcaster::new());
        let mut watcher = broadcaster
            .subscribe_to(Topic::Token(TokenId::from("frog")))
            .await?;
        let engine = TradeSettlementEngine::new(
            EngineConfig::default(),
            Arc::new(failing_store(Error::PersistenceFailure("disk full".into()))),
            broadcaster.clone(),
            clock(),
        )
        .await?;

        let err = engine
            .settle(&TokenId::from("frog"), &WalletId::from("alice"), TradeSide::Buy, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure(_)));
        assert!(watcher.try_recv().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_store_errors_during_commit_become_persistence_failures() -> Result<()> {
        let engine = TradeSettlementEngine::new(
            EngineConfig::default(),
            Arc::new(failing_store(Error::InternalError("connection reset".into()))),
            Arc::new(RealtimeBroadcaster::new()),
            clock(),
        )
        .await?;

        let err = engine
            .settle(&TokenId::from("frog"), &WalletId::from("alice"), TradeSide::Buy, 100.0)
            .await
            .unwrap_err();
        match err {
            Error::PersistenceFailure(message) => assert!(message.contains("connection reset")),
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_start_cooldown() -> Result<()> {
        let mut store = MockStore::new();
        store.expect_last_trade_id().returning(|| Ok(Some(TradeId(41))));
        store.expect_trades_since().returning(|_| Ok(Vec::new()));
        store
            .expect_token()
            .returning(|_| Ok(Some(launch_token("frog"))));
        store
            .expect_pool()
            .returning(|_| Ok(Some(Pool::new(20_000.0, 2_000_000.0))));
        store
            .expect_wallet()
            .returning(|id| Ok(Some(Wallet::new(id.clone(), 10_000.0))));
        store
            .expect_commit()
            .withf(|batch| batch.trade.id > TradeId(41))
            .times(2)
            .returning(|_| Err(Error::PersistenceFailure("disk full".into())));

        let engine = TradeSettlementEngine::new(
            EngineConfig::default(),
            Arc::new(store),
            Arc::new(RealtimeBroadcaster::new()),
            clock(),
        )
        .await?;

        let token = TokenId::from("frog");
        let wallet = WalletId::from("alice");
        for _ in 0..2 {
            let err = engine.settle(&token, &wallet, TradeSide::Buy, 10.0).await.unwrap_err();
            assert!(matches!(err, Error::PersistenceFailure(_)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rejections_mutate_nothing() -> Result<()> {
        let (engine, store, _) = memory_engine(Pool::new(20_000.0, 2_000_000.0)).await;
        let token = TokenId::from("frog");
        let alice = WalletId::from("alice");

        let err = engine.settle(&token, &alice, TradeSide::Buy, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        let err = engine.settle(&token, &alice, TradeSide::Buy, 10_000.5).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance(_)));
        let err = engine.settle(&token, &alice, TradeSide::Sell, 1.0).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance(_)));
        let err = engine
            .settle(&token, &WalletId::from("ghost"), TradeSide::Buy, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));
        let err = engine
            .settle(&TokenId::from("toad"), &alice, TradeSide::Buy, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenNotFound(_)));

        assert_eq!(store.pool(&token).await?, Some(Pool::new(20_000.0, 2_000_000.0)));
        assert_eq!(store.wallet(&alice).await?.unwrap().base_balance, 10_000.0);
        assert_eq!(store.last_trade_id().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_settle_updates_token_and_wallet() -> Result<()> {
        let (engine, store, clock) = memory_engine(Pool::new(20_000.0, 2_000_000.0)).await;
        let token = TokenId::from("frog");
        let alice = WalletId::from("alice");

        let bought = engine.settle(&token, &alice, TradeSide::Buy, 1_000.0).await?;
        assert_eq!(bought.trade.id, TradeId(1));
        assert_eq!(bought.trade.timestamp, clock.now());
        assert_eq!(bought.wallet.base_balance, 9_000.0);
        assert_eq!(bought.wallet.token_balance(&token), bought.trade.token_amount);
        assert_eq!(bought.token.cumulative_volume, 1_000.0);
        assert_eq!(bought.token.tokens_sold, bought.trade.token_amount);
        assert_eq!(bought.token.current_price, bought.trade.execution_price);
        assert_eq!(store.token(&token).await?, Some(bought.token.clone()));

        clock.advance(std::time::Duration::from_secs(5));
        let held = bought.trade.token_amount;
        let sold = engine.settle(&token, &alice, TradeSide::Sell, held).await?;
        assert_eq!(sold.trade.id, TradeId(2));
        assert_eq!(sold.wallet.token_balance(&token), 0.0);
        assert!(sold.wallet.base_balance < 10_000.0);
        assert_eq!(sold.token.tokens_sold, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_trade_timestamps_never_go_backwards() -> Result<()> {
        let (engine, store, clock) = memory_engine(Pool::new(20_000.0, 2_000_000.0)).await;
        let token = TokenId::from("frog");
        store
            .open_wallet(Wallet::new(WalletId::from("bob"), 10_000.0))
            .await?;

        let first = engine.settle(&token, &WalletId::from("alice"), TradeSide::Buy, 10.0).await?;
        clock.set(first.trade.timestamp - chrono::Duration::seconds(30));
        let second = engine.settle(&token, &WalletId::from("bob"), TradeSide::Buy, 10.0).await?;

        assert_eq!(second.trade.timestamp, first.trade.timestamp);
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_pool_is_reseeded_from_price() -> Result<()> {
        let broken = Pool {
            base_reserve: 55_000.0,
            token_reserve: 2_000_000.0,
            invariant: 4e10,
        };
        let (engine, store, _) = memory_engine(broken).await;
        let token = TokenId::from("frog");

        let quote = engine.quote(&token, TradeSide::Buy, 100.0).await?;
        let expected = engine.curve().buy(&Pool::seeded(0.01, 2_000_000.0), 100.0)?;
        assert_eq!(quote, expected);

        let settled = engine.settle(&token, &WalletId::from("alice"), TradeSide::Buy, 100.0).await?;
        assert_eq!(settled.pool, expected.pool);
        assert!(settled.pool.invariant_holds(1e-9));
        assert_eq!(store.pool(&token).await?, Some(expected.pool));
        Ok(())
    }

    #[test]
    fn test_broken_pool_without_price_cannot_heal() {
        let mut token = launch_token("frog");
        token.current_price = 0.0;
        let broken = Pool {
            base_reserve: f64::NAN,
            token_reserve: 2_000_000.0,
            invariant: 4e10,
        };
        let err = reseed_if_broken(&EngineConfig::default(), &token, Some(broken)).unwrap_err();
        assert!(matches!(err, Error::PoolInvariantBroken(_)));
    }

    #[test]
    fn test_missing_pool_uses_default_reserve() {
        let (pool, healed) = reseed_if_broken(&EngineConfig::default(), &launch_token("frog"), None).unwrap();
        assert!(healed);
        assert_eq!(pool.token_reserve, 2_000_000.0);
        assert!((pool.base_reserve - 20_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_credit_wallet() -> Result<()> {
        let (engine, _, _) = memory_engine(Pool::new(20_000.0, 2_000_000.0)).await;
        let wallet = engine.credit_wallet(&WalletId::from("alice"), 100.0).await?;
        assert_eq!(wallet.base_balance, 10_100.0);

        let err = engine
            .credit_wallet(&WalletId::from("ghost"), 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(_)));
        Ok(())
    }
}
