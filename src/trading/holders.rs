use std::collections::HashMap;

use crate::models::{Holder, Trade, TradeSide, WalletId};

/// Net token position per wallet for one token, derived from its trades.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HolderLedger {
    balances: HashMap<WalletId, f64>,
}

impl HolderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays trades (already filtered to one token) in settlement order.
    pub fn rebuild<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> Self {
        let mut ledger = Self::new();
        for trade in trades {
            ledger.apply(trade);
        }
        ledger
    }

    pub fn apply(&mut self, trade: &Trade) {
        let current = self.balances.get(&trade.wallet_id).copied().unwrap_or(0.0);
        let updated = match trade.side {
            TradeSide::Buy => current + trade.token_amount,
            TradeSide::Sell => current - trade.token_amount,
        };
        if updated <= 0.0 {
            self.balances.remove(&trade.wallet_id);
        } else {
            self.balances.insert(trade.wallet_id.clone(), updated);
        }
    }

    pub fn amount(&self, wallet_id: &WalletId) -> f64 {
        self.balances.get(wallet_id).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Holders by amount descending, ties broken by wallet id ascending.
    pub fn snapshot(&self, total_supply: f64) -> Vec<Holder> {
        let mut holders: Vec<Holder> = self
            .balances
            .iter()
            .map(|(wallet_id, amount)| Holder {
                wallet_id: wallet_id.clone(),
                amount: *amount,
                share: if total_supply > 0.0 { amount / total_supply } else { 0.0 },
            })
            .collect();
        holders.sort_by(|a, b| {
            b.amount
                .total_cmp(&a.amount)
                .then_with(|| a.wallet_id.cmp(&b.wallet_id))
        });
        holders
    }
}
