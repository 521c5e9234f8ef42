use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{TokenId, WalletId};

/// One async mutex per key, created on first use.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

/// Exclusive access to a token's pool and a trading wallet, held for the
/// whole settlement critical section.
pub struct SettlementGuard {
    _token: OwnedMutexGuard<()>,
    _wallet: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
pub struct SettlementLocks {
    tokens: KeyedLocks<TokenId>,
    wallets: KeyedLocks<WalletId>,
}

impl SettlementLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always token first, then wallet.
    pub async fn acquire(&self, token_id: &TokenId, wallet_id: &WalletId) -> SettlementGuard {
        let token = self.tokens.lock(token_id).await;
        let wallet = self.wallets.lock(wallet_id).await;
        SettlementGuard {
            _token: token,
            _wallet: wallet,
        }
    }

    /// Wallet-only mutations (funding) that never touch a pool.
    pub async fn wallet(&self, wallet_id: &WalletId) -> OwnedMutexGuard<()> {
        self.wallets.lock(wallet_id).await
    }
}
