use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::{TokenId, WalletId};

/// Minimum spacing between accepted settlements of one wallet on one token.
#[derive(Debug)]
pub struct CooldownTracker {
    last_accepted: Mutex<HashMap<(WalletId, TokenId), DateTime<Utc>>>,
    window: Duration,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            last_accepted: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub async fn check(&self, wallet_id: &WalletId, token_id: &TokenId, now: DateTime<Utc>) -> Result<()> {
        let last_accepted = self.last_accepted.lock().await;
        let Some(last) = last_accepted.get(&(wallet_id.clone(), token_id.clone())) else {
            return Ok(());
        };

        let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
        if elapsed < self.window {
            let remaining = self.window - elapsed;
            debug!(
                "Cooldown for wallet {} on token {}: {:?} remaining",
                wallet_id, token_id, remaining
            );
            return Err(Error::TradeCooldown { remaining });
        }
        Ok(())
    }

    pub async fn record(&self, wallet_id: &WalletId, token_id: &TokenId, accepted_at: DateTime<Utc>) {
        let mut last_accepted = self.last_accepted.lock().await;
        self.cleanup_expired(&mut last_accepted, accepted_at);
        last_accepted.insert((wallet_id.clone(), token_id.clone()), accepted_at);
    }

    fn cleanup_expired(
        &self,
        last_accepted: &mut HashMap<(WalletId, TokenId), DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let window = chrono::Duration::milliseconds(self.window.as_millis() as i64);
        last_accepted.retain(|_, at| now.signed_duration_since(*at) < window);
    }
}
