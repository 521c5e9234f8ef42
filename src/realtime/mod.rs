//! Topic fan-out of post-trade state to connected observers.
//!
//! Delivery is at-most-once with no replay. An observer that reconnects must
//! load a fresh snapshot before applying incremental messages again.
//!
//! Each observer has a bounded queue. One that falls a full queue behind is
//! disconnected rather than buffered without limit.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::metrics::{REALTIME_MESSAGES, REALTIME_SUBSCRIBERS};
use crate::models::{Token, TokenId, Trade, TradeId, TradingState, Wallet, WalletId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Topic {
    Token(TokenId),
    Wallet(WalletId),
    /// Market-wide announcements such as newly minted tokens.
    Market,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Token(id) => write!(f, "token:{}", id),
            Topic::Wallet(id) => write!(f, "wallet:{}", id),
            Topic::Market => f.write_str("market"),
        }
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("token", id)) if !id.is_empty() => Ok(Topic::Token(TokenId::from(id))),
            Some(("wallet", id)) if !id.is_empty() => Ok(Topic::Wallet(WalletId::from(id))),
            None if s == "market" => Ok(Topic::Market),
            _ => Err(Error::ValidationError(format!("Unknown topic '{}'", s))),
        }
    }
}

impl TryFrom<String> for Topic {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

/// Messages pushed to observers. Settlement messages carry the id of the
/// trade that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RealtimeEvent {
    Trade {
        trade_id: TradeId,
        trade: Trade,
    },
    WalletUpdate {
        trade_id: Option<TradeId>,
        wallet: Wallet,
    },
    TokenUpdate {
        trade_id: TradeId,
        token: Token,
    },
    TradingStateUpdate {
        trade_id: TradeId,
        state: TradingState,
    },
    NewToken {
        token: Token,
    },
}

impl RealtimeEvent {
    pub fn trade_id(&self) -> Option<TradeId> {
        match self {
            RealtimeEvent::Trade { trade_id, .. }
            | RealtimeEvent::TokenUpdate { trade_id, .. }
            | RealtimeEvent::TradingStateUpdate { trade_id, .. } => Some(*trade_id),
            RealtimeEvent::WalletUpdate { trade_id, .. } => *trade_id,
            RealtimeEvent::NewToken { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub event: RealtimeEvent,
}

pub type SubscriberId = u64;

/// Messages queued per observer before it counts as lagging.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Receiving end held by one observer.
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    receiver: mpsc::Receiver<Envelope>,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct Registry {
    senders: HashMap<SubscriberId, mpsc::Sender<Envelope>>,
    topics: HashMap<Topic, HashSet<SubscriberId>>,
}

impl Registry {
    fn remove(&mut self, id: SubscriberId) {
        self.senders.remove(&id);
        self.topics.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
    }

    /// Returns how many observers received the message.
    fn deliver(&mut self, topic: &Topic, event: &RealtimeEvent) -> usize {
        let Some(subscribers) = self.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        let mut lagging = Vec::new();
        for id in subscribers {
            let Some(sender) = self.senders.get(id) else {
                continue;
            };
            let envelope = Envelope {
                topic: topic.clone(),
                event: event.clone(),
            };
            match sender.try_send(envelope) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => lagging.push(*id),
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            debug!("Dropping disconnected subscriber {}", id);
            self.remove(id);
        }
        for id in lagging {
            warn!("Disconnecting subscriber {}: queue full", id);
            self.remove(id);
        }
        delivered
    }
}

#[derive(Debug)]
pub struct RealtimeBroadcaster {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    buffer: usize,
}

impl Default for RealtimeBroadcaster {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl RealtimeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            registry: Mutex::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    /// Registers an observer with no topics yet.
    pub async fn register(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::channel(self.buffer);
        let mut registry = self.registry.lock().await;
        registry.senders.insert(id, sender);
        REALTIME_SUBSCRIBERS.set(registry.senders.len() as i64);
        Subscriber { id, receiver }
    }

    /// Registers an observer already subscribed to `topic`.
    pub async fn subscribe_to(&self, topic: Topic) -> Result<Subscriber> {
        let subscriber = self.register().await;
        self.subscribe(subscriber.id, topic).await?;
        Ok(subscriber)
    }

    pub async fn subscribe(&self, id: SubscriberId, topic: Topic) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if !registry.senders.contains_key(&id) {
            return Err(Error::ValidationError(format!("Unknown subscriber {}", id)));
        }
        debug!("Subscriber {} joined {}", id, topic);
        registry.topics.entry(topic).or_default().insert(id);
        Ok(())
    }

    pub async fn unsubscribe(&self, id: SubscriberId, topic: &Topic) {
        let mut registry = self.registry.lock().await;
        if let Some(subscribers) = registry.topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                registry.topics.remove(topic);
            }
        }
    }

    pub async fn disconnect(&self, id: SubscriberId) {
        let mut registry = self.registry.lock().await;
        registry.remove(id);
        REALTIME_SUBSCRIBERS.set(registry.senders.len() as i64);
    }

    pub async fn publish(&self, topic: Topic, event: RealtimeEvent) -> usize {
        self.publish_batch(vec![(topic, event)]).await
    }

    /// Delivers all messages under one registry lock, so observers receive
    /// them contiguously with nothing from another publisher in between.
    pub async fn publish_batch(&self, messages: Vec<(Topic, RealtimeEvent)>) -> usize {
        let mut registry = self.registry.lock().await;
        let delivered: usize = messages
            .iter()
            .map(|(topic, event)| registry.deliver(topic, event))
            .sum();
        REALTIME_MESSAGES.inc_by(delivered as u64);
        REALTIME_SUBSCRIBERS.set(registry.senders.len() as i64);
        delivered
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, HashSet::len)
    }
}
