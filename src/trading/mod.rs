mod candles;
mod clock;
mod cooldown;
mod curve;
mod engine;
mod holders;
mod locks;

pub use candles::{CandleAggregator, DEFAULT_MAX_CANDLES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::CooldownTracker;
pub use curve::{PriceCurve, Quote};
pub use engine::{Settlement, TradeSettlementEngine};
pub use holders::HolderLedger;
pub use locks::{KeyedLocks, SettlementGuard, SettlementLocks};
