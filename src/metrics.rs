use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref TRADES_SETTLED: IntCounterVec = IntCounterVec::new(
        Opts::new("trades_settled_total", "Total number of settled trades"),
        &["side"]
    ).expect("valid trades_settled_total metric");

    pub static ref TRADES_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("trades_rejected_total", "Total number of rejected or failed trades"),
        &["kind"]
    ).expect("valid trades_rejected_total metric");

    pub static ref SETTLEMENT_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "settlement_latency_seconds",
            "Time spent inside the settlement critical section"
        ).buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5])
    ).expect("valid settlement_latency_seconds metric");

    pub static ref POOL_SELF_HEALS: IntCounter = IntCounter::new(
        "pool_self_heals_total",
        "Pools reseeded after their invariant was found broken"
    ).expect("valid pool_self_heals_total metric");

    pub static ref REALTIME_MESSAGES: IntCounter = IntCounter::new(
        "realtime_messages_total",
        "Realtime messages delivered to subscribers"
    ).expect("valid realtime_messages_total metric");

    pub static ref REALTIME_SUBSCRIBERS: IntGauge = IntGauge::new(
        "realtime_subscribers",
        "Currently registered realtime subscribers"
    ).expect("valid realtime_subscribers metric");
}

pub fn init() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(TRADES_SETTLED.clone()))?;
    REGISTRY.register(Box::new(TRADES_REJECTED.clone()))?;
    REGISTRY.register(Box::new(SETTLEMENT_LATENCY.clone()))?;
    REGISTRY.register(Box::new(POOL_SELF_HEALS.clone()))?;
    REGISTRY.register(Box::new(REALTIME_MESSAGES.clone()))?;
    REGISTRY.register(Box::new(REALTIME_SUBSCRIBERS.clone()))?;
    Ok(())
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
