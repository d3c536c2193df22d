use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;

/// Counters shared by the controllers. Clones share the underlying values.
#[derive(Clone, Default)]
pub struct Metrics {
    pub games_started: Counter<u64, AtomicU64>,
    pub games_settled: Counter<u64, AtomicU64>,
    pub games_reaped: Counter<u64, AtomicU64>,
    pub wagered_micros: Counter<u64, AtomicU64>,
    pub paid_micros: Counter<u64, AtomicU64>,
    pub referral_micros: Counter<u64, AtomicU64>,
    pub randomness_failures: Counter<u64, AtomicU64>,
    pub settlement_failures: Counter<u64, AtomicU64>,
    pub pvp_finished: Counter<u64, AtomicU64>,
    pub pvp_review: Counter<u64, AtomicU64>,
    pub active_sessions: Gauge,
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "games_started",
            "Number of single-player games whose stake was taken",
            metrics.games_started.clone(),
        );
        registry.register(
            "games_settled",
            "Number of single-player games settled",
            metrics.games_settled.clone(),
        );
        registry.register(
            "games_reaped",
            "Number of sessions torn down by the reaper",
            metrics.games_reaped.clone(),
        );
        registry.register(
            "wagered_micros",
            "Main-currency stake taken, in micro-units",
            metrics.wagered_micros.clone(),
        );
        registry.register(
            "paid_micros",
            "Main-currency winnings credited, in micro-units",
            metrics.paid_micros.clone(),
        );
        registry.register(
            "referral_micros",
            "Referral commissions credited, in micro-units",
            metrics.referral_micros.clone(),
        );
        registry.register(
            "randomness_failures",
            "Number of throws the platform failed to deliver",
            metrics.randomness_failures.clone(),
        );
        registry.register(
            "settlement_failures",
            "Number of settlements that could not be persisted",
            metrics.settlement_failures.clone(),
        );
        registry.register(
            "pvp_finished",
            "Number of PvP matches paid out",
            metrics.pvp_finished.clone(),
        );
        registry.register(
            "pvp_review",
            "Number of PvP matches parked for manual review",
            metrics.pvp_review.clone(),
        );
        registry.register(
            "active_sessions",
            "Single-player sessions currently in flight",
            metrics.active_sessions.clone(),
        );
        metrics
    }
}

/// Renders `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> String {
    let mut buffer = String::new();
    if let Err(err) = encode(&mut buffer, registry) {
        tracing::error!(?err, "metrics encoding failed");
    }
    buffer
}
