//! Observability actor.
//!
//! Emits a compact delta-encoded counter line per pool per tick, a full
//! detail dump every Nth tick, and self-widening anomaly alerts when the
//! live collections drift from the created/destroyed ledger or when the
//! orphan counter climbs. Unlike the groomer and size adjuster this actor
//! is never auto-restarted — a dead state logger is a symptom worth
//! noticing, not one to paper over.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::GroomerConfig;
use crate::events::{EventSink, Severity};
use crate::pool::{ConnectionPool, PoolSnapshot};

/// Per-pool logger state: previous snapshot for delta encoding plus the
/// current alert thresholds, which double after each firing.
struct LoggerState {
    last: Option<PoolSnapshot>,
    drift_threshold: u64,
    orphan_threshold: u64,
}

/// Periodic counter reporter with anomaly alerts.
pub struct StateLogger {
    config: GroomerConfig,
    events: Arc<dyn EventSink>,
    pools: RwLock<Vec<Arc<ConnectionPool>>>,
    state: Mutex<HashMap<String, LoggerState>>,
}

impl StateLogger {
    pub fn new(config: GroomerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            events,
            pools: RwLock::new(Vec::new()),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pool for reporting.
    pub fn register(&self, pool: Arc<ConnectionPool>) {
        self.pools.write().push(pool);
    }

    /// Emit one tick's worth of reporting. Exposed for the run loop and
    /// for deterministic tests.
    pub fn tick(&self, tick_no: u64) {
        let pools: Vec<_> = self.pools.read().clone();
        let detail = tick_no % self.config.detail_every == 0;
        let mut state = self.state.lock();

        for pool in pools {
            let snap = pool.snapshot();
            let entry = state
                .entry(pool.name().to_string())
                .or_insert_with(|| LoggerState {
                    last: None,
                    drift_threshold: self.config.drift_alert_threshold,
                    orphan_threshold: self.config.orphan_alert_threshold,
                });

            Self::log_compact(&snap, entry.last.as_ref());
            if detail {
                info!(
                    pool = %snap.name,
                    size = snap.size,
                    active = snap.active,
                    free = snap.free,
                    created = snap.created,
                    destroyed = snap.destroyed,
                    closed = snap.closed,
                    aged = snap.aged,
                    idle_closed = snap.idle_closed,
                    active_closed = snap.active_closed,
                    aged_closed = snap.aged_closed,
                    orphans = snap.orphans,
                    background_requests = snap.background_requests,
                    "Pool state detail"
                );
                self.events.emit(
                    "pool_state",
                    &snap.name,
                    serde_json::to_value(&snap).unwrap_or_default(),
                    Severity::Info,
                );
            }

            self.check_anomalies(&snap, entry);
            entry.last = Some(snap);
        }
    }

    /// One compact line per pool, counters delta-encoded against the
    /// previous tick.
    fn log_compact(snap: &PoolSnapshot, last: Option<&PoolSnapshot>) {
        let delta = |get: fn(&PoolSnapshot) -> u64| -> u64 {
            get(snap).saturating_sub(last.map(get).unwrap_or(0))
        };
        debug!(
            pool = %snap.name,
            size = snap.size,
            active = snap.active,
            free = snap.free,
            d_created = delta(|s| s.created),
            d_destroyed = delta(|s| s.destroyed),
            d_orphans = delta(|s| s.orphans),
            d_bg = delta(|s| s.background_requests),
            "Pool state"
        );
    }

    /// Raise self-widening alerts on ledger drift and orphan growth. Each
    /// firing doubles its threshold so a persistent condition alerts at a
    /// decreasing rate instead of every tick.
    fn check_anomalies(&self, snap: &PoolSnapshot, entry: &mut LoggerState) {
        let drift = snap.drift();
        if drift > entry.drift_threshold {
            warn!(
                pool = %snap.name,
                drift,
                threshold = entry.drift_threshold,
                "Pool collections drifting from created/destroyed ledger"
            );
            self.events.emit(
                "pool_drift",
                &snap.name,
                json!({ "drift": drift, "threshold": entry.drift_threshold }),
                Severity::Critical,
            );
            entry.drift_threshold = entry.drift_threshold.saturating_mul(2);
        }

        if snap.orphans > entry.orphan_threshold {
            warn!(
                pool = %snap.name,
                orphans = snap.orphans,
                threshold = entry.orphan_threshold,
                "Orphan count above alert threshold"
            );
            self.events.emit(
                "orphan_alert",
                &snap.name,
                json!({ "orphans": snap.orphans, "threshold": entry.orphan_threshold }),
                Severity::Critical,
            );
            entry.orphan_threshold = entry.orphan_threshold.saturating_mul(2);
        }
    }

    /// The actor loop. Not supervised: failures are logged by the runtime
    /// and the actor stays stopped.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.state_log_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(
            interval_ms = self.config.state_log_interval_ms,
            detail_every = self.config.detail_every,
            "State logger started"
        );
        let mut tick_no = 0u64;
        loop {
            interval.tick().await;
            tick_no += 1;
            self.tick(tick_no);
        }
    }
}
