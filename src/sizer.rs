//! Load-adaptive capacity actor.
//!
//! Samples each pool's active-connection count on a short tracking
//! interval into two windows. The short window drives fast upward resizes:
//! a sustained peak raises the target immediately and is never discounted
//! by waiting for the long window. The long window, on its own slower
//! cadence, moves the target in either direction. Spike samples recorded
//! by the pools while saturated are folded into the short-window mean as
//! extra observations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::GroomerConfig;
use crate::error::Error;
use crate::pool::ConnectionPool;

/// Per-pool sampling windows.
#[derive(Debug, Default)]
struct TrackingData {
    short_sum: u64,
    short_samples: u64,
    short_elapsed_ms: u64,
    long_sum: u64,
    long_samples: u64,
    long_elapsed_ms: u64,
}

impl TrackingData {
    fn reset_short(&mut self) {
        self.short_sum = 0;
        self.short_samples = 0;
        self.short_elapsed_ms = 0;
    }

    fn reset_long(&mut self) {
        self.long_sum = 0;
        self.long_samples = 0;
        self.long_elapsed_ms = 0;
    }
}

/// Ceiling of a weighted mean plus headroom, floored at the pool minimum.
fn target_from(sum: u64, samples: u64, extra: usize, min: usize) -> usize {
    if samples == 0 {
        return min;
    }
    let mean_ceil = sum.div_ceil(samples) as usize;
    (mean_ceil + extra).max(min)
}

/// Periodic actor that recomputes each pool's capacity target from
/// measured load.
pub struct SizeAdjuster {
    config: GroomerConfig,
    pools: RwLock<Vec<Arc<ConnectionPool>>>,
    tracking: Mutex<HashMap<String, TrackingData>>,
}

impl SizeAdjuster {
    pub fn new(config: GroomerConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(Vec::new()),
            tracking: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pool for load tracking.
    pub fn register(&self, pool: Arc<ConnectionPool>) {
        self.pools.write().push(pool);
    }

    /// Record one sample per pool and apply any due resizes. Exposed for
    /// the run loop and for deterministic tests.
    pub fn observe(&self) {
        let pools: Vec<_> = self.pools.read().clone();
        let mut tracking = self.tracking.lock();
        let tick_ms = self.config.tracking_interval_ms;

        for pool in pools {
            let data = tracking.entry(pool.name().to_string()).or_default();
            let active = pool.active_len() as u64;
            data.short_sum += active;
            data.short_samples += 1;
            data.short_elapsed_ms += tick_ms;
            data.long_sum += active;
            data.long_samples += 1;
            data.long_elapsed_ms += tick_ms;

            if data.short_elapsed_ms >= self.config.upward_resize_interval_ms {
                Self::resize_short(&pool, data);
            }
            if data.long_elapsed_ms >= self.config.long_resize_interval_ms {
                Self::resize_long(&pool, data);
            }
        }
    }

    /// Short-cadence resize: adopt upward moves immediately, leave
    /// downward moves to the long cadence.
    fn resize_short(pool: &Arc<ConnectionPool>, data: &mut TrackingData) {
        let (spike_sum, spike_count) = pool.drain_spike_samples();
        let target = target_from(
            data.short_sum + spike_sum,
            data.short_samples + spike_count,
            pool.config().extra_capacity,
            pool.config().min_connections,
        );
        let current = pool.current_size();
        if target > current {
            pool.adopt_size(target);
            info!(
                pool = pool.name(),
                current,
                target,
                spikes = spike_count,
                "Upward resize adopted"
            );
            pool.request_fill(target.saturating_sub(pool.live_count()), false);
        } else {
            debug!(
                pool = pool.name(),
                current, target, "Short window target not above current size"
            );
        }
        data.reset_short();
    }

    /// Long-cadence resize: adopt in either direction.
    fn resize_long(pool: &Arc<ConnectionPool>, data: &mut TrackingData) {
        let target = target_from(
            data.long_sum,
            data.long_samples,
            pool.config().extra_capacity,
            pool.config().min_connections,
        );
        let current = pool.current_size();
        if target != current {
            pool.adopt_size(target);
            info!(pool = pool.name(), current, target, "Long-window resize adopted");
            if target > current {
                pool.request_fill(target.saturating_sub(pool.live_count()), false);
            }
            // A downward move takes effect passively: the groomer stops
            // replacing reaped connections above the new target.
        }
        data.reset_long();
    }

    /// The supervised actor loop.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut interval = tokio::time::interval(self.config.tracking_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(
            tracking_ms = self.config.tracking_interval_ms,
            upward_ms = self.config.upward_resize_interval_ms,
            long_ms = self.config.long_resize_interval_ms,
            "Size adjuster started"
        );
        loop {
            interval.tick().await;
            self.observe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_ceil_mean_plus_extra() {
        // samples 3,4,4 -> mean ceil = 4; +2 extra = 6
        assert_eq!(target_from(11, 3, 2, 1), 6);
    }

    #[test]
    fn target_floors_at_min() {
        assert_eq!(target_from(1, 4, 0, 5), 5);
        assert_eq!(target_from(0, 0, 3, 5), 5);
    }
}
