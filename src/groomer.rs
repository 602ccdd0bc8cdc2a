//! Replenishment and reaping actor.
//!
//! Sweeps every registered pool on a fixed interval: idle connections past
//! the idle timeout are reaped (with one background replacement requested
//! each), checked-out connections past the orphan timeout are
//! force-destroyed, and those past the shorter report threshold are logged.
//! Orphan detection is based purely on checkout duration — an unattended
//! long-held connection is itself the problem, transaction or not.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::GroomerConfig;
use crate::error::Error;
use crate::pool::ConnectionPool;

/// Periodic reaper for idle and orphaned connections.
pub struct Groomer {
    config: GroomerConfig,
    pools: RwLock<Vec<Arc<ConnectionPool>>>,
}

impl Groomer {
    pub fn new(config: GroomerConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(Vec::new()),
        }
    }

    /// Register a pool for sweeping.
    pub fn register(&self, pool: Arc<ConnectionPool>) {
        self.pools.write().push(pool);
    }

    /// Sweep every registered pool once. Exposed for the run loop and for
    /// deterministic tests.
    pub async fn sweep(&self) {
        let pools: Vec<_> = self.pools.read().clone();
        for pool in pools {
            let reaped = pool.remove_idle().await;
            let orphaned = pool.remove_orphans().await;
            // Top the pool back up to its target after the sweep.
            let gap = pool.current_size().saturating_sub(pool.live_count());
            pool.request_fill(gap, false);
            if reaped > 0 || orphaned > 0 {
                info!(
                    pool = pool.name(),
                    reaped, orphaned, "Groomer sweep removed connections"
                );
            }
        }
    }

    /// The supervised actor loop.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut interval = tokio::time::interval(self.config.groom_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(
            interval_ms = self.config.groom_interval_ms,
            "Groomer started"
        );
        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }
}
