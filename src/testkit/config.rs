//! Canonical fast configurations for tests.
//!
//! Timeouts are short enough that a test can wait out an idle reap or an
//! orphan force-destroy in real time without slowing the suite down.

use crate::config::{GroomerConfig, PoolConfig};

/// Pool config against the mock connector with second-scale timeouts.
pub fn pool(min: usize, max: usize) -> PoolConfig {
    let mut cfg = PoolConfig::new("mock://db");
    cfg.min_connections = min;
    cfg.max_connections = max;
    cfg.idle_timeout_ms = 1_000;
    cfg.soft_recycle_ms = 30_000;
    cfg.hard_recycle_ms = 60_000;
    cfg.orphan_timeout_ms = 4_000;
    cfg.orphan_report_ms = Some(2_000);
    cfg.extra_capacity = 2;
    cfg.spike_adjust_interval_ms = 50;
    cfg
}

/// Actor config with millisecond-scale cadences.
pub fn groomer() -> GroomerConfig {
    GroomerConfig {
        groom_interval_ms: 100,
        tracking_interval_ms: 20,
        upward_resize_interval_ms: 100,
        long_resize_interval_ms: 400,
        state_log_interval_ms: 50,
        detail_every: 4,
        max_restarts: 2,
        workers: 2,
        max_backlog: 16,
        drift_alert_threshold: 4,
        orphan_alert_threshold: 2,
    }
}
