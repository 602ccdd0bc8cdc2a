//! Pool and groomer policy configuration.
//!
//! Configuration is validated once at construction time and treated as
//! immutable afterwards; the only value that changes at runtime is the
//! pool's capacity target, and that is owned by the pool itself. Derived
//! values (orphan report threshold, aging headroom, jittered hard recycle)
//! are exposed through accessors rather than mutated into the struct.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::{ConfigError, Error, Result};

/// Per-datasource pool policy: capacities, timeouts, and recycle windows.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Connection URL handed opaquely to the physical connector.
    pub url: String,
    /// Minimum number of connections the pool is kept at.
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,
    /// Hard ceiling on total connections; checkout fails fast beyond it.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle connections untouched longer than this are reaped (milliseconds).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Age at which a connection becomes a recycle candidate (milliseconds).
    #[serde(default = "default_soft_recycle_ms")]
    pub soft_recycle_ms: u64,
    /// Age at which a connection is retired unconditionally (milliseconds).
    #[serde(default = "default_hard_recycle_ms")]
    pub hard_recycle_ms: u64,
    /// Start of the hard-recycle jitter window (milliseconds).
    #[serde(default)]
    pub recycle_padding_start_ms: u64,
    /// End of the hard-recycle jitter window, exclusive (milliseconds).
    #[serde(default)]
    pub recycle_padding_end_ms: u64,
    /// Checked-out connections held longer than this are force-destroyed
    /// (milliseconds).
    #[serde(default = "default_orphan_timeout_ms")]
    pub orphan_timeout_ms: u64,
    /// Checked-out connections held longer than this are reported but left
    /// alone (milliseconds). Derived as `orphan_timeout_ms / 4` when unset
    /// or configured at or above the orphan timeout.
    #[serde(default)]
    pub orphan_report_ms: Option<u64>,
    /// Steady-state capacity kept above the measured load.
    #[serde(default = "default_extra_capacity")]
    pub extra_capacity: usize,
    /// Free connections that must be on hand before a soft-recycle
    /// candidate is retired. Derived as `extra_capacity / 2` when unset.
    #[serde(default)]
    pub aging_headroom: Option<usize>,
    /// Minimum time between spike-driven capacity bumps (milliseconds).
    #[serde(default = "default_spike_adjust_interval_ms")]
    pub spike_adjust_interval_ms: u64,
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    50
}

fn default_idle_timeout_ms() -> u64 {
    120_000 // 2 minutes
}

fn default_soft_recycle_ms() -> u64 {
    1_800_000 // 30 minutes
}

fn default_hard_recycle_ms() -> u64 {
    3_600_000 // 60 minutes
}

fn default_orphan_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_extra_capacity() -> usize {
    4
}

fn default_spike_adjust_interval_ms() -> u64 {
    10_000
}

impl PoolConfig {
    /// Create a config for `url` with default policy values.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            soft_recycle_ms: default_soft_recycle_ms(),
            hard_recycle_ms: default_hard_recycle_ms(),
            recycle_padding_start_ms: 0,
            recycle_padding_end_ms: 0,
            orphan_timeout_ms: default_orphan_timeout_ms(),
            orphan_report_ms: None,
            extra_capacity: default_extra_capacity(),
            aging_headroom: None,
            spike_adjust_interval_ms: default_spike_adjust_interval_ms(),
        }
    }

    /// Validate policy values.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid:
    /// - `url` must be non-empty
    /// - `min_connections` must be > 0 and <= `max_connections`
    /// - `idle_timeout_ms` and `orphan_timeout_ms` must be > 0
    /// - `hard_recycle_ms` must be > `soft_recycle_ms` (both > 0)
    /// - a non-zero jitter window must satisfy start < end
    /// - `aging_headroom` must be <= `extra_capacity`
    /// - `spike_adjust_interval_ms` must be > 0
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &str| -> Error {
            ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
            .into()
        };

        if self.url.is_empty() {
            return Err(ConfigError::MissingField { field: "url" }.into());
        }
        if self.min_connections == 0 {
            return Err(invalid("min_connections", "must be > 0"));
        }
        if self.max_connections < self.min_connections {
            return Err(invalid("max_connections", "must be >= min_connections"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(invalid("idle_timeout_ms", "must be > 0"));
        }
        if self.orphan_timeout_ms == 0 {
            return Err(invalid("orphan_timeout_ms", "must be > 0"));
        }
        if self.soft_recycle_ms == 0 {
            return Err(invalid("soft_recycle_ms", "must be > 0"));
        }
        if self.hard_recycle_ms <= self.soft_recycle_ms {
            return Err(invalid("hard_recycle_ms", "must be > soft_recycle_ms"));
        }
        let jittered = self.recycle_padding_start_ms != 0 || self.recycle_padding_end_ms != 0;
        if jittered && self.recycle_padding_start_ms >= self.recycle_padding_end_ms {
            return Err(invalid(
                "recycle_padding_start_ms",
                "must be < recycle_padding_end_ms",
            ));
        }
        if let Some(headroom) = self.aging_headroom {
            if headroom > self.extra_capacity {
                return Err(invalid("aging_headroom", "must be <= extra_capacity"));
            }
        }
        if self.spike_adjust_interval_ms == 0 {
            return Err(invalid("spike_adjust_interval_ms", "must be > 0"));
        }
        Ok(())
    }

    /// Orphan report threshold, deriving `orphan_timeout / 4` when the
    /// configured value is absent or not below the orphan timeout.
    pub fn orphan_report(&self) -> Duration {
        let ms = match self.orphan_report_ms {
            Some(v) if v > 0 && v < self.orphan_timeout_ms => v,
            _ => self.orphan_timeout_ms / 4,
        };
        Duration::from_millis(ms)
    }

    /// Aging headroom, deriving half the steady-state extra capacity when
    /// unset (0 when extra capacity is 0).
    pub fn resolved_aging_headroom(&self) -> usize {
        self.aging_headroom.unwrap_or(self.extra_capacity / 2)
    }

    /// Hard-recycle limit plus a fresh uniform jitter draw from the padding
    /// window, so connections age out at staggered times rather than in a
    /// synchronized wave. A new value is drawn on every call.
    pub fn hard_recycle_jittered(&self) -> Duration {
        let padding = if self.recycle_padding_end_ms > self.recycle_padding_start_ms {
            rand::thread_rng().gen_range(self.recycle_padding_start_ms..self.recycle_padding_end_ms)
        } else {
            0
        };
        Duration::from_millis(self.hard_recycle_ms + padding)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn soft_recycle(&self) -> Duration {
        Duration::from_millis(self.soft_recycle_ms)
    }

    pub fn orphan_timeout(&self) -> Duration {
        Duration::from_millis(self.orphan_timeout_ms)
    }

    pub fn spike_adjust_interval(&self) -> Duration {
        Duration::from_millis(self.spike_adjust_interval_ms)
    }
}

/// Shared policy for the background actors and the connect worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct GroomerConfig {
    /// Interval between groomer sweeps (milliseconds).
    #[serde(default = "default_groom_interval_ms")]
    pub groom_interval_ms: u64,
    /// Interval between load samples (milliseconds).
    #[serde(default = "default_tracking_interval_ms")]
    pub tracking_interval_ms: u64,
    /// Short-window cadence for upward resizes (milliseconds).
    #[serde(default = "default_upward_resize_interval_ms")]
    pub upward_resize_interval_ms: u64,
    /// Long-window cadence for resizes in either direction (milliseconds).
    #[serde(default = "default_long_resize_interval_ms")]
    pub long_resize_interval_ms: u64,
    /// Interval between state-logger ticks (milliseconds).
    #[serde(default = "default_state_log_interval_ms")]
    pub state_log_interval_ms: u64,
    /// Every Nth state-logger tick emits the full detail dump.
    #[serde(default = "default_detail_every")]
    pub detail_every: u64,
    /// Restart budget for the groomer and size-adjuster loops.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Number of background connect worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum queued background connect requests before admission control
    /// starts skipping submissions.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
    /// Initial |live − accounted| gap that triggers a drift alert.
    #[serde(default = "default_drift_alert_threshold")]
    pub drift_alert_threshold: u64,
    /// Initial orphan count that triggers an orphan alert.
    #[serde(default = "default_orphan_alert_threshold")]
    pub orphan_alert_threshold: u64,
}

fn default_groom_interval_ms() -> u64 {
    30_000
}

fn default_tracking_interval_ms() -> u64 {
    5_000
}

fn default_upward_resize_interval_ms() -> u64 {
    30_000
}

fn default_long_resize_interval_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_state_log_interval_ms() -> u64 {
    60_000
}

fn default_detail_every() -> u64 {
    10
}

fn default_max_restarts() -> u32 {
    5
}

fn default_workers() -> usize {
    2
}

fn default_max_backlog() -> usize {
    32
}

fn default_drift_alert_threshold() -> u64 {
    8
}

fn default_orphan_alert_threshold() -> u64 {
    4
}

impl Default for GroomerConfig {
    fn default() -> Self {
        Self {
            groom_interval_ms: default_groom_interval_ms(),
            tracking_interval_ms: default_tracking_interval_ms(),
            upward_resize_interval_ms: default_upward_resize_interval_ms(),
            long_resize_interval_ms: default_long_resize_interval_ms(),
            state_log_interval_ms: default_state_log_interval_ms(),
            detail_every: default_detail_every(),
            max_restarts: default_max_restarts(),
            workers: default_workers(),
            max_backlog: default_max_backlog(),
            drift_alert_threshold: default_drift_alert_threshold(),
            orphan_alert_threshold: default_orphan_alert_threshold(),
        }
    }
}

impl GroomerConfig {
    /// Validate actor policy values.
    ///
    /// # Errors
    ///
    /// Returns an error if any interval is zero, the resize cadences are
    /// not ordered (`tracking <= upward < long`), or the worker pool is
    /// configured with no workers or no backlog.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: &str| -> Error {
            ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
            .into()
        };

        if self.groom_interval_ms == 0 {
            return Err(invalid("groom_interval_ms", "must be > 0"));
        }
        if self.tracking_interval_ms == 0 {
            return Err(invalid("tracking_interval_ms", "must be > 0"));
        }
        if self.upward_resize_interval_ms < self.tracking_interval_ms {
            return Err(invalid(
                "upward_resize_interval_ms",
                "must be >= tracking_interval_ms",
            ));
        }
        if self.long_resize_interval_ms <= self.upward_resize_interval_ms {
            return Err(invalid(
                "long_resize_interval_ms",
                "must be > upward_resize_interval_ms",
            ));
        }
        if self.state_log_interval_ms == 0 {
            return Err(invalid("state_log_interval_ms", "must be > 0"));
        }
        if self.detail_every == 0 {
            return Err(invalid("detail_every", "must be > 0"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be > 0"));
        }
        if self.max_backlog == 0 {
            return Err(invalid("max_backlog", "must be > 0"));
        }
        Ok(())
    }

    pub fn groom_interval(&self) -> Duration {
        Duration::from_millis(self.groom_interval_ms)
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_millis(self.tracking_interval_ms)
    }

    pub fn state_log_interval(&self) -> Duration {
        Duration::from_millis(self.state_log_interval_ms)
    }
}
