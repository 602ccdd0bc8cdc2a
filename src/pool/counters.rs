//! Lifecycle counters and the point-in-time snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared counters updated atomically by caller threads and the background
/// actors. Monitored, not enforced: the state logger alerts when the live
/// collections drift from created-minus-destroyed.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    /// Connections opened, foreground or background.
    pub(crate) created: AtomicU64,
    /// Connections fully torn down.
    pub(crate) destroyed: AtomicU64,
    /// First Closed transitions (every teardown path claims exactly one).
    pub(crate) closed: AtomicU64,
    /// First Aged transitions.
    pub(crate) aged: AtomicU64,
    /// Idle-timeout reaps.
    pub(crate) idle_closed: AtomicU64,
    /// Teardowns of checked-out connections (orphans and faults).
    pub(crate) active_closed: AtomicU64,
    /// Recycle-age retirements.
    pub(crate) aged_closed: AtomicU64,
    /// Orphan force-destroys.
    pub(crate) orphans: AtomicU64,
    /// Background connect requests admitted to the worker queue.
    pub(crate) background_requests: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Point-in-time view of one pool, for dashboards and the state logger.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub name: String,
    /// Current capacity target.
    pub size: usize,
    pub active: usize,
    pub free: usize,
    pub created: u64,
    pub destroyed: u64,
    pub closed: u64,
    pub aged: u64,
    pub idle_closed: u64,
    pub active_closed: u64,
    pub aged_closed: u64,
    pub orphans: u64,
    pub background_requests: u64,
}

impl PoolSnapshot {
    /// Gap between the live collections and the created-minus-destroyed
    /// ledger. Zero in a quiescent pool; transient nonzero values are
    /// normal while connections are mid-teardown.
    pub fn drift(&self) -> u64 {
        let live = (self.active + self.free) as i64;
        let accounted = self.created as i64 - self.destroyed as i64;
        live.abs_diff(accounted)
    }
}

impl PoolCounters {
    pub(crate) fn snapshot(&self, name: &str, size: usize, active: usize, free: usize) -> PoolSnapshot {
        PoolSnapshot {
            name: name.to_string(),
            size,
            active,
            free,
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            aged: self.aged.load(Ordering::Relaxed),
            idle_closed: self.idle_closed.load(Ordering::Relaxed),
            active_closed: self.active_closed.load(Ordering::Relaxed),
            aged_closed: self.aged_closed.load(Ordering::Relaxed),
            orphans: self.orphans.load(Ordering::Relaxed),
            background_requests: self.background_requests.load(Ordering::Relaxed),
        }
    }
}
