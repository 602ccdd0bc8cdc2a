//! Connection pool for one datasource.
//!
//! # Architecture
//!
//! Checkout and check-in are synchronous with respect to capacity: a caller
//! either gets a connection immediately (from the free queue or by creating
//! one inline) or fails fast with `CapacityExceeded` — nothing ever waits
//! for a connection to come back. The background actors (groomer, size
//! adjuster, state logger) mutate the same collections concurrently, which
//! is safe because every connection carries its own CAS state machine: any
//! party that wants to take a connection out of circulation must win the
//! Idle→Active or →Closed transition first.
//!
//! The free collection is a lock-free FIFO (`crossbeam::queue::SegQueue`),
//! the active collection a sharded concurrent map, and all counters are
//! atomics, so checkout latency stays independent of pool size. The only
//! pool-wide exclusive section is the single-slot spike-adjustment guard.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{epoch_millis, ConnState, PooledConnection};
use crate::connector::{ConnectProps, PhysicalConnector};
use crate::error::{PoolError, Result};
use crate::events::{EventSink, Severity};
use crate::txn::TransactionContext;
use crate::workers::ConnectWorkers;

mod counters;

pub use counters::PoolSnapshot;

pub(crate) use counters::PoolCounters;

/// Why a connection was torn down. Drives the per-reason counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Idle past the idle timeout.
    Idle,
    /// Checked out past the orphan timeout.
    Orphan,
    /// Past its recycle age.
    Aged,
    /// Unusable: failed rollback or fatal I/O.
    Fault,
    /// Pool shutdown.
    Shutdown,
}

impl DestroyReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Orphan => "orphan",
            Self::Aged => "aged",
            Self::Fault => "fault",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Self-tuning pool of physical connections for one datasource.
///
/// Created once per datasource by the [`PoolRegistry`](crate::registry::PoolRegistry)
/// and lives for the process lifetime. Capacity changes take effect
/// asynchronously through the background connect workers — the pool never
/// opens connections to meet a new target on the caller's thread, except
/// for the caller's own connection when the free queue is empty.
pub struct ConnectionPool {
    name: String,
    config: PoolConfig,
    props: ConnectProps,
    connector: Arc<dyn PhysicalConnector>,
    events: Arc<dyn EventSink>,
    workers: Arc<ConnectWorkers>,
    /// Capacity target. Mutated by the size adjuster and spike detection.
    size: AtomicUsize,
    /// Idle connections, best-effort FIFO.
    free: SegQueue<Arc<PooledConnection>>,
    /// Checked-out connections by id.
    active: DashMap<u64, Arc<PooledConnection>>,
    /// Foreground creations between the ceiling check and the created
    /// counter; reserved before the awaited connect.
    in_flight: AtomicUsize,
    pub(crate) counters: PoolCounters,
    /// Active-count samples recorded while the pool was saturated; drained
    /// by the size adjuster as extra observations.
    spikes: SegQueue<usize>,
    /// Single-slot guard: at most one spike adjustment in flight.
    spike_guard: AtomicBool,
    last_spike_adjust_ms: AtomicU64,
    next_id: AtomicU64,
    self_ref: OnceLock<Weak<ConnectionPool>>,
}

impl ConnectionPool {
    /// Create a pool. Validates `config`; no connections are opened until
    /// [`bootstrap`](Self::bootstrap) or the first checkout.
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        props: ConnectProps,
        connector: Arc<dyn PhysicalConnector>,
        events: Arc<dyn EventSink>,
        workers: Arc<ConnectWorkers>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let size = config.min_connections;
        let pool = Arc::new(Self {
            name: name.into(),
            config,
            props,
            connector,
            events,
            workers,
            size: AtomicUsize::new(size),
            free: SegQueue::new(),
            active: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            counters: PoolCounters::new(),
            spikes: SegQueue::new(),
            spike_guard: AtomicBool::new(false),
            last_spike_adjust_ms: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            self_ref: OnceLock::new(),
        });
        let _ = pool.self_ref.set(Arc::downgrade(&pool));
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current capacity target.
    pub fn current_size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Live connections per the created/destroyed ledger.
    pub fn live_count(&self) -> usize {
        let created = self.counters.created.load(Ordering::Relaxed);
        let destroyed = self.counters.destroyed.load(Ordering::Relaxed);
        created.saturating_sub(destroyed) as usize
    }

    /// Whether `conn_id` is currently checked out of this pool.
    pub fn contains(&self, conn_id: u64) -> bool {
        self.active.contains_key(&conn_id)
    }

    /// Point-in-time state for dashboards.
    pub fn snapshot(&self) -> PoolSnapshot {
        self.counters.snapshot(
            &self.name,
            self.current_size(),
            self.active.len(),
            self.free.len(),
        )
    }

    fn self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    // -- checkout ---------------------------------------------------------------

    /// Check out a connection for the calling context.
    ///
    /// Inside a transaction, the transaction's pinned connection for this
    /// datasource is returned when one exists; a freshly checked-out
    /// connection is registered as the pin otherwise.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the pool is empty and already at
    /// `max_connections`; `Connect` when inline creation fails; `Stale`
    /// when a pinned connection was destroyed out-of-band.
    pub async fn checkout(&self, txn: &dyn TransactionContext) -> Result<Arc<PooledConnection>> {
        if txn.in_transaction() {
            if let Some(pinned) = txn.pinned(&self.name) {
                pinned.ensure_live()?;
                return Ok(pinned);
            }
        }
        let conn = self.checkout_pooled().await?;
        if txn.in_transaction() {
            conn.set_in_transaction(true);
            txn.pin(&self.name, &conn);
        }
        Ok(conn)
    }

    /// Check out a connection ignoring transaction pinning.
    pub async fn checkout_pooled(&self) -> Result<Arc<PooledConnection>> {
        while let Some(candidate) = self.free.pop() {
            // Recycle-aging check comes before the checkout CAS.
            let age = candidate.age();
            if age >= self.config.soft_recycle() {
                let defer = self.free.len() < self.config.resolved_aging_headroom()
                    && age < self.config.hard_recycle_jittered();
                if !defer {
                    self.retire_aged(&candidate).await;
                    continue;
                }
            }
            if candidate.try_checkout() {
                self.active.insert(candidate.id(), candidate.clone());
                return Ok(candidate);
            }
            // Lost the CAS to a concurrent teardown; drop this candidate
            // and keep polling — never retry the same object.
            debug!(
                pool = %self.name,
                conn_id = candidate.id(),
                state = ?candidate.state(),
                "Checkout lost claim race, skipping candidate"
            );
        }

        if self.active.len() >= self.current_size() {
            self.record_spike();
        }
        self.create_foreground().await
    }

    /// Retire a recycle-age candidate and ask for one background
    /// replacement.
    async fn retire_aged(&self, conn: &Arc<PooledConnection>) {
        if conn.set_aged() {
            self.counters.aged.fetch_add(1, Ordering::Relaxed);
        }
        if self.destroy(conn, DestroyReason::Aged).await {
            self.request_replacement(true);
        }
    }

    /// Record a saturation sample and, at most once per spike-adjustment
    /// interval, bump capacity by the configured extra amount.
    ///
    /// Multiple callers can observe saturation concurrently; the
    /// single-slot guard bounds the outcome to one winning adjustment per
    /// interval. Sample counts per interval are intentionally best-effort.
    fn record_spike(&self) {
        let active = self.active.len();
        self.spikes.push(active);

        if self.config.extra_capacity == 0 {
            return;
        }
        let now = epoch_millis();
        let last = self.last_spike_adjust_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.config.spike_adjust_interval_ms {
            return;
        }
        if self
            .spike_guard
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let new_size = self
            .size
            .fetch_add(self.config.extra_capacity, Ordering::AcqRel)
            + self.config.extra_capacity;
        self.last_spike_adjust_ms.store(now, Ordering::Relaxed);
        info!(
            pool = %self.name,
            active,
            new_size,
            extra = self.config.extra_capacity,
            "Spike detected, capacity bumped"
        );
        self.events.emit(
            "pool_spike",
            &self.name,
            json!({ "active": active, "new_size": new_size }),
            Severity::Warning,
        );
        let gap = new_size.saturating_sub(self.live_count());
        self.request_fill(gap, false);

        self.spike_guard.store(false, Ordering::Release);
    }

    /// Open a connection on the caller's thread, bounded by
    /// `max_connections`, and hand it out Active.
    ///
    /// The ceiling counts in-flight creations: a slot is reserved before
    /// the awaited connect so concurrent callers on an empty pool cannot
    /// each pass the check and overshoot the maximum together.
    async fn create_foreground(&self) -> Result<Arc<PooledConnection>> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        let live = self.live_count();
        if live + in_flight > self.config.max_connections {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(PoolError::CapacityExceeded {
                pool: self.name.clone(),
                current: live + in_flight - 1,
                max: self.config.max_connections,
            }
            .into());
        }

        let handle = match self.connector.connect(&self.config.url, &self.props).await {
            Ok(handle) => handle,
            Err(source) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Err(PoolError::Connect {
                    pool: self.name.clone(),
                    source,
                }
                .into());
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Arc::new(PooledConnection::new(id, self.name.clone(), handle));
        // The reservation is released only after the created counter moves,
        // so the connection is never invisible to the ceiling check.
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let claimed = conn.try_checkout();
        debug_assert!(claimed, "fresh connection must claim Idle -> Active");
        self.active.insert(id, conn.clone());
        debug!(pool = %self.name, conn_id = id, "Created connection inline");
        Ok(conn)
    }

    // -- check-in ---------------------------------------------------------------

    /// Return a connection to the pool.
    ///
    /// Rolls back first when the connection is dirty; a failed rollback
    /// destroys the connection instead of propagating. Connections past
    /// their recycle age are retired instead of returned. A connection
    /// already destroyed out-of-band (orphan sweep) is a silent no-op.
    pub async fn checkin(&self, conn: &Arc<PooledConnection>) -> Result<()> {
        if conn.state().is_terminal() {
            return Ok(());
        }

        if conn.is_dirty() {
            if let Err(e) = conn.rollback().await {
                warn!(
                    pool = %self.name,
                    conn_id = conn.id(),
                    error = %e,
                    "Rollback on check-in failed, destroying connection"
                );
                if self.destroy(conn, DestroyReason::Fault).await {
                    self.request_replacement(false);
                }
                return Ok(());
            }
        }

        let age = conn.age();
        if age >= self.config.soft_recycle() {
            let defer = self.free.len() < self.config.resolved_aging_headroom()
                && age < self.config.hard_recycle_jittered();
            if !defer {
                self.retire_aged(conn).await;
                return Ok(());
            }
        }

        conn.set_in_transaction(false);
        if conn.try_checkin() {
            self.active.remove(&conn.id());
            self.free.push(conn.clone());
        }
        // A lost CAS means a concurrent teardown claimed it; that path
        // owns the rest.
        Ok(())
    }

    // -- grooming entry points ----------------------------------------------------

    /// Reap free connections idle past the idle timeout. Each reap claims
    /// the candidate via CAS before removal and requests one background
    /// replacement. Returns the number reaped.
    pub async fn remove_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let mut removed = 0;

        // Bound the sweep to the queue's current length; survivors go
        // straight back to the tail instead of being held until the end,
        // so a checkout landing mid-sweep rarely sees an empty pool.
        for _ in 0..self.free.len() {
            let Some(conn) = self.free.pop() else { break };
            if conn.since_last_use() > timeout {
                if self.destroy(&conn, DestroyReason::Idle).await {
                    removed += 1;
                    self.request_replacement(true);
                    continue;
                }
            }
            if conn.state() == ConnState::Idle {
                self.free.push(conn);
            }
            // Terminal leftovers fall out of the queue here.
        }
        removed
    }

    /// Force-destroy connections checked out past the orphan timeout and
    /// warn about those past the report threshold. Detection is based
    /// purely on checkout duration, regardless of transaction state.
    /// Returns the number destroyed.
    pub async fn remove_orphans(&self) -> usize {
        let timeout = self.config.orphan_timeout();
        let report = self.config.orphan_report();
        let mut victims = Vec::new();

        for entry in self.active.iter() {
            let held = entry.value().since_last_use();
            if held > timeout {
                victims.push(entry.value().clone());
            } else if held > report {
                warn!(
                    pool = %self.name,
                    conn_id = entry.value().id(),
                    held_ms = held.as_millis() as u64,
                    "Connection held past orphan report threshold"
                );
            }
        }

        let mut removed = 0;
        for conn in victims {
            let held_ms = conn.since_last_use().as_millis() as u64;
            if self.destroy(&conn, DestroyReason::Orphan).await {
                removed += 1;
                warn!(
                    pool = %self.name,
                    conn_id = conn.id(),
                    held_ms,
                    "Orphaned connection force-destroyed"
                );
            }
        }
        removed
    }

    // -- teardown ---------------------------------------------------------------

    /// Tear a connection down. Idempotent: the first caller to win the
    /// Closed claim runs the teardown; everyone else gets `false` and the
    /// counters move exactly once.
    pub async fn destroy(&self, conn: &Arc<PooledConnection>, reason: DestroyReason) -> bool {
        if !conn.set_closed() {
            return false;
        }
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        self.active.remove(&conn.id());

        if conn.is_dirty() {
            if let Err(e) = conn.rollback_for_teardown().await {
                warn!(
                    pool = %self.name,
                    conn_id = conn.id(),
                    error = %e,
                    "Rollback during teardown failed"
                );
            }
        }
        if let Err(e) = conn.close_physical().await {
            debug!(pool = %self.name, conn_id = conn.id(), error = %e, "Physical close failed");
        }

        conn.set_destroyed();
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        match reason {
            DestroyReason::Idle => {
                self.counters.idle_closed.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::Aged => {
                self.counters.aged_closed.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::Orphan => {
                self.counters.orphans.fetch_add(1, Ordering::Relaxed);
                self.counters.active_closed.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::Fault => {
                self.counters.active_closed.fetch_add(1, Ordering::Relaxed);
            }
            DestroyReason::Shutdown => {}
        }

        self.events.emit(
            "connection_destroyed",
            &self.name,
            json!({ "conn_id": conn.id(), "reason": reason.as_str() }),
            Severity::Info,
        );
        debug!(
            pool = %self.name,
            conn_id = conn.id(),
            reason = reason.as_str(),
            "Connection destroyed"
        );
        true
    }

    /// Destroy everything, free and active, at shutdown.
    pub async fn close_all(&self) {
        let mut victims: Vec<_> = Vec::with_capacity(self.free.len() + self.active.len());
        while let Some(conn) = self.free.pop() {
            victims.push(conn);
        }
        victims.extend(self.active.iter().map(|e| e.value().clone()));
        let teardowns: Vec<_> = victims
            .iter()
            .map(|conn| self.destroy(conn, DestroyReason::Shutdown))
            .collect();
        futures_util::future::join_all(teardowns).await;
    }

    // -- background replenishment --------------------------------------------------

    /// Submit background connect requests to close a capacity gap.
    /// Best-effort: admission control may skip any of them.
    pub(crate) fn request_fill(&self, count: usize, recycled: bool) {
        if count == 0 {
            return;
        }
        if let Some(pool) = self.self_arc() {
            for _ in 0..count {
                if !self.workers.request(&pool, recycled) {
                    break;
                }
            }
        }
    }

    fn request_replacement(&self, recycled: bool) {
        self.request_fill(1, recycled);
    }

    /// Submit the initial `min_connections` background connect requests.
    pub(crate) fn bootstrap(&self) {
        self.request_fill(self.config.min_connections, false);
    }

    /// Open one connection on a background worker and park it in the free
    /// queue. Failures are logged and dropped — background paths favor
    /// pool availability over surfacing transient noise.
    pub(crate) async fn fill_one(&self, recycled: bool) {
        // Re-check the target: grooming or sizing may have moved on since
        // the request was queued. The hard ceiling caps the target — spike
        // bumps can push the target itself past the maximum.
        let cap = self.current_size().min(self.config.max_connections);
        if self.live_count() >= cap {
            return;
        }
        match self.connector.connect(&self.config.url, &self.props).await {
            Ok(handle) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                let conn = Arc::new(PooledConnection::new(id, self.name.clone(), handle));
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                self.free.push(conn);
                debug!(pool = %self.name, conn_id = id, recycled, "Background connection ready");
            }
            Err(e) => {
                warn!(pool = %self.name, error = %e, "Background connect failed");
                self.events.emit(
                    "background_connect_failed",
                    &self.name,
                    json!({ "error": e.to_string() }),
                    Severity::Warning,
                );
            }
        }
    }

    // -- size adjuster support -------------------------------------------------------

    /// Drain the spike samples recorded since the last drain.
    pub(crate) fn drain_spike_samples(&self) -> (u64, u64) {
        let mut sum = 0u64;
        let mut count = 0u64;
        while let Some(sample) = self.spikes.pop() {
            sum += sample as u64;
            count += 1;
        }
        (sum, count)
    }

    /// Adopt a new capacity target. Creation to meet it happens
    /// asynchronously via [`request_fill`](Self::request_fill).
    pub(crate) fn adopt_size(&self, target: usize) {
        self.size.store(target, Ordering::Release);
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("size", &self.current_size())
            .field("active", &self.active.len())
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
