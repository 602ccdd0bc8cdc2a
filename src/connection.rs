//! Pooled connection lifecycle state machine.
//!
//! Every connection is in exactly one of five states, backed by an
//! `AtomicU8`; all transitions are compare-and-set, so checkout, check-in,
//! grooming, and destruction can race freely without a lock. Destroyed is
//! terminal: a connection is never reused once destroyed, and any handle
//! operation afterwards surfaces a typed stale error.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::connector::ConnectionHandle;
use crate::error::PoolError;

/// Lifecycle states. `Aged` marks a recycle candidate that has been claimed
/// for retirement; `Closed` and `Destroyed` are the teardown pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Idle = 0,
    Active = 1,
    Aged = 2,
    Closed = 3,
    Destroyed = 4,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Active,
            2 => Self::Aged,
            3 => Self::Closed,
            _ => Self::Destroyed,
        }
    }

    /// Closed or Destroyed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Destroyed)
    }
}

/// Return the current time as epoch milliseconds.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One physical connection owned by a pool.
///
/// Wraps the opaque driver handle with the lifecycle state machine,
/// dirty/in-transaction flags, and the timestamps the background actors
/// sweep on. Shared as `Arc<PooledConnection>` between the caller, the
/// free/active collections, and the actors; no interior locking.
pub struct PooledConnection {
    id: u64,
    pool: String,
    handle: Box<dyn ConnectionHandle>,
    created_at: Instant,
    state: AtomicU8,
    /// Epoch millis of the last checkout or check-in.
    last_used: AtomicU64,
    /// Epoch millis of the last statement executed through this connection.
    last_statement: AtomicU64,
    /// Statements currently executing on this connection.
    in_call: AtomicU32,
    /// Uncommitted mutating work is pending.
    dirty: AtomicBool,
    /// Pinned to a caller's transaction.
    in_transaction: AtomicBool,
}

impl PooledConnection {
    /// Wrap a freshly opened handle. The connection starts Idle.
    pub fn new(id: u64, pool: impl Into<String>, handle: Box<dyn ConnectionHandle>) -> Self {
        let now = epoch_millis();
        Self {
            id,
            pool: pool.into(),
            handle,
            created_at: Instant::now(),
            state: AtomicU8::new(ConnState::Idle as u8),
            last_used: AtomicU64::new(now),
            last_statement: AtomicU64::new(now),
            in_call: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn cas(&self, from: ConnState, to: ConnState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the connection for a caller: Idle -> Active.
    ///
    /// Losing this race (the groomer closed the candidate concurrently)
    /// means the caller must move on to the next candidate, never retry
    /// the same object.
    pub fn try_checkout(&self) -> bool {
        if self.cas(ConnState::Idle, ConnState::Active) {
            self.touch();
            true
        } else {
            false
        }
    }

    /// Release the connection back to the pool: Active -> Idle.
    pub fn try_checkin(&self) -> bool {
        if self.cas(ConnState::Active, ConnState::Idle) {
            self.touch();
            true
        } else {
            false
        }
    }

    /// Mark the connection as past its recycle age: {Idle, Active} -> Aged.
    ///
    /// Idempotent; returns true only on the first real transition so
    /// counters increment exactly once.
    pub fn set_aged(&self) -> bool {
        self.cas(ConnState::Idle, ConnState::Aged) || self.cas(ConnState::Active, ConnState::Aged)
    }

    /// Move any non-terminal state to Closed.
    ///
    /// Idempotent; returns true only on the first real transition. This is
    /// the claim step for every teardown path — whoever wins this CAS owns
    /// the rest of the destroy sequence.
    pub fn set_closed(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if ConnState::from_u8(current).is_terminal() {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ConnState::Closed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Force the terminal state. Idempotent; returns true only once.
    pub fn set_destroyed(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == ConnState::Destroyed as u8 {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ConnState::Destroyed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    fn stale(&self) -> PoolError {
        PoolError::Stale {
            pool: self.pool.clone(),
            conn_id: self.id,
        }
    }

    /// Error if the connection has been closed or destroyed out-of-band.
    pub fn ensure_live(&self) -> Result<(), PoolError> {
        if self.state().is_terminal() {
            Err(self.stale())
        } else {
            Ok(())
        }
    }

    // -- dirty / transaction flags ------------------------------------------

    /// Record a statement execution. A DML statement outside transparent
    /// auto-commit marks the connection dirty until the next successful
    /// commit or rollback.
    pub fn touch_statement(&self, dml: bool) {
        self.last_statement.store(epoch_millis(), Ordering::Relaxed);
        if dml {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_in_transaction(&self, value: bool) {
        self.in_transaction.store(value, Ordering::Release);
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    /// Bracket a statement execution for in-call accounting.
    pub fn enter_call(&self) {
        self.in_call.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exit_call(&self) {
        self.in_call.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn in_calls(&self) -> u32 {
        self.in_call.load(Ordering::Relaxed)
    }

    // -- handle operations ----------------------------------------------------

    /// Commit pending work and clear the dirty flag.
    pub async fn commit(&self) -> Result<(), PoolError> {
        self.ensure_live()?;
        self.handle.commit().await.map_err(|source| PoolError::Connect {
            pool: self.pool.clone(),
            source,
        })?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Roll back pending work and clear the dirty flag.
    ///
    /// A caller-invoked rollback propagates the failure; the check-in path
    /// converts the same failure into a destroy instead.
    pub async fn rollback(&self) -> Result<(), PoolError> {
        self.ensure_live()?;
        self.handle
            .rollback()
            .await
            .map_err(|source| PoolError::Rollback {
                pool: self.pool.clone(),
                conn_id: self.id,
                source,
            })?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Roll back without the liveness check, for teardown paths that have
    /// already claimed the connection as Closed.
    pub(crate) async fn rollback_for_teardown(&self) -> Result<(), PoolError> {
        self.handle
            .rollback()
            .await
            .map_err(|source| PoolError::Rollback {
                pool: self.pool.clone(),
                conn_id: self.id,
                source,
            })?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Close the physical handle. Teardown-only; callers swallow and log.
    pub(crate) async fn close_physical(&self) -> Result<(), PoolError> {
        self.handle.close().await.map_err(|source| PoolError::Connect {
            pool: self.pool.clone(),
            source,
        })
    }

    /// Whether the driver reports the physical handle closed.
    pub fn physically_closed(&self) -> bool {
        self.handle.is_closed()
    }

    // -- time probes ------------------------------------------------------------

    fn touch(&self) {
        self.last_used.store(epoch_millis(), Ordering::Relaxed);
    }

    /// Time since the physical connection was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last checkout or check-in.
    pub fn since_last_use(&self) -> Duration {
        let last = self.last_used.load(Ordering::Relaxed);
        Duration::from_millis(epoch_millis().saturating_sub(last))
    }

    /// Time since the last statement went through this connection.
    pub fn since_last_statement(&self) -> Duration {
        let last = self.last_statement.load(Ordering::Relaxed);
        Duration::from_millis(epoch_millis().saturating_sub(last))
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("state", &self.state())
            .field("dirty", &self.is_dirty())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
