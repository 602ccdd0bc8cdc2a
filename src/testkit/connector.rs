//! Scripted in-memory connector.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::connector::{ConnectProps, ConnectionHandle, PhysicalConnector};
use crate::error::ConnectorError;

/// Shared counters and failure scripts for one mock connector and every
/// handle it produced.
#[derive(Debug, Default)]
struct MockState {
    connects: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    closes: AtomicU64,
    /// Remaining connect attempts that should fail.
    fail_connects: AtomicU32,
    /// All rollbacks fail while set.
    fail_rollbacks: AtomicBool,
    /// Artificial connect latency in milliseconds.
    connect_delay_ms: AtomicU64,
}

/// Mock [`PhysicalConnector`] that hands out in-memory handles and counts
/// every operation. Cloning shares the state, so a clone can be kept for
/// assertions after the original moves into a pool.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` connect attempts to fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.fail_connects.store(n, Ordering::Release);
    }

    /// Script every rollback to fail while `on` is set.
    pub fn fail_rollbacks(&self, on: bool) {
        self.state.fail_rollbacks.store(on, Ordering::Release);
    }

    /// Add artificial latency to every connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
    }

    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::Acquire)
    }

    pub fn commits(&self) -> u64 {
        self.state.commits.load(Ordering::Acquire)
    }

    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::Acquire)
    }

    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PhysicalConnector for MockConnector {
    async fn connect(
        &self,
        _url: &str,
        _props: &ConnectProps,
    ) -> std::result::Result<Box<dyn ConnectionHandle>, ConnectorError> {
        let delay = self.state.connect_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let remaining = self.state.fail_connects.load(Ordering::Acquire);
        if remaining > 0
            && self
                .state
                .fail_connects
                .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            return Err("scripted connect failure".into());
        }
        self.state.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle produced by [`MockConnector`].
#[derive(Debug)]
pub struct MockHandle {
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl ConnectionHandle for MockHandle {
    async fn commit(&self) -> std::result::Result<(), ConnectorError> {
        self.state.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self) -> std::result::Result<(), ConnectorError> {
        if self.state.fail_rollbacks.load(Ordering::Acquire) {
            return Err("scripted rollback failure".into());
        }
        self.state.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> std::result::Result<(), ConnectorError> {
        self.closed.store(true, Ordering::Release);
        self.state.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
