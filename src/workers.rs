//! Shared background connect worker pool.
//!
//! All pools submit asynchronous connect requests to one bounded queue
//! served by a fixed set of worker tasks. Backpressure lives entirely on
//! the submission path: a request is skipped when the pool already meets
//! its target or when the queue backlog is full — the queue never blocks
//! a submitter, and a skipped request is not an error (the next groomer
//! or sizer pass will ask again).

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::GroomerConfig;
use crate::pool::ConnectionPool;

struct ConnectRequest {
    pool: Weak<ConnectionPool>,
    recycled: bool,
}

/// Bounded worker pool that opens connections off the caller's thread.
#[derive(Debug)]
pub struct ConnectWorkers {
    tx: mpsc::Sender<ConnectRequest>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ConnectWorkers {
    /// Spawn `config.workers` worker tasks sharing a queue bounded at
    /// `config.max_backlog`. Must be called from within a tokio runtime.
    pub fn new(config: &GroomerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<ConnectRequest>(config.max_backlog);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                debug!(worker_id, "Connect worker started");
                loop {
                    let request = { rx.lock().await.recv().await };
                    match request {
                        Some(req) => {
                            if let Some(pool) = req.pool.upgrade() {
                                pool.fill_one(req.recycled).await;
                            }
                        }
                        None => break,
                    }
                }
                debug!(worker_id, "Connect worker stopped");
            }));
        }

        Arc::new(Self {
            tx,
            handles: Mutex::new(handles),
        })
    }

    /// Submit one background connect request for `pool`.
    ///
    /// Best-effort admission control: skipped when the pool is already at
    /// or above its target size, or when the backlog is full. Returns
    /// whether the request was admitted.
    pub fn request(&self, pool: &Arc<ConnectionPool>, recycled: bool) -> bool {
        if pool.live_count() >= pool.current_size() {
            debug!(pool = pool.name(), "Skipping connect request, target reached");
            return false;
        }
        let req = ConnectRequest {
            pool: Arc::downgrade(pool),
            recycled,
        };
        match self.tx.try_send(req) {
            Ok(()) => {
                pool.counters
                    .background_requests
                    .fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(pool = pool.name(), "Skipping connect request, backlog full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Abort all worker tasks.
    pub fn shutdown(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}
