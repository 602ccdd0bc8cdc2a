//! Map-backed transaction context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::PooledConnection;
use crate::txn::TransactionContext;

/// Context that behaves like one caller thread inside a transaction
/// manager: pins live in a map keyed by datasource.
#[derive(Debug, Default)]
pub struct MapTransactionContext {
    active: AtomicBool,
    pins: Mutex<HashMap<String, Arc<PooledConnection>>>,
}

impl MapTransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a transaction. Subsequent checkouts pin.
    pub fn begin(&self) {
        self.active.store(true, Ordering::Release);
    }

    /// Leave the transaction and drop all pins.
    pub fn end(&self) {
        self.active.store(false, Ordering::Release);
        self.pins.lock().clear();
    }

    pub fn pin_count(&self) -> usize {
        self.pins.lock().len()
    }
}

impl TransactionContext for MapTransactionContext {
    fn in_transaction(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn pinned(&self, datasource: &str) -> Option<Arc<PooledConnection>> {
        self.pins.lock().get(datasource).cloned()
    }

    fn pin(&self, datasource: &str, conn: &Arc<PooledConnection>) {
        self.pins
            .lock()
            .insert(datasource.to_string(), conn.clone());
    }
}
