//! Transaction-context seam.
//!
//! A distributed transaction manager may pin a connection to the calling
//! context for a datasource so every checkout inside the transaction
//! returns the same connection. The pool only consults and contributes to
//! that pinning — it never begins, commits, or rolls back transactions.

use std::sync::Arc;

use crate::connection::PooledConnection;

/// Narrow view of the transaction coordinator, injected into the pool.
pub trait TransactionContext: Send + Sync {
    /// Whether the calling context is inside a transaction.
    fn in_transaction(&self) -> bool;

    /// The connection already pinned to this transaction for `datasource`,
    /// if any.
    fn pinned(&self, datasource: &str) -> Option<Arc<PooledConnection>>;

    /// Register `conn` as this transaction's connection for `datasource`.
    fn pin(&self, datasource: &str, conn: &Arc<PooledConnection>);
}

/// Context for callers that never run inside a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactions;

impl TransactionContext for NoTransactions {
    fn in_transaction(&self) -> bool {
        false
    }

    fn pinned(&self, _datasource: &str) -> Option<Arc<PooledConnection>> {
        None
    }

    fn pin(&self, _datasource: &str, _conn: &Arc<PooledConnection>) {}
}
