//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`connector`] — scripted mock [`PhysicalConnector`](crate::connector::PhysicalConnector)
//!   with failure injection and operation counters.
//! - [`txn`] — map-backed [`TransactionContext`](crate::txn::TransactionContext).
//! - [`events`] — recording [`EventSink`](crate::events::EventSink).
//! - [`config`] — canonical test configurations.

use std::sync::Arc;

use crate::config::{GroomerConfig, PoolConfig};
use crate::connector::{ConnectProps, PhysicalConnector};
use crate::events::EventSink;
use crate::pool::ConnectionPool;
use crate::workers::ConnectWorkers;

pub mod config;
pub mod connector;
pub mod events;
pub mod txn;

/// Build a standalone pool with its own worker pool, outside a registry.
///
/// Must be called from within a tokio runtime.
pub fn make_pool(
    name: &str,
    pool_config: PoolConfig,
    groomer_config: &GroomerConfig,
    connector: Arc<dyn PhysicalConnector>,
    events: Arc<dyn EventSink>,
) -> Arc<ConnectionPool> {
    let workers = ConnectWorkers::new(groomer_config);
    ConnectionPool::new(
        name,
        pool_config,
        ConnectProps::new(),
        connector,
        events,
        workers,
    )
    .expect("test pool config must be valid")
}
