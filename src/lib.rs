//! Tidepool - self-tuning database connection pooling.
//!
//! A client-side pool of physical database connections built for high-QPS,
//! latency-sensitive checkout/check-in traffic. The pool keeps checkout
//! latency independent of pool size: the free and active collections are
//! lock-free, every lifecycle transition is a per-connection CAS, and the
//! only pool-wide exclusive section is a single-slot spike-adjustment
//! guard.
//!
//! # Architecture
//!
//! Three background actors keep each pool sized and healthy:
//!
//! - [`groomer::Groomer`] — reaps idle and orphaned connections and
//!   requests bounded asynchronous replacements.
//! - [`sizer::SizeAdjuster`] — tracks checkout load over short and long
//!   windows and recomputes the capacity target.
//! - [`state_logger::StateLogger`] — emits counter snapshots and raises
//!   self-widening anomaly alerts.
//!
//! The groomer and size adjuster run under a bounded-restart supervisor;
//! the state logger is never restarted, so its death stays visible.
//! Asynchronous connection creation goes through one shared bounded worker
//! pool with best-effort admission control — no foreground operation ever
//! blocks on capacity.
//!
//! External collaborators are injected behind narrow traits: the
//! [`connector::PhysicalConnector`] that opens and closes physical
//! connections, the [`txn::TransactionContext`] that pins connections to a
//! caller's transaction, and the best-effort [`events::EventSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidepool::config::{GroomerConfig, PoolConfig};
//! use tidepool::events::NullEventSink;
//! use tidepool::registry::{DatasourceDef, PoolRegistry};
//! use tidepool::txn::NoTransactions;
//!
//! # async fn example(connector: Arc<dyn tidepool::connector::PhysicalConnector>) -> tidepool::Result<()> {
//! let registry = PoolRegistry::new(
//!     vec![DatasourceDef::new("orders", PoolConfig::new("postgres://db/orders"))],
//!     GroomerConfig::default(),
//!     connector,
//!     Arc::new(NullEventSink),
//! )?;
//!
//! let pool = registry.pool("orders").expect("registered");
//! let conn = pool.checkout(&NoTransactions).await?;
//! // ... run statements through the access layer ...
//! pool.checkin(&conn).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod error;
pub mod events;
pub mod groomer;
pub mod pool;
pub mod registry;
pub mod sizer;
pub mod state_logger;
mod supervisor;
pub mod txn;
pub mod workers;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{Error, Result};
pub use pool::{ConnectionPool, PoolSnapshot};
