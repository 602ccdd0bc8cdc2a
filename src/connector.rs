//! Physical connector seam.
//!
//! The pool never speaks a wire protocol itself: opening, committing,
//! rolling back, and closing a physical connection all go through this
//! injected interface. Implementations may be slow and may fail; the pool
//! treats the handle as opaque.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ConnectorError;

/// Opaque driver properties passed through to [`PhysicalConnector::connect`].
pub type ConnectProps = HashMap<String, String>;

/// Opens physical connections for a datasource.
#[async_trait]
pub trait PhysicalConnector: Send + Sync {
    /// Open a new physical connection to `url`.
    async fn connect(
        &self,
        url: &str,
        props: &ConnectProps,
    ) -> std::result::Result<Box<dyn ConnectionHandle>, ConnectorError>;
}

/// One open physical connection.
///
/// All operations are fallible and possibly slow. `is_closed` is a local
/// check and must not touch the wire.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    async fn commit(&self) -> std::result::Result<(), ConnectorError>;

    async fn rollback(&self) -> std::result::Result<(), ConnectorError>;

    async fn close(&self) -> std::result::Result<(), ConnectorError>;

    fn is_closed(&self) -> bool;
}
