use thiserror::Error;

/// Configuration-related errors with structured variants.
///
/// All configuration is validated once at construction time, before any
/// pool exists; these errors are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Pool operation errors with structured variants.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Checkout rejected: the pool is at its configured maximum. Surfaced
    /// immediately, never retried internally.
    #[error("pool '{pool}' at capacity: {current} >= {max}")]
    CapacityExceeded {
        pool: String,
        current: usize,
        max: usize,
    },

    /// The physical connector failed to open a connection. Propagated on
    /// the foreground path, logged-and-dropped on the background path.
    #[error("pool '{pool}' failed to connect: {source}")]
    Connect {
        pool: String,
        #[source]
        source: ConnectorError,
    },

    /// Operation attempted on a Closed or Destroyed connection. Callers
    /// must check out a fresh connection rather than retry.
    #[error("connection {conn_id} in pool '{pool}' is already closed or destroyed")]
    Stale { pool: String, conn_id: u64 },

    /// Rollback of a dirty connection failed. On the check-in path the
    /// connection is destroyed instead of propagating this; an explicit
    /// caller-invoked rollback propagates it.
    #[error("rollback failed for connection {conn_id} in pool '{pool}': {source}")]
    Rollback {
        pool: String,
        conn_id: u64,
        #[source]
        source: ConnectorError,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type produced by [`PhysicalConnector`](crate::connector::PhysicalConnector)
/// implementations.
pub type ConnectorError = Box<dyn std::error::Error + Send + Sync>;
