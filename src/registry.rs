//! Pool registry: construction, bootstrap, and actor wiring.
//!
//! One registry per process, built explicitly at application start with
//! the collaborators injected — there is no global lookup. The registry
//! owns the connect worker pool and the three background actors and tears
//! them all down on shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{GroomerConfig, PoolConfig};
use crate::connector::{ConnectProps, PhysicalConnector};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::groomer::Groomer;
use crate::pool::ConnectionPool;
use crate::sizer::SizeAdjuster;
use crate::state_logger::StateLogger;
use crate::supervisor::spawn_supervised;
use crate::workers::ConnectWorkers;

/// One datasource definition handed to the registry.
pub struct DatasourceDef {
    pub name: String,
    pub config: PoolConfig,
    pub props: ConnectProps,
}

impl DatasourceDef {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            name: name.into(),
            config,
            props: ConnectProps::new(),
        }
    }

    pub fn with_props(mut self, props: ConnectProps) -> Self {
        self.props = props;
        self
    }
}

/// Owns every pool plus the shared workers and actors.
#[derive(Debug)]
pub struct PoolRegistry {
    pools: HashMap<String, Arc<ConnectionPool>>,
    workers: Arc<ConnectWorkers>,
    actor_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl PoolRegistry {
    /// Build one pool per datasource, bootstrap initial capacity via
    /// background requests, and start the actors. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or duplicate datasource names,
    /// before any actor starts.
    pub fn new(
        datasources: Vec<DatasourceDef>,
        groomer_config: GroomerConfig,
        connector: Arc<dyn PhysicalConnector>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        groomer_config.validate()?;

        let workers = ConnectWorkers::new(&groomer_config);
        let mut pools = HashMap::new();
        for ds in datasources {
            if pools.contains_key(&ds.name) {
                return Err(Error::Registry(format!(
                    "duplicate datasource '{}'",
                    ds.name
                )));
            }
            let pool = ConnectionPool::new(
                ds.name.clone(),
                ds.config,
                ds.props,
                connector.clone(),
                events.clone(),
                workers.clone(),
            )?;
            pools.insert(ds.name, pool);
        }

        let groomer = Arc::new(Groomer::new(groomer_config.clone()));
        let sizer = Arc::new(SizeAdjuster::new(groomer_config.clone()));
        let logger = Arc::new(StateLogger::new(groomer_config.clone(), events.clone()));

        for pool in pools.values() {
            groomer.register(pool.clone());
            sizer.register(pool.clone());
            logger.register(pool.clone());
            pool.bootstrap();
            debug!(
                pool = pool.name(),
                min = pool.config().min_connections,
                "Pool bootstrapped"
            );
        }

        let actor_handles = vec![
            spawn_supervised("groomer", groomer_config.max_restarts, events.clone(), {
                let groomer = groomer.clone();
                move || groomer.clone().run()
            }),
            spawn_supervised(
                "size_adjuster",
                groomer_config.max_restarts,
                events.clone(),
                {
                    let sizer = sizer.clone();
                    move || sizer.clone().run()
                },
            ),
            // The state logger is deliberately unsupervised.
            tokio::spawn(logger.run()),
        ];

        info!(pools = pools.len(), "Pool registry started");
        Ok(Self {
            pools,
            workers,
            actor_handles,
        })
    }

    /// Look up the pool for a datasource.
    pub fn pool(&self, name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(name).cloned()
    }

    /// All registered pools.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<ConnectionPool>> {
        self.pools.values()
    }

    /// Stop the actors and workers and close every pooled connection.
    pub async fn shutdown(&mut self) {
        for handle in self.actor_handles.drain(..) {
            handle.abort();
        }
        self.workers.shutdown();
        for pool in self.pools.values() {
            pool.close_all().await;
        }
        info!("Pool registry shut down");
    }
}
