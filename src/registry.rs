//! Pool registry: one physical pool per `(data source id, kind)` key.
//!
//! The registry is an owned, explicit object constructed once by the
//! surrounding application and passed to extraction callers — not an
//! ambient global. Concurrent first-callers for the same key block on a
//! single pool creation via a per-key `OnceCell` barrier; different keys
//! create independently with no shared critical section beyond the map
//! lookup/insert.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::connection::{ConnectionConfig, ConnectionFactory};
use crate::descriptor::{CredentialDecryptor, DataSourceDescriptor, SourceKind};
use crate::error::{Error, Result};
use crate::pool::{PoolConfig, PoolStats, PooledConnection, SourcePool};

/// Registry key: one pool per data source id and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Data source identity
    pub data_source_id: u64,
    /// Source kind
    pub kind: SourceKind,
}

impl PoolKey {
    /// Key for a descriptor
    pub fn of(descriptor: &DataSourceDescriptor) -> Self {
        Self {
            data_source_id: descriptor.id,
            kind: descriptor.kind,
        }
    }
}

type PoolCell = Arc<OnceCell<Arc<SourcePool>>>;

/// Defaults applied to every pool the registry creates
#[derive(Debug, Clone)]
pub struct PoolDefaults {
    /// Minimum idle connections per pool
    pub min_size: usize,
    /// Maximum connections per pool
    pub max_size: usize,
    /// Connection acquire timeout
    pub acquire_timeout: std::time::Duration,
}

impl Default for PoolDefaults {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            acquire_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Builder for [`PoolRegistry`]
pub struct PoolRegistryBuilder {
    factories: HashMap<SourceKind, Arc<dyn ConnectionFactory>>,
    decryptor: Arc<dyn CredentialDecryptor>,
    defaults: PoolDefaults,
}

impl PoolRegistryBuilder {
    /// Register the connection factory for a source kind
    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factories.insert(factory.kind(), factory);
        self
    }

    /// Override the pool defaults
    pub fn with_pool_defaults(mut self, defaults: PoolDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build the registry
    pub fn build(self) -> PoolRegistry {
        PoolRegistry {
            factories: self.factories,
            decryptor: self.decryptor,
            defaults: self.defaults,
            pools: Mutex::new(HashMap::new()),
        }
    }
}

/// Registry of connection pools, keyed by `(data source id, kind)`.
pub struct PoolRegistry {
    factories: HashMap<SourceKind, Arc<dyn ConnectionFactory>>,
    decryptor: Arc<dyn CredentialDecryptor>,
    defaults: PoolDefaults,
    pools: Mutex<HashMap<PoolKey, PoolCell>>,
}

impl PoolRegistry {
    /// Start building a registry around a credential decryptor
    pub fn builder(decryptor: Arc<dyn CredentialDecryptor>) -> PoolRegistryBuilder {
        PoolRegistryBuilder {
            factories: HashMap::new(),
            decryptor,
            defaults: PoolDefaults::default(),
        }
    }

    /// Return the pool for the descriptor's key, creating it if absent.
    ///
    /// Exactly one pool is created per key no matter how many callers race:
    /// the per-key cell serializes creation, and later callers observe the
    /// same `Arc`. A failed creation leaves the cell empty, so a later
    /// retry with a fixed descriptor succeeds.
    pub async fn get_or_create_pool(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Arc<SourcePool>> {
        let key = PoolKey::of(descriptor);

        let cell: PoolCell = {
            let mut pools = self.pools.lock().await;
            pools.entry(key).or_default().clone()
        };

        let pool = cell
            .get_or_try_init(|| self.create_pool(descriptor))
            .await
            .cloned()?;

        // A close that raced with creation has already removed this key;
        // the finished pool must not escape the registry untracked.
        let registered = {
            let pools = self.pools.lock().await;
            pools.get(&key).is_some_and(|c| Arc::ptr_eq(c, &cell))
        };
        if !registered {
            let _ = pool.close().await;
            return Err(Error::pool_creation(format!(
                "data source '{}' was closed during pool creation",
                descriptor.name
            )));
        }

        Ok(pool)
    }

    async fn create_pool(&self, descriptor: &DataSourceDescriptor) -> Result<Arc<SourcePool>> {
        if !descriptor.active {
            return Err(Error::config(format!(
                "data source '{}' is not active",
                descriptor.name
            )));
        }

        let factory = self
            .factories
            .get(&descriptor.kind)
            .cloned()
            .ok_or_else(|| {
                Error::config(format!(
                    "no connection factory registered for kind '{}'",
                    descriptor.kind
                ))
            })?;

        let password = self.decryptor.decrypt(&descriptor.encrypted_password)?;
        let pool_name = format!("siphon-{}-{}", descriptor.id, descriptor.kind);

        let connection = ConnectionConfig::new(descriptor.url.clone())
            .with_username(descriptor.username.clone())
            .with_password(password)
            .with_read_only(true)
            .with_application_name(pool_name.clone());

        let config = PoolConfig {
            connection,
            name: pool_name,
            min_size: self.defaults.min_size,
            max_size: self.defaults.max_size,
            acquire_timeout: self.defaults.acquire_timeout,
            ..PoolConfig::default()
        };

        SourcePool::new(config, factory).await.map_err(|e| {
            tracing::warn!(
                data_source = descriptor.id,
                kind = %descriptor.kind,
                error = %e,
                "pool creation failed"
            );
            Error::pool_creation_with_source(
                format!("data source '{}'", descriptor.name),
                e,
            )
        })
    }

    /// Get-or-create the pool, then borrow one connection from it.
    pub async fn get_connection(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<PooledConnection> {
        let pool = self.get_or_create_pool(descriptor).await?;
        pool.get().await
    }

    /// Live stats for the pool of a data source id, `None` when no pool
    /// exists for it.
    pub async fn pool_stats(&self, data_source_id: u64) -> Option<PoolStats> {
        let pools = self.pools.lock().await;
        pools
            .iter()
            .find(|(key, _)| key.data_source_id == data_source_id)
            .and_then(|(_, cell)| cell.get())
            .map(|pool| pool.stats())
    }

    /// Close the pool(s) of a data source id. Idempotent: closing an
    /// unknown id is a no-op.
    pub async fn close_pool(&self, data_source_id: u64) {
        let removed: Vec<PoolCell> = {
            let mut pools = self.pools.lock().await;
            let keys: Vec<PoolKey> = pools
                .keys()
                .filter(|k| k.data_source_id == data_source_id)
                .copied()
                .collect();
            keys.iter().filter_map(|k| pools.remove(k)).collect()
        };

        for cell in removed {
            if let Some(pool) = cell.get() {
                let _ = pool.close().await;
            }
        }
    }

    /// Close every registered pool; used at process/test shutdown.
    /// Safe to call while pools are mid-use: borrowed connections are
    /// closed as they come back.
    pub async fn close_all_pools(&self) {
        let removed: Vec<PoolCell> = {
            let mut pools = self.pools.lock().await;
            pools.drain().map(|(_, cell)| cell).collect()
        };

        for cell in removed {
            if let Some(pool) = cell.get() {
                let _ = pool.close().await;
            }
        }

        tracing::info!("all connection pools closed");
    }

    /// Number of pools that finished creation. Cells that are mid-creation
    /// or left empty by a failed creation are not counted.
    pub async fn pool_count(&self) -> usize {
        self.pools
            .lock()
            .await
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }
}
