//! One physical connection pool per data source.
//!
//! [`SourcePool`] is a semaphore-bounded pool with:
//! - Configurable min/max size and acquire timeout
//! - Validation on borrow and recycling of expired connections
//! - A live stats snapshot (total/active/idle/waiting)
//! - Graceful shutdown: idle connections are drained immediately,
//!   in-flight connections are closed as they come back
//!
//! Connections borrowed through [`SourcePool::get`] come back as
//! [`PooledConnection`] RAII guards, so a connection acquired for an
//! extraction run is always returned to its pool (or closed if the pool
//! shut down meanwhile) — never leaked, even on error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Pool name, embedded for observability (e.g. `siphon-7-postgresql`)
    pub name: String,
    /// Minimum pool size (idle connections kept ready)
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime (for recycling)
    pub max_lifetime: Duration,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            name: "siphon-pool".to_string(),
            min_size: 2,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Live pool statistics, computed freshly per request and never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections currently owned by the pool (idle + borrowed)
    pub total_connections: usize,
    /// Connections currently borrowed by callers
    pub active_connections: usize,
    /// Connections currently idle in the pool
    pub idle_connections: usize,
    /// Callers currently blocked waiting for a connection
    pub waiting_threads: usize,
}

/// A connection borrowed from a pool.
///
/// Dropping the guard returns the connection to its pool; if the pool has
/// shut down in the meantime the connection is closed instead.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<SourcePool>,
}

impl PooledConnection {
    fn new(conn: Box<dyn Connection>, created_at: Instant, pool: Arc<SourcePool>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &dyn Connection {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            tokio::spawn(async move {
                pool.return_connection(conn, created_at).await;
            });
        }
    }
}

/// Internal idle entry with recycling metadata
struct IdleEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// A semaphore-bounded connection pool for one data source.
///
/// Connection acquisition is O(1) when idle connections are available; the
/// semaphore bounds total connections without starving waiters.
pub struct SourcePool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections (LIFO for better cache locality)
    idle: Mutex<Vec<IdleEntry>>,
    /// Limits total connections
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    idle_count: AtomicUsize,
    waiting: AtomicUsize,
    shutdown: AtomicBool,
    /// Self reference for creating PooledConnections
    self_ref: tokio::sync::OnceCell<std::sync::Weak<Self>>,
}

impl std::fmt::Debug for SourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePool")
            .field("config", &self.config)
            .field("total_connections", &self.total_connections)
            .field("idle_count", &self.idle_count)
            .field("waiting", &self.waiting)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl SourcePool {
    /// Create a new pool, eagerly opening `min_size` connections.
    ///
    /// Fails if the very first connection cannot be established, so an
    /// invalid URL or unavailable driver surfaces at pool creation rather
    /// than at first query.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            semaphore: Semaphore::new(config.max_size),
            config: config.clone(),
            factory,
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            total_connections: AtomicUsize::new(0),
            idle_count: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            self_ref: tokio::sync::OnceCell::new(),
        });

        let _ = pool.self_ref.set(Arc::downgrade(&pool));

        for i in 0..config.min_size {
            match pool.create_connection().await {
                Ok(conn) => {
                    let now = Instant::now();
                    pool.idle.lock().await.push(IdleEntry {
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                    pool.idle_count.fetch_add(1, Ordering::Release);
                }
                Err(e) if i == 0 => {
                    // The pool is unusable; surface the driver/URL problem now.
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(pool = %config.name, error = %e, "failed to prefill connection");
                    break;
                }
            }
        }

        tracing::info!(
            pool = %config.name,
            min = config.min_size,
            max = config.max_size,
            "connection pool created"
        );

        Ok(pool)
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn get_self_arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(|w| w.upgrade())
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::Release);
        Ok(conn)
    }

    async fn validate_connection(&self, conn: &dyn Connection) -> bool {
        if self.config.test_on_borrow {
            conn.is_valid().await
        } else {
            true
        }
    }

    fn should_recycle(&self, entry: &IdleEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    /// Borrow a connection, blocking up to the configured acquire timeout.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: format!("pool {} is shut down", self.config.name),
            });
        }

        self.waiting.fetch_add(1, Ordering::Relaxed);
        let acquired =
            tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire()).await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);

        let permit = acquired
            .map_err(|_| Error::PoolExhausted {
                message: format!(
                    "timeout waiting for connection ({}ms)",
                    self.config.acquire_timeout.as_millis()
                ),
            })?
            .map_err(|_| Error::PoolExhausted {
                message: "pool semaphore closed".to_string(),
            })?;

        // Try to reuse an idle connection, recycling expired ones.
        let reused = {
            let mut idle = self.idle.lock().await;
            loop {
                match idle.pop() {
                    Some(entry) => {
                        self.idle_count.fetch_sub(1, Ordering::Release);
                        if self.should_recycle(&entry) {
                            let _ = entry.conn.close().await;
                            self.total_connections.fetch_sub(1, Ordering::Release);
                            continue;
                        }
                        if !self.validate_connection(&*entry.conn).await {
                            let _ = entry.conn.close().await;
                            self.total_connections.fetch_sub(1, Ordering::Release);
                            continue;
                        }
                        break Some((entry.conn, entry.created_at));
                    }
                    None => break None,
                }
            }
        };

        let (conn, created_at) = match reused {
            Some(pair) => pair,
            None => match self.create_connection().await {
                Ok(c) => (c, Instant::now()),
                Err(e) => {
                    drop(permit);
                    return Err(e);
                }
            },
        };

        // The permit is restored when the connection comes back.
        std::mem::forget(permit);

        let pool_arc = self.get_self_arc().ok_or_else(|| Error::PoolExhausted {
            message: "pool has been dropped".to_string(),
        })?;

        Ok(PooledConnection::new(conn, created_at, pool_arc))
    }

    /// Return a borrowed connection to the pool. `created_at` is the
    /// connection's original creation time, so max-lifetime recycling
    /// keeps working across borrows.
    pub(crate) async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.semaphore.add_permits(1);

        if self.shutdown.load(Ordering::Acquire) {
            let _ = conn.close().await;
            self.total_connections.fetch_sub(1, Ordering::Release);
            return;
        }

        let mut idle = self.idle.lock().await;
        idle.push(IdleEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
        self.idle_count.fetch_add(1, Ordering::Release);
    }

    /// Live stats snapshot
    pub fn stats(&self) -> PoolStats {
        let total = self.total_connections.load(Ordering::Acquire);
        let idle = self.idle_count.load(Ordering::Acquire);
        PoolStats {
            total_connections: total,
            active_connections: total.saturating_sub(idle),
            idle_connections: idle,
            waiting_threads: self.waiting.load(Ordering::Relaxed),
        }
    }

    /// Whether the pool has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut the pool down: close idle connections now, close borrowed
    /// connections as they are returned.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let mut idle = self.idle.lock().await;
        for entry in idle.drain(..) {
            let _ = entry.conn.close().await;
            self.total_connections.fetch_sub(1, Ordering::Release);
            self.idle_count.fetch_sub(1, Ordering::Release);
        }

        tracing::info!(pool = %self.config.name, "connection pool closed");
        Ok(())
    }
}
