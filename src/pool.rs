//! Connection pools and the factory that creates them.
//!
//! The pool manager only talks to pools through [`ManagedPool`] and creates
//! them through [`PoolConnector`]. The production implementations are
//! [`MssqlPool`] (bb8 over tiberius) and [`MssqlConnector`], which picks the
//! portal or ERP settings for a [`PoolKey`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{MssqlConfig, PoolConfig, RouterConfig};
use crate::connection::MssqlConnection;
use crate::error::{DriverError, DriverResult, PoolKey};
use crate::row::QueryResult;
use crate::types::SqlParam;

/// A pool of live connections to one database.
///
/// Implementations are shared between concurrent callers and must handle
/// concurrent queries themselves.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    /// Whether the pool still reports itself connected.
    fn is_connected(&self) -> bool;

    /// Run a statement and return its first result set.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> DriverResult<QueryResult>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> DriverResult<u64>;

    /// Close every connection. Further queries fail with [`DriverError::Closed`].
    async fn close(&self) -> DriverResult<()>;
}

/// Creates connected pools for a key.
#[async_trait]
pub trait PoolConnector: Send + Sync + 'static {
    /// Pool type produced by this connector.
    type Pool: ManagedPool;

    /// Create and connect a pool for `key`.
    async fn connect(&self, key: &PoolKey) -> DriverResult<Self::Pool>;
}

/// Type alias for the BB8 pool with Tiberius.
type TiberiusPool = Pool<ConnectionManager>;

/// A bb8 connection pool for one SQL Server database.
pub struct MssqlPool {
    inner: RwLock<Option<TiberiusPool>>,
    connected: AtomicBool,
    database: String,
}

impl MssqlPool {
    /// Build a pool and verify it can reach the server.
    pub async fn connect(config: &MssqlConfig, pool_config: &PoolConfig) -> DriverResult<Self> {
        let tiberius_config = config
            .to_tiberius_config()
            .map_err(|e| DriverError::connection(e.to_string()))?;

        // Without retries a refused connection or failed login reaches the
        // caller as the driver error instead of a checkout timeout.
        let pool = Pool::builder()
            .retry_connection(false)
            .max_size(pool_config.max_connections)
            .min_idle(Some(pool_config.min_connections))
            .connection_timeout(pool_config.connection_timeout.min(config.connect_timeout))
            .idle_timeout(pool_config.idle_timeout)
            .max_lifetime(pool_config.max_lifetime)
            .build(ConnectionManager::new(tiberius_config))
            .await
            .map_err(|e| DriverError::connection(format!("failed to create pool: {}", e)))?;

        let pool = Self {
            inner: RwLock::new(Some(pool)),
            connected: AtomicBool::new(true),
            database: config.database.clone(),
        };
        pool.ping().await?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "MSSQL connection pool created"
        );

        Ok(pool)
    }

    /// Name of the database this pool is connected to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Current connection counts, if the pool is open.
    pub fn status(&self) -> Option<PoolStatus> {
        self.inner.read().as_ref().map(|pool| {
            let state = pool.state();
            PoolStatus {
                connections: state.connections,
                idle_connections: state.idle_connections,
            }
        })
    }

    /// Round-trip a trivial statement on a pooled connection.
    pub async fn ping(&self) -> DriverResult<()> {
        let pool = self.handle()?;
        let result = match pool.get().await {
            Ok(client) => MssqlConnection::new(client).ping().await,
            Err(e) => Err(e.into()),
        };
        self.observe(result)
    }

    fn handle(&self) -> DriverResult<TiberiusPool> {
        self.inner.read().clone().ok_or(DriverError::Closed)
    }

    /// Flip the liveness flag when a result shows the connection is gone.
    fn observe<T>(&self, result: DriverResult<T>) -> DriverResult<T> {
        if let Err(e) = &result {
            if e.is_connection_error() && self.connected.swap(false, Ordering::AcqRel) {
                warn!(database = %self.database, error = %e, "MSSQL pool marked disconnected");
            }
        }
        result
    }
}

#[async_trait]
impl ManagedPool for MssqlPool {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.inner.read().is_some()
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> DriverResult<QueryResult> {
        let pool = self.handle()?;
        let result = match pool.get().await {
            Ok(client) => MssqlConnection::new(client).query(sql, params).await,
            Err(e) => Err(e.into()),
        };
        self.observe(result)
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> DriverResult<u64> {
        let pool = self.handle()?;
        let result = match pool.get().await {
            Ok(client) => MssqlConnection::new(client).execute(sql, params).await,
            Err(e) => Err(e.into()),
        };
        self.observe(result)
    }

    async fn close(&self) -> DriverResult<()> {
        self.connected.store(false, Ordering::Release);
        match self.status() {
            Some(status) => debug!(
                database = %self.database,
                connections = status.connections,
                idle_connections = status.idle_connections,
                "Closing MSSQL pool"
            ),
            None => debug!(database = %self.database, "MSSQL pool already closed"),
        }
        // Idle connections close once the last handle to the bb8 pool is
        // dropped; checked-out ones close when their query finishes.
        self.inner.write().take();
        Ok(())
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Current number of connections (including idle).
    pub connections: u32,
    /// Number of idle connections.
    pub idle_connections: u32,
}

/// Creates [`MssqlPool`]s from a [`RouterConfig`].
#[derive(Debug, Clone)]
pub struct MssqlConnector {
    config: Arc<RouterConfig>,
}

impl MssqlConnector {
    /// Create a connector.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Settings used for `key`.
    pub fn config_for(&self, key: &PoolKey) -> MssqlConfig {
        match key {
            PoolKey::Portal => self.config.portal.clone(),
            PoolKey::Erp(database) => self.config.erp.with_database(database.as_str()),
        }
    }

    /// The router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

#[async_trait]
impl PoolConnector for MssqlConnector {
    type Pool = MssqlPool;

    async fn connect(&self, key: &PoolKey) -> DriverResult<MssqlPool> {
        debug!(key = %key, "Connecting MSSQL pool");
        MssqlPool::connect(&self.config_for(key), &self.config.pool).await
    }
}
