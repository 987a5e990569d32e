//! Hybrid query facade over the portal and ERP domains.
//!
//! The two domains live on different servers and are never joined in SQL.
//! [`HybridEngine::query_hybrid`] runs one statement on each side
//! concurrently and hands both results back; correlating rows on a shared
//! business key is the caller's job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use smol_str::SmolStr;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RouterConfig;
use crate::error::{DbError, DbResult, DriverError, DriverResult, PoolKey, QueryTarget};
use crate::manager::{PoolManager, ShutdownReport};
use crate::pool::{ManagedPool, MssqlConnector, PoolConnector};
use crate::row::QueryResult;
use crate::types::SqlParam;

/// Parameterized query entry point for both domains.
pub struct HybridEngine<C: PoolConnector> {
    manager: Arc<PoolManager<C>>,
    timeout: Option<Duration>,
}

impl<C: PoolConnector> Clone for HybridEngine<C> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: PoolConnector> HybridEngine<C> {
    /// Create an engine over a shared pool manager.
    pub fn new(manager: Arc<PoolManager<C>>) -> Self {
        Self {
            manager,
            timeout: None,
        }
    }

    /// A copy of this engine whose calls are bounded by `timeout`, covering
    /// pool creation as well as the statement.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            manager: self.manager.clone(),
            timeout: Some(timeout),
        }
    }

    /// Create an engine that owns a fresh manager over `connector`.
    pub fn from_connector(connector: C) -> Self {
        Self::new(Arc::new(PoolManager::new(connector)))
    }

    /// A copy of this engine with no statement deadline.
    pub fn without_timeout(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            timeout: None,
        }
    }

    /// The statement deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The underlying pool manager.
    pub fn manager(&self) -> &Arc<PoolManager<C>> {
        &self.manager
    }

    /// Run a query against the portal database.
    pub async fn query_portal(&self, sql: &str, params: &[SqlParam]) -> DbResult<QueryResult> {
        debug!(sql = %sql, "Portal query");
        let deadline = self.deadline();
        let pool = self.portal_pool(deadline).await?;
        self.within(deadline, pool.query(sql, params))
            .await
            .map_err(|source| DbError::QueryExecutionFailed {
                target: QueryTarget::Portal,
                source,
            })
    }

    /// Run a query against the ERP database of `tenant_code`.
    pub async fn query_erp(
        &self,
        tenant_code: &str,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<QueryResult> {
        let deadline = self.deadline();
        let (pool, target) = self.erp_pool(tenant_code, deadline).await?;
        debug!(sql = %sql, target = %target, "ERP query");
        self.within(deadline, pool.query(sql, params))
            .await
            .map_err(|source| DbError::QueryExecutionFailed { target, source })
    }

    /// Run a portal query and an ERP query concurrently.
    ///
    /// Both statements always run to completion. If either fails the whole
    /// call fails with [`DbError::HybridPartialFailure`], whose slots say
    /// which side broke.
    pub async fn query_hybrid(
        &self,
        tenant_code: &str,
        portal_sql: &str,
        erp_sql: &str,
        portal_params: &[SqlParam],
        erp_params: &[SqlParam],
    ) -> DbResult<(QueryResult, QueryResult)> {
        let (portal, erp) = tokio::join!(
            self.query_portal(portal_sql, portal_params),
            self.query_erp(tenant_code, erp_sql, erp_params),
        );

        match (portal, erp) {
            (Ok(portal), Ok(erp)) => Ok((portal, erp)),
            (portal, erp) => Err(DbError::HybridPartialFailure {
                portal: portal.err().map(Box::new),
                erp: erp.err().map(Box::new),
            }),
        }
    }

    /// Run a statement that returns no rows against the portal database.
    pub async fn execute_portal(&self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        debug!(sql = %sql, "Portal statement");
        let deadline = self.deadline();
        let pool = self.portal_pool(deadline).await?;
        self.within(deadline, pool.execute(sql, params))
            .await
            .map_err(|source| DbError::QueryExecutionFailed {
                target: QueryTarget::Portal,
                source,
            })
    }

    /// Run a statement that returns no rows against a tenant's ERP database.
    pub async fn execute_erp(
        &self,
        tenant_code: &str,
        sql: &str,
        params: &[SqlParam],
    ) -> DbResult<u64> {
        let deadline = self.deadline();
        let (pool, target) = self.erp_pool(tenant_code, deadline).await?;
        debug!(sql = %sql, target = %target, "ERP statement");
        self.within(deadline, pool.execute(sql, params))
            .await
            .map_err(|source| DbError::QueryExecutionFailed { target, source })
    }

    /// Close every pool. See [`PoolManager::close_all`].
    pub async fn close_all(&self) -> ShutdownReport {
        self.manager.close_all().await
    }

    async fn portal_pool(&self, deadline: Option<Instant>) -> DbResult<Arc<C::Pool>> {
        self.within(deadline, async { Ok::<_, DriverError>(self.manager.get_portal_pool().await) })
            .await
            .map_err(|source| DbError::ConnectionFailed {
                key: PoolKey::Portal,
                source,
            })?
    }

    async fn erp_pool(
        &self,
        tenant_code: &str,
        deadline: Option<Instant>,
    ) -> DbResult<(Arc<C::Pool>, QueryTarget)> {
        let entry = self.manager.registry().resolve(tenant_code)?;
        let pool = self
            .within(deadline, async {
                Ok::<_, DriverError>(self.manager.get_erp_pool_for(entry).await)
            })
            .await
            .map_err(|source| DbError::ConnectionFailed {
                key: PoolKey::erp(entry.physical_database),
                source,
            })??;
        let target = QueryTarget::Erp {
            tenant: SmolStr::new(entry.code),
            database: SmolStr::new(entry.physical_database),
        };
        Ok((pool, target))
    }

    /// When the current call must finish, if the engine has a deadline.
    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|limit| Instant::now() + limit)
    }

    /// Run `fut` until `deadline`. Pool creation and the statement share one
    /// deadline per call.
    async fn within<T>(
        &self,
        deadline: Option<Instant>,
        fut: impl Future<Output = DriverResult<T>>,
    ) -> DriverResult<T> {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|_| {
                DriverError::Timeout(self.timeout.map_or(0, |limit| limit.as_millis() as u64))
            })?,
            None => fut.await,
        }
    }
}

impl HybridEngine<MssqlConnector> {
    /// Create an engine for SQL Server using `config`, including its default
    /// statement deadline.
    pub fn from_config(config: RouterConfig) -> Self {
        let timeout = config.query_timeout;
        let engine = Self::new(Arc::new(PoolManager::new(MssqlConnector::new(config))));
        match timeout {
            Some(limit) => engine.with_timeout(limit),
            None => engine,
        }
    }
}
