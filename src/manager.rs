//! Pool cache for the portal database and every ERP database in use.
//!
//! Pools are created lazily, one per [`PoolKey`]. Each key owns a slot guarded
//! by its own async mutex, so the "check / create / insert" sequence for a key
//! runs under mutual exclusion while lookups for other keys and queries on
//! already-cached pools proceed without any shared lock.
//!
//! # Example
//!
//! ```rust,ignore
//! use hybrid_db::{MssqlConnector, PoolManager, RouterConfig};
//!
//! let manager = PoolManager::new(MssqlConnector::new(RouterConfig::from_env()?));
//!
//! // Tenants "01" and "02" live in the same physical database.
//! let a = manager.get_erp_pool("01").await?;
//! let b = manager.get_erp_pool("02").await?;
//! assert!(Arc::ptr_eq(&a, &b));
//!
//! manager.close_all().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult, DriverError, PoolKey};
use crate::pool::{ManagedPool, PoolConnector};
use crate::tenant::{TenantEntry, TenantRegistry};

/// A key's cache slot. `None` means no live pool.
type Slot<P> = Arc<tokio::sync::Mutex<Option<Arc<P>>>>;

/// Owns every pool in the process.
///
/// Construct one at startup and share it (usually behind an `Arc`) with
/// whatever serves requests.
pub struct PoolManager<C: PoolConnector> {
    connector: C,
    registry: TenantRegistry,
    slots: Mutex<HashMap<PoolKey, Slot<C::Pool>>>,
}

impl<C: PoolConnector> PoolManager<C> {
    /// Create a manager over the built-in tenant table.
    pub fn new(connector: C) -> Self {
        Self::with_registry(connector, TenantRegistry::builtin())
    }

    /// Create a manager over a specific tenant table.
    pub fn with_registry(connector: C, registry: TenantRegistry) -> Self {
        Self {
            connector,
            registry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The tenant registry used to route ERP requests.
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// The connector used to create pools.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The portal pool, created on first use.
    pub async fn get_portal_pool(&self) -> DbResult<Arc<C::Pool>> {
        self.get_pool(&PoolKey::Portal).await
    }

    /// The pool for a tenant's physical ERP database, created on first use.
    ///
    /// Tenant codes that share a physical database get the same pool.
    pub async fn get_erp_pool(&self, tenant_code: &str) -> DbResult<Arc<C::Pool>> {
        let entry = self.registry.resolve(tenant_code)?;
        self.get_erp_pool_for(entry).await
    }

    /// The pool for an already-resolved tenant.
    pub async fn get_erp_pool_for(&self, entry: &TenantEntry) -> DbResult<Arc<C::Pool>> {
        self.get_pool(&PoolKey::erp(entry.physical_database)).await
    }

    /// Return the live pool for `key`, replacing a stale one or creating one
    /// if none is cached.
    pub async fn get_pool(&self, key: &PoolKey) -> DbResult<Arc<C::Pool>> {
        let slot = self.slot(key);
        let mut cached = slot.lock().await;

        if let Some(pool) = cached.as_ref() {
            if pool.is_connected() {
                return Ok(pool.clone());
            }
        }

        if let Some(stale) = cached.take() {
            warn!(key = %key, "Cached pool reports disconnected, replacing it");
            if let Err(e) = stale.close().await {
                warn!(key = %key, error = %e, "Failed to close stale pool");
            }
        }

        debug!(key = %key, "Creating pool");
        let pool = self
            .connector
            .connect(key)
            .await
            .map(Arc::new)
            .map_err(|source| DbError::ConnectionFailed {
                key: key.clone(),
                source,
            })?;

        *cached = Some(pool.clone());
        info!(key = %key, "Pool ready");
        Ok(pool)
    }

    /// Keys that currently hold a live pool.
    ///
    /// Never waits on a slot. A key whose slot is locked at the moment of the
    /// call (its pool being created, replaced or handed out) is left out, so
    /// the list is a best-effort snapshot for administrative display.
    pub fn cached_keys(&self) -> Vec<PoolKey> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| {
                slot.try_lock()
                    .map_or(false, |cached| cached.as_ref().is_some_and(|p| p.is_connected()))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Close every pool concurrently and empty the cache.
    ///
    /// Close failures are collected in the report and never abort the other
    /// closes. Calling this again, or while nothing is cached, is harmless;
    /// later lookups create fresh pools.
    pub async fn close_all(&self) -> ShutdownReport {
        let slots: Vec<(PoolKey, Slot<C::Pool>)> = self.slots.lock().drain().collect();

        // Locking each slot waits out any creation in flight, so its pool is
        // closed here rather than leaked.
        let closes = slots.into_iter().map(|(key, slot)| async move {
            let pool = slot.lock().await.take()?;
            Some((key, pool.close().await))
        });

        let mut report = ShutdownReport::default();
        for (key, result) in join_all(closes).await.into_iter().flatten() {
            match result {
                Ok(()) => report.closed.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to close pool");
                    report.failures.push((key, e));
                }
            }
        }

        info!(
            closed = report.closed.len(),
            failed = report.failures.len(),
            "All pools closed"
        );
        report
    }

    fn slot(&self, key: &PoolKey) -> Slot<C::Pool> {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }
}

/// Outcome of [`PoolManager::close_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Pools closed cleanly.
    pub closed: Vec<PoolKey>,
    /// Pools whose close reported an error.
    pub failures: Vec<(PoolKey, DriverError)>,
}

impl ShutdownReport {
    /// Check if every close succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
