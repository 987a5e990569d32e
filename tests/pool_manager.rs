//! Integration tests for the pool manager.
//!
//! These tests verify:
//! - Tenant aliases sharing one pool
//! - Single pool creation under concurrent first use
//! - Replacement of disconnected pools
//! - Shutdown and re-creation after shutdown

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockConnector, MockPool};
use futures::future::join_all;
use hybrid_db::{DbError, DriverError, ManagedPool, PoolKey, PoolManager, TenantEntry, TenantRegistry};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn manager() -> (MockConnector, PoolManager<MockConnector>) {
    let connector = MockConnector::new();
    (connector.clone(), PoolManager::new(connector))
}

#[tokio::test]
async fn test_aliased_tenants_share_a_pool() {
    let (connector, manager) = manager();

    let a = assert_ok!(manager.get_erp_pool("01").await);
    let b = assert_ok!(manager.get_erp_pool("02").await);

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.key, PoolKey::erp("ERP_NORTE"));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_distinct_databases_get_distinct_pools() {
    let (connector, manager) = manager();

    let norte = assert_ok!(manager.get_erp_pool("01").await);
    let centro = assert_ok!(manager.get_erp_pool("03").await);
    let portal = assert_ok!(manager.get_portal_pool().await);

    assert!(!Arc::ptr_eq(&norte, &centro));
    assert_eq!(centro.key, PoolKey::erp("ERP_CENTRO"));
    assert_eq!(portal.key, PoolKey::Portal);
    assert_eq!(connector.connects(), 3);
}

#[tokio::test]
async fn test_repeated_lookups_reuse_the_pool() {
    let (connector, manager) = manager();

    let first = assert_ok!(manager.get_portal_pool().await);
    for _ in 0..5 {
        let again = assert_ok!(manager.get_portal_pool().await);
        assert!(Arc::ptr_eq(&first, &again));
    }
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_unknown_tenant_never_connects() {
    let (connector, manager) = manager();

    let err = assert_err!(manager.get_erp_pool("99").await);
    assert!(matches!(err, DbError::UnknownTenant(ref code) if code == "99"));
    assert_eq!(err.to_string(), "unknown tenant code '99'");
    assert_eq!(connector.connects(), 0);

    // Lookup is exact: no trimming or padding.
    assert!(matches!(manager.get_erp_pool("1").await, Err(DbError::UnknownTenant(_))));
    assert!(matches!(manager.get_erp_pool(" 01").await, Err(DbError::UnknownTenant(_))));
    assert!(matches!(manager.get_erp_pool("").await, Err(DbError::UnknownTenant(_))));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn test_connect_failure_is_not_cached() {
    let (connector, manager) = manager();

    connector.fail_connect(true);
    let err = assert_err!(manager.get_erp_pool("05").await);
    match &err {
        DbError::ConnectionFailed { key, source } => {
            assert_eq!(key, &PoolKey::erp("ERP_OCCIDENTE"));
            assert!(source.is_connection_error());
        }
        other => panic!("expected ConnectionFailed, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert!(manager.cached_keys().is_empty());

    connector.fail_connect(false);
    let pool = assert_ok!(manager.get_erp_pool("06").await);
    assert!(pool.is_connected());
    assert_eq!(connector.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_use_creates_one_pool() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(100));
    let manager = PoolManager::new(connector.clone());

    let lookups = (0..32).map(|i| {
        let code = if i % 2 == 0 { "09" } else { "10" };
        manager.get_erp_pool(code)
    });
    let pools: Vec<Arc<MockPool>> = join_all(lookups)
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(connector.connects(), 1);
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_across_threads() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(20));
    let manager = Arc::new(PoolManager::new(connector.clone()));

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let code = if i % 2 == 0 { "07" } else { "08" };
                manager.get_erp_pool(code).await
            })
        })
        .collect();

    let mut pools = Vec::new();
    for handle in handles {
        pools.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(connector.connects(), 1);
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
}

#[tokio::test(start_paused = true)]
async fn test_different_keys_connect_in_parallel() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(100));
    let manager = PoolManager::new(connector.clone());

    let start = Instant::now();
    let (norte, centro, portal) = tokio::join!(
        manager.get_erp_pool("01"),
        manager.get_erp_pool("03"),
        manager.get_portal_pool(),
    );
    let elapsed = start.elapsed();

    assert_ok!(norte);
    assert_ok!(centro);
    assert_ok!(portal);
    assert_eq!(connector.connects(), 3);
    assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_disconnected_pool_is_replaced() {
    let (connector, manager) = manager();

    let old = assert_ok!(manager.get_erp_pool("03").await);
    old.disconnect();

    let new = assert_ok!(manager.get_erp_pool("04").await);
    assert!(!Arc::ptr_eq(&old, &new));
    assert_ne!(old.id, new.id);
    assert_eq!(connector.connects(), 2);
    assert_eq!(connector.closes(), 1);
    assert_eq!(connector.closed_keys(), vec![PoolKey::erp("ERP_CENTRO")]);
}

#[tokio::test]
async fn test_stale_close_failure_does_not_fail_lookup() {
    let (connector, manager) = manager();

    let old = assert_ok!(manager.get_portal_pool().await);
    old.disconnect();
    connector.fail_close(true);

    let new = assert_ok!(manager.get_portal_pool().await);
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_close_all_closes_every_pool() {
    let (connector, manager) = manager();

    let portal = assert_ok!(manager.get_portal_pool().await);
    assert_ok!(manager.get_erp_pool("01").await);
    assert_ok!(manager.get_erp_pool("02").await);
    assert_ok!(manager.get_erp_pool("09").await);

    let report = manager.close_all().await;
    assert!(report.is_clean());
    assert_eq!(report.closed.len(), 3);
    assert_eq!(connector.closes(), 3);
    assert!(manager.cached_keys().is_empty());
    assert!(!portal.is_connected());

    // Second shutdown has nothing to do.
    let report = manager.close_all().await;
    assert!(report.is_clean());
    assert!(report.closed.is_empty());
    assert_eq!(connector.closes(), 3);

    // Lookups after shutdown start over.
    let fresh = assert_ok!(manager.get_portal_pool().await);
    assert!(!Arc::ptr_eq(&portal, &fresh));
    assert_eq!(connector.connects(), 4);
}

#[tokio::test]
async fn test_close_all_on_empty_manager() {
    let (connector, manager) = manager();

    let report = manager.close_all().await;
    assert!(report.is_clean());
    assert!(report.closed.is_empty());
    assert_eq!(connector.closes(), 0);
}

#[tokio::test]
async fn test_close_all_collects_failures() {
    let (connector, manager) = manager();

    assert_ok!(manager.get_portal_pool().await);
    assert_ok!(manager.get_erp_pool("05").await);
    connector.fail_close(true);

    let report = manager.close_all().await;
    assert!(!report.is_clean());
    assert!(report.closed.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert!(
        report
            .failures
            .iter()
            .all(|(_, e)| matches!(e, DriverError::Connection(_)))
    );
    assert_eq!(connector.closes(), 2);
    assert!(manager.cached_keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_all_waits_for_pool_in_creation() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(100));
    let manager = Arc::new(PoolManager::new(connector.clone()));

    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.get_portal_pool().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = manager.close_all().await;
    let pool = pending.await.unwrap().unwrap();

    assert_eq!(report.closed, vec![PoolKey::Portal]);
    assert_eq!(connector.closes(), 1);
    assert!(!pool.is_connected());
}

#[tokio::test]
async fn test_cached_keys_tracks_live_pools() {
    let (_connector, manager) = manager();

    assert!(manager.cached_keys().is_empty());

    assert_ok!(manager.get_portal_pool().await);
    let norte = assert_ok!(manager.get_erp_pool("02").await);

    let mut keys = manager.cached_keys();
    keys.sort_by_key(|k| k.to_string());
    assert_eq!(keys, vec![PoolKey::erp("ERP_NORTE"), PoolKey::Portal]);

    norte.disconnect();
    assert_eq!(manager.cached_keys(), vec![PoolKey::Portal]);
}

static TWO_TENANTS: &[TenantEntry] = &[
    TenantEntry::new("A", "ERP_SHARED", "A1", "Alpha"),
    TenantEntry::new("B", "ERP_SHARED", "B1", "Beta"),
];

#[tokio::test]
async fn test_custom_registry_routes_by_physical_database() {
    let connector = MockConnector::new();
    let registry = TenantRegistry::new(TWO_TENANTS).unwrap();
    let manager = PoolManager::with_registry(connector.clone(), registry);

    let a = assert_ok!(manager.get_erp_pool("A").await);
    let b = assert_ok!(manager.get_erp_pool("B").await);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.key, PoolKey::erp("ERP_SHARED"));
    assert!(matches!(manager.get_erp_pool("01").await, Err(DbError::UnknownTenant(_))));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_keys_skips_pool_in_creation() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(100));
    let manager = Arc::new(PoolManager::new(connector.clone()));
    assert_ok!(manager.get_erp_pool("01").await);

    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.get_portal_pool().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Returns at once, listing only settled pools.
    assert_eq!(manager.cached_keys(), vec![PoolKey::erp("ERP_NORTE")]);

    assert_ok!(pending.await.unwrap());
    let mut keys = manager.cached_keys();
    keys.sort_by_key(|k| k.to_string());
    assert_eq!(keys, vec![PoolKey::erp("ERP_NORTE"), PoolKey::Portal]);
}
