//! In-memory pools for exercising the pool manager and the hybrid engine
//! without a SQL Server instance.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hybrid_db::{
    DriverError, DriverResult, ManagedPool, PoolConnector, PoolKey, QueryResult, QueryRow,
    SqlParam,
};
use parking_lot::Mutex;
use serde_json::Value;

/// Counters and switches shared by a connector and every pool it creates.
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_close: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub query_delay: Mutex<Duration>,
    pub failing_sql: Mutex<HashSet<String>>,
    pub sql_delays: Mutex<HashMap<String, Duration>>,
    pub completed: Mutex<Vec<String>>,
    pub closed_keys: Mutex<Vec<PoolKey>>,
    pub next_id: AtomicUsize,
}

/// Connector that hands out [`MockPool`]s.
#[derive(Clone, Default)]
pub struct MockConnector {
    pub state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = delay;
        self
    }

    pub fn with_query_delay(self, delay: Duration) -> Self {
        *self.state.query_delay.lock() = delay;
        self
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn closed_keys(&self) -> Vec<PoolKey> {
        self.state.closed_keys.lock().clone()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delay statements with exactly this text by `delay` instead of the
    /// default query delay.
    pub fn delay_sql(&self, sql: &str, delay: Duration) {
        self.state.sql_delays.lock().insert(sql.to_string(), delay);
    }

    /// Statements that ran to completion, in completion order.
    pub fn completed(&self) -> Vec<String> {
        self.state.completed.lock().clone()
    }

    /// Make every statement with exactly this text fail.
    pub fn fail_sql(&self, sql: &str) {
        self.state.failing_sql.lock().insert(sql.to_string());
    }
}

#[async_trait]
impl PoolConnector for MockConnector {
    type Pool = MockPool;

    async fn connect(&self, key: &PoolKey) -> DriverResult<MockPool> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DriverError::connection(format!("cannot reach {}", key)));
        }

        Ok(MockPool {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            key: key.clone(),
            connected: AtomicBool::new(true),
            state: self.state.clone(),
        })
    }
}

/// A pool that answers every query with one row echoing the key, the SQL
/// text and the parameter count.
pub struct MockPool {
    pub id: usize,
    pub key: PoolKey,
    connected: AtomicBool,
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPool")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("connected", &self.connected)
            .finish()
    }
}

impl MockPool {
    /// Simulate the server dropping the connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn run(&self, sql: &str) -> DriverResult<()> {
        let delay = self
            .state
            .sql_delays
            .lock()
            .get(sql)
            .copied()
            .unwrap_or_else(|| *self.state.query_delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        if self.state.failing_sql.lock().contains(sql) {
            return Err(DriverError::query(format!("Invalid object name in '{}'", sql)));
        }
        self.state.completed.lock().push(sql.to_string());
        Ok(())
    }
}

#[async_trait]
impl ManagedPool for MockPool {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> DriverResult<QueryResult> {
        self.run(sql).await?;
        let columns: Arc<[String]> =
            Arc::from(vec!["pool".to_string(), "sql".to_string(), "params".to_string()]);
        let row = QueryRow::new(
            columns,
            vec![
                Value::from(self.key.to_string()),
                Value::from(sql),
                Value::from(params.len()),
            ],
        );
        Ok(QueryResult::from_rows(vec![row]))
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> DriverResult<u64> {
        self.run(sql).await?;
        Ok(params.len() as u64)
    }

    async fn close(&self) -> DriverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.closed_keys.lock().push(self.key.clone());
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(DriverError::connection("close handshake failed"));
        }
        Ok(())
    }
}
