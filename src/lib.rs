//! # hybrid-db
//!
//! Multi-tenant connection routing and hybrid queries for SQL Server.
//!
//! Two database domains are served from one process:
//! - the **portal** database, a single database shared by every tenant
//! - the **ERP** databases, one physical database per group of tenants
//!
//! This crate provides:
//! - A static tenant registry mapping tenant codes to physical ERP databases
//! - A lazily populated pool cache keyed by physical database, so tenants
//!   that share a database share a pool
//! - Parameterized queries against either domain
//! - Hybrid queries that run one statement on each side concurrently
//!
//! ## Example
//!
//! ```rust,ignore
//! use hybrid_db::{HybridEngine, RouterConfig, sql_params};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hybrid_db::logging::init();
//!
//!     let engine = HybridEngine::from_config(RouterConfig::from_env()?);
//!
//!     let (orders, stock) = engine
//!         .query_hybrid(
//!             "03",
//!             "SELECT folio, total FROM orders WHERE status = $1",
//!             "SELECT folio, qty FROM stock WHERE qty > @P1",
//!             &sql_params!["open"],
//!             &sql_params![0],
//!         )
//!         .await?;
//!
//!     println!("{} orders, {} stock rows", orders.len(), stock.len());
//!
//!     engine.close_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod row;
pub mod tenant;
pub mod types;

pub use config::{EncryptionMode, MssqlConfig, MssqlConfigBuilder, PoolConfig, RouterConfig};
pub use connection::MssqlConnection;
pub use engine::HybridEngine;
pub use error::{DbError, DbResult, DriverError, DriverResult, PoolKey, QueryTarget};
pub use manager::{PoolManager, ShutdownReport};
pub use pool::{ManagedPool, MssqlConnector, MssqlPool, PoolConnector, PoolStatus};
pub use row::{QueryResult, QueryRow};
pub use tenant::{TenantEntry, TenantRegistry};
pub use types::{SqlParam, SqlType};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{MssqlConfig, PoolConfig, RouterConfig};
    pub use crate::engine::HybridEngine;
    pub use crate::error::{DbError, DbResult, PoolKey, QueryTarget};
    pub use crate::manager::PoolManager;
    pub use crate::pool::{ManagedPool, MssqlConnector, PoolConnector};
    pub use crate::row::{QueryResult, QueryRow};
    pub use crate::sql_params;
    pub use crate::tenant::TenantRegistry;
    pub use crate::types::SqlParam;
}
