//! Error types for tenant routing and query execution.
//!
//! Errors come in two layers. [`DriverError`] describes what went wrong
//! talking to SQL Server (pool checkout, protocol, timeouts). [`DbError`] is
//! what callers of the pool manager and the hybrid facade see: it wraps a
//! driver error together with the tenant, pool key or query target it
//! happened on, so upstream code can render a specific diagnostic.

use std::fmt;

use smol_str::SmolStr;
use thiserror::Error;

/// Result type for driver-level operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type for routed operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by a pool or connection while talking to SQL Server.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Type conversion error.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Every pooled connection stayed busy past the checkout timeout. The
    /// pool itself is still healthy.
    #[error("timed out waiting for a pooled connection")]
    CheckoutTimeout,

    /// The pool was closed before the operation ran.
    #[error("pool is closed")]
    Closed,
}

impl DriverError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Check if this error means the underlying connection is gone.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Closed => true,
            Self::SqlServer(e) => matches!(e, tiberius::error::Error::Io { .. }),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::CheckoutTimeout)
    }
}

impl<E> From<bb8::RunError<E>> for DriverError
where
    E: std::error::Error,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::User(e) => DriverError::Connection(e.to_string()),
            bb8::RunError::TimedOut => DriverError::CheckoutTimeout,
        }
    }
}

/// Identity of a cached pool.
///
/// ERP pools are keyed by physical database name, never by tenant code, so
/// tenant codes that alias the same database share one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// The single portal database.
    Portal,
    /// An ERP database, by physical name.
    Erp(SmolStr),
}

impl PoolKey {
    /// Key for the ERP pool of a physical database.
    pub fn erp(database: impl AsRef<str>) -> Self {
        Self::Erp(SmolStr::new(database.as_ref()))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portal => f.write_str("portal"),
            Self::Erp(database) => write!(f, "erp database '{}'", database),
        }
    }
}

/// The domain a statement was sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// The portal database.
    Portal,
    /// An ERP database reached through a tenant code.
    Erp {
        /// Tenant code the caller supplied.
        tenant: SmolStr,
        /// Physical database the code resolved to.
        database: SmolStr,
    },
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portal => f.write_str("portal"),
            Self::Erp { tenant, database } => {
                write!(f, "erp tenant '{}' (database '{}')", tenant, database)
            }
        }
    }
}

/// Errors surfaced by the pool manager and the hybrid query facade.
#[derive(Error, Debug)]
pub enum DbError {
    /// Tenant code is not in the registry.
    #[error("unknown tenant code '{0}'")]
    UnknownTenant(String),

    /// A pool could not be established for `key`.
    #[error("failed to connect to {key}: {source}")]
    ConnectionFailed {
        /// Pool that failed to connect.
        key: PoolKey,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// A statement failed after a pool was obtained.
    #[error("query failed on {target}: {source}")]
    QueryExecutionFailed {
        /// Where the statement ran.
        target: QueryTarget,
        /// Underlying driver error.
        #[source]
        source: DriverError,
    },

    /// One or both halves of a hybrid query failed.
    #[error("hybrid query failed ({})", describe_hybrid(.portal, .erp))]
    HybridPartialFailure {
        /// Portal side error, if the portal statement failed.
        portal: Option<Box<DbError>>,
        /// ERP side error, if the ERP statement failed.
        erp: Option<Box<DbError>>,
    },

    /// Invalid configuration or tenant table.
    #[error("configuration error: {0}")]
    Config(String),
}

fn describe_hybrid(portal: &Option<Box<DbError>>, erp: &Option<Box<DbError>>) -> String {
    match (portal, erp) {
        (Some(p), Some(e)) => format!("portal: {}; erp: {}", p, e),
        (Some(p), None) => format!("portal: {}", p),
        (None, Some(e)) => format!("erp: {}", e),
        (None, None) => "no side reported an error".to_string(),
    }
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::QueryExecutionFailed { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ConnectionFailed { source, .. } | Self::QueryExecutionFailed { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }

    /// Whether a caller may reasonably retry the same operation.
    ///
    /// The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::QueryExecutionFailed { source, .. } => {
                source.is_timeout() || source.is_connection_error()
            }
            Self::HybridPartialFailure { portal, erp } => portal
                .iter()
                .chain(erp.iter())
                .all(|e| e.is_retryable()),
            Self::UnknownTenant(_) | Self::Config(_) => false,
        }
    }
}
