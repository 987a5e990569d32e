//! Statement execution over one checked-out SQL Server connection.

use bb8::PooledConnection;
use bb8_tiberius::ConnectionManager;
use tiberius::ToSql;
use tracing::debug;

use crate::error::DriverResult;
use crate::row::QueryResult;
use crate::types::{SqlParam, rewrite_placeholders, typed_statement};

/// A connection borrowed from an [`MssqlPool`](crate::pool::MssqlPool).
///
/// Returned to the pool when dropped.
pub struct MssqlConnection<'a> {
    client: PooledConnection<'a, ConnectionManager>,
}

impl<'a> MssqlConnection<'a> {
    pub(crate) fn new(client: PooledConnection<'a, ConnectionManager>) -> Self {
        Self { client }
    }

    /// Run a statement and collect its first result set.
    pub async fn query(&mut self, sql: &str, params: &[SqlParam]) -> DriverResult<QueryResult> {
        let (statement, bound) = prepare(sql, params)?;
        debug!(sql = %statement, params = bound.len(), "Executing query");

        let stream = self.client.query(statement.as_str(), &bound).await?;
        let rows = stream.into_first_result().await?;
        Ok(QueryResult::from_tiberius(rows))
    }

    /// Run a statement that returns no rows and report how many it touched.
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> DriverResult<u64> {
        let (statement, bound) = prepare(sql, params)?;
        debug!(sql = %statement, params = bound.len(), "Executing statement");

        let result = self.client.execute(statement.as_str(), &bound).await?;
        Ok(result.total())
    }

    /// Round-trip a trivial statement.
    pub async fn ping(&mut self) -> DriverResult<()> {
        self.client.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }
}

/// The statement text and bound values sent for `sql`.
fn prepare<'a>(sql: &str, params: &'a [SqlParam]) -> DriverResult<(String, Vec<&'a dyn ToSql>)> {
    let bound = bind(params)?;
    let sql = rewrite_placeholders(sql);
    Ok((typed_statement(&sql, params).into_owned(), bound))
}

fn bind(params: &[SqlParam]) -> DriverResult<Vec<&dyn ToSql>> {
    params
        .iter()
        .map(|p| p.validate().map(|()| p as &dyn ToSql))
        .collect()
}
