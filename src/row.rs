//! Query results shared by both domains.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tiberius::{ColumnData, FromSql};

use crate::error::{DriverError, DriverResult};

/// One row of a result set.
///
/// Column names are shared between all rows of the same result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl QueryRow {
    /// Create a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get a column value by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Get a column value by index.
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Deserialize a column into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, column: &str) -> DriverResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| DriverError::type_conversion(format!("no column '{}'", column)))?;
        serde_json::from_value(value.clone()).map_err(|e| {
            DriverError::type_conversion(format!("failed to read column '{}': {}", column, e))
        })
    }

    /// Column names, in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column values, in result order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Convert a driver row.
    pub fn from_tiberius(columns: Arc<[String]>, row: tiberius::Row) -> Self {
        let values = row.into_iter().map(column_to_json).collect();
        Self::new(columns, values)
    }
}

impl Serialize for QueryRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Rows plus the affected-row count.
///
/// Row order is whatever the statement produced.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueryResult {
    /// Returned rows.
    pub rows: Vec<QueryRow>,
    /// Rows affected (for queries, the number of rows returned).
    pub rows_affected: u64,
}

impl QueryResult {
    /// A result for a statement that returned rows.
    pub fn from_rows(rows: Vec<QueryRow>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }

    /// A result for a statement that returned no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    /// Convert a driver result set.
    pub fn from_tiberius(rows: Vec<tiberius::Row>) -> Self {
        let columns: Arc<[String]> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_else(|| Arc::from(Vec::new()));

        Self::from_rows(
            rows.into_iter()
                .map(|row| QueryRow::from_tiberius(columns.clone(), row))
                .collect(),
        )
    }

    /// Check if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of returned rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&QueryRow> {
        self.rows.first()
    }
}

impl IntoIterator for QueryResult {
    type Item = QueryRow;
    type IntoIter = std::vec::IntoIter<QueryRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

fn number(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

fn column_to_json(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I16(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I32(v) => v.map_or(Value::Null, Value::from),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::from),
        ColumnData::F32(v) => number(v.map(f64::from)),
        ColumnData::F64(v) => number(v),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v.map_or(Value::Null, |s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(Value::Null, |g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.map_or(Value::Null, |b| {
            Value::String(b.iter().map(|byte| format!("{:02x}", byte)).collect())
        }),
        ColumnData::Numeric(v) => number(v.and_then(|n| {
            Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale()))
                .ok()
                .and_then(|d| d.to_f64())
        })),
        ColumnData::Xml(v) => v.map_or(Value::Null, |x| Value::String(x.into_owned().into_string())),
        temporal => temporal_to_json(&temporal),
    }
}

/// Dates and times render as ISO-8601 strings.
fn temporal_to_json(data: &ColumnData<'static>) -> Value {
    let rendered = match data {
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(data)
            .ok()
            .flatten()
            .map(|ts| ts.to_rfc3339()),
        ColumnData::Date(_) => NaiveDate::from_sql(data).ok().flatten().map(|d| d.to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data).ok().flatten().map(|t| t.to_string()),
        _ => NaiveDateTime::from_sql(data)
            .ok()
            .flatten()
            .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
    };
    rendered.map_or(Value::Null, Value::String)
}
