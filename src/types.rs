//! Parameter binding for SQL Server statements.
//!
//! Callers either build [`SqlParam`] values directly or hand over dynamically
//! typed JSON through [`SqlParam::from_json`]. Either way the declared SQL
//! type is fixed by this table:
//!
//! | Value                 | Declared type        |
//! |-----------------------|----------------------|
//! | whole number          | `INT` / `BIGINT`     |
//! | fractional number     | `DECIMAL(18, 2)`     |
//! | string                | `NVARCHAR`           |
//! | boolean               | `BIT`                |
//! | date/time             | `DATETIME2`          |
//! | null / absent         | `NVARCHAR` (null)    |

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tiberius::numeric::Numeric;
use tiberius::{ColumnData, ToSql};

use crate::error::{DriverError, DriverResult};

/// Total digits of a bound decimal.
pub const DECIMAL_PRECISION: u8 = 18;
/// Fractional digits of a bound decimal.
pub const DECIMAL_SCALE: u8 = 2;

/// Largest magnitude that fits `DECIMAL(18, 2)`: sixteen integral digits.
const DECIMAL_LIMIT: i128 = 10_i128.pow(DECIMAL_PRECISION as u32);

/// Declared SQL Server type of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer, for values outside the `INT` range.
    BigInt,
    /// Fixed-point decimal.
    Decimal {
        /// Total digits.
        precision: u8,
        /// Fractional digits.
        scale: u8,
    },
    /// Variable-length unicode text.
    NVarChar,
    /// Single bit flag.
    Bit,
    /// Timestamp with fractional seconds.
    DateTime2,
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("INT"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Decimal { precision, scale } => write!(f, "DECIMAL({}, {})", precision, scale),
            Self::NVarChar => f.write_str("NVARCHAR(MAX)"),
            Self::Bit => f.write_str("BIT"),
            Self::DateTime2 => f.write_str("DATETIME2"),
        }
    }
}

/// A statement parameter with an explicit SQL type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Whole number.
    Int(i64),
    /// Monetary or otherwise fractional value, bound as `DECIMAL(18, 2)`.
    Decimal(Decimal),
    /// Text.
    Text(String),
    /// Boolean flag.
    Bool(bool),
    /// Date and time.
    Timestamp(NaiveDateTime),
    /// Null, bound as a null `NVARCHAR`.
    Null,
}

impl SqlParam {
    /// Classify a dynamically typed value.
    ///
    /// Whole numbers are checked before fractional ones, so `1500` and
    /// `1500.0` both bind as integers while `1500.5` binds as a decimal.
    /// Arrays and objects bind as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> DriverResult<Self> {
        use serde_json::Value;

        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::Int(i));
                }
                match n.as_f64() {
                    Some(f) => Self::from_f64(f),
                    None => Err(DriverError::type_conversion(format!(
                        "number {} does not fit a SQL parameter",
                        n
                    ))),
                }
            }
            Value::String(s) => Ok(Self::Text(s.clone())),
            other => Ok(Self::Text(other.to_string())),
        }
    }

    /// Classify a float: integral values become [`SqlParam::Int`].
    pub fn from_f64(value: f64) -> DriverResult<Self> {
        if !value.is_finite() {
            return Err(DriverError::type_conversion(format!(
                "{} cannot be bound as a number",
                value
            )));
        }
        if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
            return Ok(Self::Int(value as i64));
        }
        Decimal::from_f64(value)
            .map(Self::Decimal)
            .ok_or_else(|| DriverError::type_conversion(format!("{} is out of range", value)))
    }

    /// The SQL type this parameter is declared with.
    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::Int(i) if i32::try_from(*i).is_ok() => SqlType::Int,
            Self::Int(_) => SqlType::BigInt,
            Self::Decimal(_) => SqlType::Decimal {
                precision: DECIMAL_PRECISION,
                scale: DECIMAL_SCALE,
            },
            Self::Text(_) | Self::Null => SqlType::NVarChar,
            Self::Bool(_) => SqlType::Bit,
            Self::Timestamp(_) => SqlType::DateTime2,
        }
    }

    /// Check if this is a null parameter.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check that the value can be sent with its declared type.
    pub fn validate(&self) -> DriverResult<()> {
        if let Self::Decimal(d) = self {
            to_numeric(d)?;
        }
        Ok(())
    }
}

/// Round to two places and check the result fits eighteen digits.
fn to_numeric(value: &Decimal) -> DriverResult<Numeric> {
    let mut scaled = value.round_dp(DECIMAL_SCALE as u32);
    scaled.rescale(DECIMAL_SCALE as u32);
    let mantissa = scaled.mantissa();
    if mantissa.abs() >= DECIMAL_LIMIT {
        return Err(DriverError::type_conversion(format!(
            "{} does not fit DECIMAL({}, {})",
            value, DECIMAL_PRECISION, DECIMAL_SCALE
        )));
    }
    Ok(Numeric::new_with_scale(mantissa, DECIMAL_SCALE))
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Self::Int(i) => match i32::try_from(*i) {
                Ok(small) => ColumnData::I32(Some(small)),
                Err(_) => ColumnData::I64(Some(*i)),
            },
            // Out-of-range decimals are rejected by `validate` before binding.
            Self::Decimal(d) => ColumnData::Numeric(to_numeric(d).ok()),
            Self::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Self::Bool(b) => ColumnData::Bit(Some(*b)),
            Self::Timestamp(ts) => ts.to_sql(),
            Self::Null => ColumnData::String(None),
        }
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<Decimal> for SqlParam {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for SqlParam {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v.naive_utc())
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Build a `Vec<SqlParam>` from values convertible into [`SqlParam`].
///
/// ```rust
/// use hybrid_db::{sql_params, SqlParam};
///
/// let params = sql_params!["01", 1500, true];
/// assert_eq!(params[1], SqlParam::Int(1500));
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::types::SqlParam>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::types::SqlParam::from($value)),+]
    };
}

/// Wrap a statement in `sp_executesql` with a parameter list taken from
/// [`SqlParam::sql_type`].
///
/// The driver sizes each outer declaration to the value it carries (`1500.5`
/// is declared `numeric(6,2)`); the inner declaration fixes the types the
/// statement sees. Statements without parameters pass through unchanged.
pub fn typed_statement<'a>(sql: &'a str, params: &[SqlParam]) -> Cow<'a, str> {
    if params.is_empty() {
        return Cow::Borrowed(sql);
    }

    let declarations = params
        .iter()
        .enumerate()
        .map(|(i, param)| format!("@P{} {}", i + 1, param.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let bindings = (1..=params.len())
        .map(|i| format!("@P{i} = @P{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    Cow::Owned(format!(
        "EXEC sp_executesql N'{}', N'{}', {}",
        sql.replace('\'', "''"),
        declarations,
        bindings
    ))
}

/// Rewrite `$1, $2, ...` placeholders to SQL Server's `@P1, @P2, ...`.
///
/// Text inside single-quoted literals is left untouched, as is any `$` not
/// followed by a digit.
pub fn rewrite_placeholders(sql: &str) -> Cow<'_, str> {
    if !sql.contains('$') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '$' if !in_literal && chars.peek().is_some_and(char::is_ascii_digit) => {
                out.push_str("@P");
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    out.push(d);
                }
            }
            _ => out.push(c),
        }
    }

    Cow::Owned(out)
}
