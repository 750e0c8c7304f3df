//! SQL value types for database-agnostic data transfer.
//!
//! Values are fully owned so rows can move freely between the reading and
//! writing connection and across scheduler workers.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::types::{DataTypeDescriptor, DbType};
use crate::error::{MigrateError, Result};

/// A typed runtime value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
}

/// One materialized row.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Byte footprint used by adaptive pagination.
    ///
    /// Strings and blobs count their length, fixed types a known width.
    pub fn byte_size(&self) -> usize {
        match self {
            SqlValue::Null | SqlValue::Bool(_) => 1,
            SqlValue::I16(_) => 2,
            SqlValue::I32(_) | SqlValue::F32(_) | SqlValue::Date(_) => 4,
            SqlValue::I64(_) | SqlValue::F64(_) | SqlValue::Time(_) | SqlValue::DateTime(_) => 8,
            SqlValue::DateTimeOffset(_) => 10,
            SqlValue::Decimal(_) | SqlValue::Uuid(_) => 16,
            SqlValue::Text(s) => s.len(),
            SqlValue::Bytes(b) => b.len(),
        }
    }

    /// Integer view used by introspection code.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(d) => i64::try_from(d.trunc()).ok(),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            SqlValue::Text(s) => parse_bool(s),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Parse unquoted literal text into a value of the given canonical type.
    pub fn parse_as(text: &str, ty: &DataTypeDescriptor) -> Result<SqlValue> {
        let fail = || MigrateError::unsupported_value(text, ty.to_string());
        let trimmed = text.trim();

        if trimmed.eq_ignore_ascii_case("null") && !ty.db_type.is_character() {
            return Ok(SqlValue::Null);
        }

        let value = match ty.db_type {
            DbType::Boolean => SqlValue::Bool(parse_bool(trimmed).ok_or_else(fail)?),
            DbType::TinyInt | DbType::SmallInt => {
                SqlValue::I16(trimmed.parse().map_err(|_| fail())?)
            }
            DbType::Int => SqlValue::I32(trimmed.parse().map_err(|_| fail())?),
            DbType::BigInt => SqlValue::I64(trimmed.parse().map_err(|_| fail())?),
            // Exact text for numerics rust_decimal cannot hold.
            DbType::Decimal if is_wide_numeric(trimmed) => SqlValue::Text(trimmed.to_string()),
            DbType::Decimal => SqlValue::Decimal(
                Decimal::from_str(trimmed)
                    .or_else(|_| Decimal::from_scientific(trimmed))
                    .map_err(|_| fail())?,
            ),
            DbType::Real => SqlValue::F32(trimmed.parse().map_err(|_| fail())?),
            DbType::Double => SqlValue::F64(trimmed.parse().map_err(|_| fail())?),
            DbType::Binary | DbType::VarBinary | DbType::Blob => {
                let digits = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                    .or_else(|| trimmed.strip_prefix("\\x"))
                    .unwrap_or(trimmed);
                SqlValue::Bytes(hex::decode(digits).map_err(|_| fail())?)
            }
            DbType::Uuid => SqlValue::Uuid(Uuid::parse_str(trimmed).map_err(|_| fail())?),
            DbType::Date => SqlValue::Date(
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| fail())?,
            ),
            DbType::Time => SqlValue::Time(
                NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                    .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
                    .map_err(|_| fail())?,
            ),
            DbType::DateTime => SqlValue::DateTime(parse_datetime(trimmed).ok_or_else(fail)?),
            DbType::DateTimeOffset => {
                SqlValue::DateTimeOffset(parse_datetime_offset(trimmed).ok_or_else(fail)?)
            }
            // Character data keeps its exact text, including surrounding spaces.
            _ => SqlValue::Text(text.to_string()),
        };
        Ok(value)
    }

    /// Convert a value returned by a driver into the representation expected
    /// for `ty` (e.g. an integer `0` evaluated for a bit column becomes `false`).
    pub fn coerce_to(self, ty: &DataTypeDescriptor) -> Result<SqlValue> {
        let fail = |v: &SqlValue| MigrateError::unsupported_value(format!("{:?}", v), ty.to_string());
        match (self, ty.db_type) {
            (SqlValue::Null, _) => Ok(SqlValue::Null),
            (SqlValue::Text(s), t) if !t.is_character() => SqlValue::parse_as(&s, ty),
            (v, DbType::Boolean) => v.as_bool().map(SqlValue::Bool).ok_or_else(|| fail(&v)),
            (v, DbType::TinyInt | DbType::SmallInt) => v
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .map(SqlValue::I16)
                .ok_or_else(|| fail(&v)),
            (v, DbType::Int) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(SqlValue::I32)
                .ok_or_else(|| fail(&v)),
            (v @ (SqlValue::Bool(_) | SqlValue::I16(_) | SqlValue::I32(_)), DbType::BigInt) => {
                v.as_i64().map(SqlValue::I64).ok_or_else(|| fail(&v))
            }
            (v @ (SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_)), DbType::Decimal) => v
                .as_i64()
                .map(|n| SqlValue::Decimal(Decimal::from(n)))
                .ok_or_else(|| fail(&v)),
            (SqlValue::F32(f), DbType::Double) => Ok(SqlValue::F64(f64::from(f))),
            (v @ (SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_)), DbType::Double) => v
                .as_i64()
                .map(|n| SqlValue::F64(n as f64))
                .ok_or_else(|| fail(&v)),
            (SqlValue::DateTime(dt), DbType::Date) => Ok(SqlValue::Date(dt.date())),
            (SqlValue::Date(d), DbType::DateTime) => d
                .and_hms_opt(0, 0, 0)
                .map(SqlValue::DateTime)
                .ok_or_else(|| fail(&SqlValue::Date(d))),
            (v, t) if t.is_character() && !matches!(v, SqlValue::Text(_)) => {
                Ok(SqlValue::Text(v.to_plain_text()))
            }
            (v, _) => Ok(v),
        }
    }

    /// Plain textual form, as a driver would print it.
    pub fn to_plain_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => format!("0x{}", hex::encode(b)),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(d) => d.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        }
    }
}

/// Most significant digits a [`Decimal`] keeps exactly.
const DECIMAL_DIGITS: usize = 28;

/// True for `NaN` and for plain decimal literals (`[+-]digits[.digits]`)
/// with more significant digits than [`Decimal`] holds.
pub fn is_wide_numeric(s: &str) -> bool {
    if s == "NaN" {
        return true;
    }
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return false;
    }
    let significant = int_part.trim_start_matches('0').len() + frac_part.len();
    significant > DECIMAL_DIGITS
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_datetime_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%.f %:z",
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
    ];
    DateTime::parse_from_rfc3339(s)
        .ok()
        .or_else(|| FORMATS.iter().find_map(|f| DateTime::parse_from_str(s, f).ok()))
}

macro_rules! impl_from_for_sql_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_sql_value! {
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A fully materialized query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|r| r.first())
    }

    /// Total byte footprint of all rows.
    pub fn byte_size(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.iter().map(SqlValue::byte_size).sum::<usize>())
            .sum()
    }
}
