//! SQL Server literal rendering.
//!
//! Unicode strings use the `N'...'` form. Control characters are spliced in
//! with `CHAR(n)` / `NCHAR(n)` and `+`, so every literal stays on one line.

use crate::core::identifier::escape_string_literal;
use crate::core::traits::ValueRepr;
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::translate::repr::{format_datetime, format_datetime_offset, format_time, render_text};

#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlRepr;

fn quote(s: &str) -> String {
    format!("'{}'", escape_string_literal(s))
}

fn is_national(ty: &DataTypeDescriptor, s: &str) -> bool {
    ty.db_type.is_national()
        || matches!(ty.db_type, DbType::Xml | DbType::Json | DbType::Unknown)
        || !s.is_ascii()
}

fn float_literal(v: f64, store_type: &DataTypeDescriptor) -> Result<String> {
    if v.is_finite() {
        Ok(v.to_string())
    } else {
        Err(MigrateError::unsupported_value(v.to_string(), store_type.to_string()))
    }
}

impl ValueRepr for MssqlRepr {
    fn render(&self, value: &SqlValue, store_type: &DataTypeDescriptor) -> Result<String> {
        let value = value.clone().coerce_to(store_type)?;
        let literal = match &value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => float_literal(f64::from(*v), store_type)?,
            SqlValue::F64(v) => float_literal(*v, store_type)?,
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) if store_type.db_type == DbType::Decimal => {
                if s == "NaN" {
                    return Err(MigrateError::unsupported_value(s, store_type.to_string()));
                }
                s.clone()
            }
            SqlValue::Text(s) => {
                if is_national(store_type, s) {
                    render_text(s, "+", |t| format!("N{}", quote(t)), |c| {
                        Ok(format!("NCHAR({})", c as u32))
                    })?
                } else {
                    render_text(s, "+", quote, |c| Ok(format!("CHAR({})", c as u32)))?
                }
            }
            SqlValue::Bytes(b) => format!("0x{}", hex::encode_upper(b)),
            SqlValue::Uuid(u) => quote(&u.to_string()),
            SqlValue::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => quote(&format_time(t)),
            SqlValue::DateTime(dt) => quote(&format_datetime(dt, 'T')),
            SqlValue::DateTimeOffset(dt) => quote(&format_datetime_offset(dt, 'T')),
        };
        Ok(literal)
    }
}
