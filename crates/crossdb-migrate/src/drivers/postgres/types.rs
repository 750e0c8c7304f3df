//! PostgreSQL type translation.

use crate::core::traits::TypeTranslator;
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::error::{MigrateError, Result};
use crate::translate::NativeType;

/// Fractional-second precision PostgreSQL uses when none is declared.
const DEFAULT_TIME_SCALE: u32 = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypes;

impl TypeTranslator for PostgresTypes {
    fn to_canonical(&self, native: &str) -> Result<DataTypeDescriptor> {
        let t = NativeType::parse(native)?;
        let arg = |i| t.number(i);

        let ty = match t.name.as_str() {
            "boolean" | "bool" => DataTypeDescriptor::boolean(),
            "smallint" | "int2" | "smallserial" | "serial2" => DataTypeDescriptor::small_int(),
            "integer" | "int" | "int4" | "serial" | "serial4" => DataTypeDescriptor::int(),
            "bigint" | "int8" | "bigserial" | "serial8" => DataTypeDescriptor::big_int(),
            "numeric" | "decimal" => match (arg(0), arg(1)) {
                (Some(p), s) => DataTypeDescriptor::decimal(p, s.unwrap_or(0)),
                (None, _) => DataTypeDescriptor::decimal_unconstrained(),
            },
            "real" | "float4" => DataTypeDescriptor::real(),
            "double precision" | "float8" => DataTypeDescriptor::double(),
            "float" => match arg(0) {
                Some(n) if n <= 24 => DataTypeDescriptor::real(),
                _ => DataTypeDescriptor::double(),
            },
            "character" | "char" | "bpchar" => DataTypeDescriptor::char(arg(0).unwrap_or(1)),
            "character varying" | "varchar" => DataTypeDescriptor::varchar(arg(0)),
            "text" | "citext" => DataTypeDescriptor::text(),
            "bytea" => DataTypeDescriptor::blob(),
            "date" => DataTypeDescriptor::date(),
            "time" | "time without time zone" => {
                DataTypeDescriptor::time(arg(0).unwrap_or(DEFAULT_TIME_SCALE))
            }
            "timestamp" | "timestamp without time zone" => {
                DataTypeDescriptor::datetime(arg(0).unwrap_or(DEFAULT_TIME_SCALE))
            }
            "timestamptz" | "timestamp with time zone" => {
                DataTypeDescriptor::datetime_offset(arg(0).unwrap_or(DEFAULT_TIME_SCALE))
            }
            "uuid" => DataTypeDescriptor::uuid(),
            "xml" => DataTypeDescriptor::xml(),
            "json" | "jsonb" => DataTypeDescriptor::json(),
            _ => return Err(MigrateError::unsupported_type(native)),
        };
        Ok(ty)
    }

    fn to_native(&self, ty: &DataTypeDescriptor) -> Result<String> {
        let scale = |s: Option<u32>| s.unwrap_or(DEFAULT_TIME_SCALE).min(DEFAULT_TIME_SCALE);
        let native = match ty.db_type {
            DbType::Boolean => "boolean".to_string(),
            DbType::TinyInt | DbType::SmallInt => "smallint".to_string(),
            DbType::Int => "integer".to_string(),
            DbType::BigInt => "bigint".to_string(),
            DbType::Decimal => match ty.precision_scale() {
                Some((p, s)) => format!("numeric({},{})", p, s),
                None => "numeric".to_string(),
            },
            DbType::Real => "real".to_string(),
            DbType::Double => "double precision".to_string(),
            DbType::Char | DbType::NChar => format!("character({})", ty.arg1.unwrap_or(1)),
            DbType::VarChar | DbType::NVarChar => match ty.arg1 {
                Some(n) => format!("character varying({})", n),
                None => "character varying".to_string(),
            },
            DbType::Text | DbType::NText | DbType::Unknown => "text".to_string(),
            DbType::Binary | DbType::VarBinary | DbType::Blob => "bytea".to_string(),
            DbType::Date => "date".to_string(),
            DbType::Time => format!("time({}) without time zone", scale(ty.arg1)),
            DbType::DateTime => format!("timestamp({}) without time zone", scale(ty.arg1)),
            DbType::DateTimeOffset => format!("timestamp({}) with time zone", scale(ty.arg1)),
            DbType::Uuid => "uuid".to_string(),
            DbType::Xml => "xml".to_string(),
            DbType::Json => "jsonb".to_string(),
        };
        Ok(native)
    }
}
