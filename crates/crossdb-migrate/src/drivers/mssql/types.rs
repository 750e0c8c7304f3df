//! SQL Server type translation.

use crate::core::traits::TypeTranslator;
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::error::{MigrateError, Result};
use crate::translate::NativeType;

/// Fractional-second precision of `time`, `datetime2` and `datetimeoffset`
/// when none is declared.
const DEFAULT_TIME_SCALE: u32 = 7;

/// Longest `varchar(n)` / `varbinary(n)` before `max` is required.
const MAX_BYTES: u32 = 8000;

/// Longest `nvarchar(n)` before `max` is required.
const MAX_NCHARS: u32 = 4000;

#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlTypes;

fn sized(name: &str, length: Option<u32>, limit: u32) -> String {
    match length {
        Some(n) if n <= limit => format!("{}({})", name, n),
        _ => format!("{}(max)", name),
    }
}

impl TypeTranslator for MssqlTypes {
    fn to_canonical(&self, native: &str) -> Result<DataTypeDescriptor> {
        let t = NativeType::parse(native)?;
        let arg = |i| t.number(i);
        let max = t.is_max();

        let ty = match t.name.as_str() {
            "bit" => DataTypeDescriptor::boolean(),
            "tinyint" => DataTypeDescriptor::tiny_int(),
            "smallint" => DataTypeDescriptor::small_int(),
            "int" | "integer" => DataTypeDescriptor::int(),
            "bigint" => DataTypeDescriptor::big_int(),
            "decimal" | "numeric" | "dec" => {
                DataTypeDescriptor::decimal(arg(0).unwrap_or(18), arg(1).unwrap_or(0))
            }
            "money" => DataTypeDescriptor::decimal(19, 4),
            "smallmoney" => DataTypeDescriptor::decimal(10, 4),
            "real" => DataTypeDescriptor::real(),
            "float" | "double precision" => match arg(0) {
                Some(n) if n <= 24 => DataTypeDescriptor::real(),
                _ => DataTypeDescriptor::double(),
            },
            "char" | "character" => DataTypeDescriptor::char(arg(0).unwrap_or(1)),
            "varchar" | "character varying" if max => DataTypeDescriptor::text(),
            "varchar" | "character varying" => DataTypeDescriptor::varchar(Some(arg(0).unwrap_or(1))),
            "nchar" | "national character" => DataTypeDescriptor::nchar(arg(0).unwrap_or(1)),
            "nvarchar" | "national character varying" if max => DataTypeDescriptor::ntext(),
            "nvarchar" | "national character varying" => {
                DataTypeDescriptor::nvarchar(Some(arg(0).unwrap_or(1)))
            }
            "sysname" => DataTypeDescriptor::nvarchar(Some(128)),
            "text" => DataTypeDescriptor::text(),
            "ntext" => DataTypeDescriptor::ntext(),
            "binary" => DataTypeDescriptor::binary(arg(0).unwrap_or(1)),
            "varbinary" if max => DataTypeDescriptor::blob(),
            "varbinary" => DataTypeDescriptor::varbinary(Some(arg(0).unwrap_or(1))),
            "image" => DataTypeDescriptor::blob(),
            "rowversion" | "timestamp" => DataTypeDescriptor::binary(8),
            "date" => DataTypeDescriptor::date(),
            "time" => DataTypeDescriptor::time(arg(0).unwrap_or(DEFAULT_TIME_SCALE)),
            "datetime2" => DataTypeDescriptor::datetime(arg(0).unwrap_or(DEFAULT_TIME_SCALE)),
            "datetime" => DataTypeDescriptor::datetime(3),
            "smalldatetime" => DataTypeDescriptor::datetime(0),
            "datetimeoffset" => {
                DataTypeDescriptor::datetime_offset(arg(0).unwrap_or(DEFAULT_TIME_SCALE))
            }
            "uniqueidentifier" => DataTypeDescriptor::uuid(),
            "xml" => DataTypeDescriptor::xml(),
            _ => return Err(MigrateError::unsupported_type(native)),
        };
        Ok(ty)
    }

    fn to_native(&self, ty: &DataTypeDescriptor) -> Result<String> {
        let scale = |s: Option<u32>| s.unwrap_or(DEFAULT_TIME_SCALE).min(DEFAULT_TIME_SCALE);
        let native = match ty.db_type {
            DbType::Boolean => "bit".to_string(),
            DbType::TinyInt => "tinyint".to_string(),
            DbType::SmallInt => "smallint".to_string(),
            DbType::Int => "int".to_string(),
            DbType::BigInt => "bigint".to_string(),
            DbType::Decimal => match ty.precision_scale() {
                Some((p, s)) => format!("decimal({},{})", p.clamp(1, 38), s.min(p.clamp(1, 38))),
                None => "decimal(38,10)".to_string(),
            },
            DbType::Real => "real".to_string(),
            DbType::Double => "float".to_string(),
            DbType::Char => match ty.arg1 {
                Some(n) if n <= MAX_BYTES => format!("char({})", n),
                _ => "varchar(max)".to_string(),
            },
            DbType::NChar => match ty.arg1 {
                Some(n) if n <= MAX_NCHARS => format!("nchar({})", n),
                _ => "nvarchar(max)".to_string(),
            },
            DbType::VarChar => sized("varchar", ty.arg1, MAX_BYTES),
            DbType::NVarChar => sized("nvarchar", ty.arg1, MAX_NCHARS),
            DbType::Text => "varchar(max)".to_string(),
            DbType::NText | DbType::Json | DbType::Unknown => "nvarchar(max)".to_string(),
            DbType::Binary => match ty.arg1 {
                Some(n) if n <= MAX_BYTES => format!("binary({})", n),
                _ => "varbinary(max)".to_string(),
            },
            DbType::VarBinary => sized("varbinary", ty.arg1, MAX_BYTES),
            DbType::Blob => "varbinary(max)".to_string(),
            DbType::Date => "date".to_string(),
            DbType::Time => format!("time({})", scale(ty.arg1)),
            DbType::DateTime => format!("datetime2({})", scale(ty.arg1)),
            DbType::DateTimeOffset => format!("datetimeoffset({})", scale(ty.arg1)),
            DbType::Uuid => "uniqueidentifier".to_string(),
            DbType::Xml => "xml".to_string(),
        };
        Ok(native)
    }
}
