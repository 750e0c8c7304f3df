//! Canonical, engine-neutral column types.
//!
//! Every engine translates its native type syntax to and from a
//! [`DataTypeDescriptor`]. Arguments are positional: `arg1` is the length for
//! character and binary families, the precision for `Decimal`, and the
//! fractional-second scale for temporal types. `arg2` is only used as the
//! `Decimal` scale.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of logical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Boolean,
    /// Unsigned 8-bit integer.
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    /// Exact numeric. `arg1` precision, `arg2` scale; both absent means unconstrained.
    Decimal,
    /// 4-byte floating point.
    Real,
    /// 8-byte floating point.
    Double,
    Char,
    VarChar,
    NChar,
    NVarChar,
    /// Unbounded single-byte text.
    Text,
    /// Unbounded national text.
    NText,
    Binary,
    VarBinary,
    /// Unbounded binary.
    Blob,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Uuid,
    Xml,
    Json,
    /// Opaque fallback for native types with no canonical mapping.
    Unknown,
}

impl DbType {
    /// True for character families whose values are measured in characters.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            DbType::Char
                | DbType::VarChar
                | DbType::NChar
                | DbType::NVarChar
                | DbType::Text
                | DbType::NText
                | DbType::Xml
                | DbType::Json
                | DbType::Unknown
        )
    }

    /// True for national (unicode) character families.
    pub fn is_national(&self) -> bool {
        matches!(self, DbType::NChar | DbType::NVarChar | DbType::NText)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, DbType::Binary | DbType::VarBinary | DbType::Blob)
    }

    /// Large-object types excluded from pagination ordering.
    pub fn is_huge(&self) -> bool {
        matches!(
            self,
            DbType::Text | DbType::NText | DbType::Blob | DbType::Xml | DbType::Json | DbType::Unknown
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DbType::TinyInt | DbType::SmallInt | DbType::Int | DbType::BigInt
        )
    }
}

/// A canonical type plus up to two numeric arguments.
///
/// Construct through the named factory functions so argument meaning stays
/// unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTypeDescriptor {
    pub db_type: DbType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg1: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg2: Option<u32>,
}

impl DataTypeDescriptor {
    const fn new(db_type: DbType, arg1: Option<u32>, arg2: Option<u32>) -> Self {
        Self {
            db_type,
            arg1,
            arg2,
        }
    }

    pub const fn boolean() -> Self {
        Self::new(DbType::Boolean, None, None)
    }

    pub const fn tiny_int() -> Self {
        Self::new(DbType::TinyInt, None, None)
    }

    pub const fn small_int() -> Self {
        Self::new(DbType::SmallInt, None, None)
    }

    pub const fn int() -> Self {
        Self::new(DbType::Int, None, None)
    }

    pub const fn big_int() -> Self {
        Self::new(DbType::BigInt, None, None)
    }

    pub const fn decimal(precision: u32, scale: u32) -> Self {
        Self::new(DbType::Decimal, Some(precision), Some(scale))
    }

    /// Decimal without declared precision or scale.
    pub const fn decimal_unconstrained() -> Self {
        Self::new(DbType::Decimal, None, None)
    }

    pub const fn real() -> Self {
        Self::new(DbType::Real, None, None)
    }

    pub const fn double() -> Self {
        Self::new(DbType::Double, None, None)
    }

    pub const fn char(length: u32) -> Self {
        Self::new(DbType::Char, Some(length), None)
    }

    /// `None` length means varying without an upper bound.
    pub const fn varchar(length: Option<u32>) -> Self {
        Self::new(DbType::VarChar, length, None)
    }

    pub const fn nchar(length: u32) -> Self {
        Self::new(DbType::NChar, Some(length), None)
    }

    pub const fn nvarchar(length: Option<u32>) -> Self {
        Self::new(DbType::NVarChar, length, None)
    }

    pub const fn text() -> Self {
        Self::new(DbType::Text, None, None)
    }

    pub const fn ntext() -> Self {
        Self::new(DbType::NText, None, None)
    }

    pub const fn binary(length: u32) -> Self {
        Self::new(DbType::Binary, Some(length), None)
    }

    pub const fn varbinary(length: Option<u32>) -> Self {
        Self::new(DbType::VarBinary, length, None)
    }

    pub const fn blob() -> Self {
        Self::new(DbType::Blob, None, None)
    }

    pub const fn date() -> Self {
        Self::new(DbType::Date, None, None)
    }

    pub const fn time(scale: u32) -> Self {
        Self::new(DbType::Time, Some(scale), None)
    }

    pub const fn datetime(scale: u32) -> Self {
        Self::new(DbType::DateTime, Some(scale), None)
    }

    pub const fn datetime_offset(scale: u32) -> Self {
        Self::new(DbType::DateTimeOffset, Some(scale), None)
    }

    pub const fn uuid() -> Self {
        Self::new(DbType::Uuid, None, None)
    }

    pub const fn xml() -> Self {
        Self::new(DbType::Xml, None, None)
    }

    pub const fn json() -> Self {
        Self::new(DbType::Json, None, None)
    }

    pub const fn unknown() -> Self {
        Self::new(DbType::Unknown, None, None)
    }

    /// Length for character/binary families.
    pub fn length(&self) -> Option<u32> {
        match self.db_type {
            DbType::Char
            | DbType::VarChar
            | DbType::NChar
            | DbType::NVarChar
            | DbType::Binary
            | DbType::VarBinary => self.arg1,
            _ => None,
        }
    }

    /// Precision and scale for `Decimal`.
    pub fn precision_scale(&self) -> Option<(u32, u32)> {
        match (self.db_type, self.arg1) {
            (DbType::Decimal, Some(p)) => Some((p, self.arg2.unwrap_or(0))),
            _ => None,
        }
    }

    /// Fractional-second digits for temporal types.
    pub fn fractional_scale(&self) -> Option<u32> {
        match self.db_type {
            DbType::Time | DbType::DateTime | DbType::DateTimeOffset => self.arg1,
            _ => None,
        }
    }

    /// Rough byte width of one value, used when a value is not available.
    pub fn estimated_width(&self) -> usize {
        match self.db_type {
            DbType::Boolean | DbType::TinyInt => 1,
            DbType::SmallInt => 2,
            DbType::Int | DbType::Real | DbType::Date => 4,
            DbType::BigInt | DbType::Double | DbType::Time | DbType::DateTime => 8,
            DbType::DateTimeOffset => 10,
            DbType::Decimal | DbType::Uuid => 16,
            _ => self.arg1.map(|n| n as usize).unwrap_or(256),
        }
    }
}

impl fmt::Display for DataTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.db_type)?;
        match (self.arg1, self.arg2) {
            (Some(a), Some(b)) => write!(f, "({}, {})", a, b),
            (Some(a), None) => write!(f, "({})", a),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factories_place_arguments() {
        assert_eq!(DataTypeDescriptor::decimal(10, 2).precision_scale(), Some((10, 2)));
        assert_eq!(DataTypeDescriptor::varchar(Some(50)).length(), Some(50));
        assert_eq!(DataTypeDescriptor::varchar(None).length(), None);
        assert_eq!(DataTypeDescriptor::time(3).fractional_scale(), Some(3));
        assert_eq!(DataTypeDescriptor::decimal_unconstrained().precision_scale(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(DataTypeDescriptor::decimal(18, 4).to_string(), "Decimal(18, 4)");
        assert_eq!(DataTypeDescriptor::nvarchar(Some(20)).to_string(), "NVarChar(20)");
        assert_eq!(DataTypeDescriptor::uuid().to_string(), "Uuid");
    }

    #[test]
    fn test_huge_types() {
        assert!(DbType::Blob.is_huge());
        assert!(DbType::NText.is_huge());
        assert!(!DbType::VarChar.is_huge());
        assert!(!DbType::Int.is_huge());
    }
}
