//! Canonical default-value expressions.

use serde::Serialize;
use std::fmt;

use super::value::SqlValue;

/// Generator functions recognized across engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum SqlFunction {
    /// Current date/time, rendered to fit the column type.
    Now,
    /// New random UUID.
    Uuid,
    /// Next value of a named sequence.
    NextValue {
        schema: Option<String>,
        sequence: String,
    },
}

impl fmt::Display for SqlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlFunction::Now => write!(f, "now"),
            SqlFunction::Uuid => write!(f, "uuid"),
            SqlFunction::NextValue {
                schema: Some(s),
                sequence,
            } => write!(f, "nextval({}.{})", s, sequence),
            SqlFunction::NextValue {
                schema: None,
                sequence,
            } => write!(f, "nextval({})", sequence),
        }
    }
}

/// A column default: a generator function or an already-typed constant, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlExpressionDescriptor {
    Function(SqlFunction),
    Constant(SqlValue),
}

impl SqlExpressionDescriptor {
    pub fn now() -> Self {
        SqlExpressionDescriptor::Function(SqlFunction::Now)
    }

    pub fn uuid() -> Self {
        SqlExpressionDescriptor::Function(SqlFunction::Uuid)
    }

    pub fn constant(value: impl Into<SqlValue>) -> Self {
        SqlExpressionDescriptor::Constant(value.into())
    }

    pub fn function(&self) -> Option<&SqlFunction> {
        match self {
            SqlExpressionDescriptor::Function(f) => Some(f),
            SqlExpressionDescriptor::Constant(_) => None,
        }
    }

    /// Sequence referenced by this default, if any.
    pub fn referenced_sequence(&self) -> Option<(Option<&str>, &str)> {
        match self {
            SqlExpressionDescriptor::Function(SqlFunction::NextValue { schema, sequence }) => {
                Some((schema.as_deref(), sequence.as_str()))
            }
            _ => None,
        }
    }
}
