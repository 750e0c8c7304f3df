//! SQL Server default-constraint translation.
//!
//! SQL Server stores defaults wrapped in parentheses, e.g. `((0))` or
//! `(getdate())`; they are stripped before recognition.

use async_trait::async_trait;

use crate::core::expression::{SqlExpressionDescriptor, SqlFunction};
use crate::core::identifier::{qualify, quote_mssql};
use crate::core::traits::{ExpressionTranslator, SqlExecutor, ValueRepr};
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::error::Result;
use crate::translate::expression::{parse_function_call, parse_simple_literal, strip_redundant_parens};
use crate::translate::{canonicalize_default, ConstantCache, Recognized};

use super::repr::MssqlRepr;

const NOW_FUNCTIONS: &[&str] = &[
    "getdate",
    "sysdatetime",
    "getutcdate",
    "sysutcdatetime",
    "sysdatetimeoffset",
    "current_timestamp",
];

const UUID_FUNCTIONS: &[&str] = &["newid", "newsequentialid"];

const CONVERSIONS: &[&str] = &["convert", "try_convert", "cast", "try_cast"];

const NEXT_VALUE_FOR: &str = "next value for ";

#[derive(Debug, Default)]
pub struct MssqlExpressions {
    cache: ConstantCache,
}

impl MssqlExpressions {
    pub fn new() -> Self {
        Self::default()
    }
}

fn recognize(text: &str) -> Recognized {
    let lower = text.to_lowercase();
    if lower == "current_timestamp" {
        return Recognized::Function(SqlFunction::Now);
    }
    let head = text.get(..NEXT_VALUE_FOR.len());
    if head.is_some_and(|h| h.eq_ignore_ascii_case(NEXT_VALUE_FOR)) {
        let mut parts = split_bracketed(text[NEXT_VALUE_FOR.len()..].trim());
        if let Some(sequence) = parts.pop().filter(|s| !s.is_empty()) {
            let schema = parts.pop();
            return Recognized::Function(SqlFunction::NextValue { schema, sequence });
        }
        return Recognized::UnknownFunction;
    }
    let Some(call) = parse_function_call(&lower) else {
        return Recognized::Constant;
    };
    if NOW_FUNCTIONS.contains(&call.name.as_str()) {
        Recognized::Function(SqlFunction::Now)
    } else if UUID_FUNCTIONS.contains(&call.name.as_str()) {
        Recognized::Function(SqlFunction::Uuid)
    } else if CONVERSIONS.contains(&call.name.as_str()) {
        Recognized::Constant
    } else {
        Recognized::UnknownFunction
    }
}

/// Split `[a].[b.c]` or `a.b` into identifier parts.
fn split_bracketed(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets && chars.peek() == Some(&']') => {
                current.push(']');
                chars.next();
            }
            ']' if in_brackets => in_brackets = false,
            '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Position of the first top-level `sep` (case-insensitive) outside quotes
/// and parentheses.
fn find_top_level(text: &str, sep: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth -= 1,
            _ if !in_string && depth == 0 && bytes[i..].starts_with(sep.as_bytes()) => {
                return Some(i)
            }
            _ => {}
        }
    }
    None
}

/// Literal inside `CONVERT(type, literal[, style])` or `CAST(literal AS type)`.
fn conversion_operand(text: &str) -> Option<&str> {
    let call = parse_function_call(text)?;
    let operand = match call.name.as_str() {
        "convert" | "try_convert" => {
            let rest = &call.args[find_top_level(call.args, ",")? + 1..];
            match find_top_level(rest, ",") {
                Some(style) => &rest[..style],
                None => rest,
            }
        }
        "cast" | "try_cast" => &call.args[..find_top_level(call.args, " as ")?],
        _ => return None,
    };
    let operand = operand.trim();
    parse_simple_literal(operand).map(|_| operand)
}

#[async_trait]
impl ExpressionTranslator for MssqlExpressions {
    async fn to_canonical(
        &self,
        native: &str,
        store_type: &DataTypeDescriptor,
        conn: Option<&mut dyn SqlExecutor>,
    ) -> Result<Option<SqlExpressionDescriptor>> {
        let select = |expr: &str| format!("SELECT {}", expr);
        if let Some(operand) = conversion_operand(strip_redundant_parens(native)) {
            let offline =
                canonicalize_default(operand, store_type, None, &self.cache, recognize, select).await;
            if let Ok(expr) = offline {
                return Ok(expr);
            }
        }
        canonicalize_default(native, store_type, conn, &self.cache, recognize, select).await
    }

    fn from_canonical(
        &self,
        expr: &SqlExpressionDescriptor,
        store_type: &DataTypeDescriptor,
    ) -> Result<String> {
        match expr {
            SqlExpressionDescriptor::Function(SqlFunction::Now) => Ok(match store_type.db_type {
                DbType::DateTimeOffset => "SYSDATETIMEOFFSET()",
                DbType::DateTime if store_type.fractional_scale().unwrap_or(7) <= 3 => "GETDATE()",
                DbType::Date => "GETDATE()",
                _ => "SYSDATETIME()",
            }
            .to_string()),
            SqlExpressionDescriptor::Function(SqlFunction::Uuid) => Ok("NEWID()".to_string()),
            SqlExpressionDescriptor::Function(SqlFunction::NextValue { schema, sequence }) => Ok(
                format!("NEXT VALUE FOR {}", qualify(quote_mssql, schema.as_deref(), sequence)?),
            ),
            SqlExpressionDescriptor::Constant(value) => MssqlRepr.render(value, store_type),
        }
    }
}
