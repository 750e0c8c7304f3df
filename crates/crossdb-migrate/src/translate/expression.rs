//! Shared default-value translation machinery.
//!
//! Engines only supply their function table (which call syntaxes are
//! generators, which are harmless casts) and how to evaluate an expression;
//! the flow below is common:
//!
//! 1. strip redundant parentheses (`((0))` becomes `0`)
//! 2. recognize generator functions
//! 3. parse simple literals (strings, numbers, booleans, `NULL`, with casts)
//! 4. otherwise evaluate `SELECT <expr>` on a live connection, if there is one
//!
//! Constant results are cached by expression text and column type.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::core::expression::{SqlExpressionDescriptor, SqlFunction};
use crate::core::traits::SqlExecutor;
use crate::core::types::DataTypeDescriptor;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Outcome of an engine's function recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognized {
    Function(SqlFunction),
    /// Not a generator; may be a literal or an evaluable constant expression.
    Constant,
    /// Call syntax the engine does not know.
    UnknownFunction,
}

/// A parsed `name(args)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall<'a> {
    /// Lowercase, unquoted, last part of a qualified name.
    pub name: String,
    pub args: &'a str,
}

/// Literal forms recognized without a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleLiteral {
    Null,
    Bool(bool),
    Number(String),
    Text(String),
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^([A-Za-z_\["][\w\]\[".$]*)\s*\("#).expect("valid function call regex")
    })
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid number regex")
    })
}

fn cast_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(?i)[a-z_"][a-z0-9_ ."]*(\(\s*\d+\s*(,\s*\d+\s*)?\))?[a-z ]*(\[\])?$"#)
            .expect("valid cast regex")
    })
}

/// Index of the parenthesis closing the one at `open`, ignoring quoted text.
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove parentheses wrapping the whole expression, any number of times.
pub fn strip_redundant_parens(text: &str) -> &str {
    let mut current = text.trim();
    while current.starts_with('(') && matching_paren(current, 0) == Some(current.len() - 1) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

/// Remove trailing PostgreSQL-style `::type` casts outside string literals.
pub fn strip_casts(text: &str) -> &str {
    let mut current = strip_redundant_parens(text);
    loop {
        let Some(pos) = last_cast_operator(current) else {
            return current;
        };
        let target = current[pos + 2..].trim();
        if !cast_type_regex().is_match(target) {
            return current;
        }
        current = strip_redundant_parens(&current[..pos]);
    }
}

fn last_cast_operator(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut depth = 0i32;
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'(' if !in_string => depth += 1,
            b')' if !in_string => depth -= 1,
            b':' if !in_string && depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                found = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Parse `name(args)` spanning the whole text.
pub fn parse_function_call(text: &str) -> Option<FunctionCall<'_>> {
    let text = text.trim();
    let caps = call_regex().captures(text)?;
    let whole = caps.get(0)?;
    let open = whole.end() - 1;
    if matching_paren(text, open)? != text.len() - 1 {
        return None;
    }
    let raw_name = caps.get(1)?.as_str();
    let name = raw_name
        .rsplit('.')
        .next()
        .unwrap_or(raw_name)
        .trim_matches(|c| c == '[' || c == ']' || c == '"')
        .to_lowercase();
    Some(FunctionCall {
        name,
        args: text[open + 1..text.len() - 1].trim(),
    })
}

/// Parse a literal, tolerating redundant parentheses, casts and an `N` prefix.
pub fn parse_simple_literal(text: &str) -> Option<SimpleLiteral> {
    let t = strip_casts(text);
    if t.eq_ignore_ascii_case("null") {
        return Some(SimpleLiteral::Null);
    }
    if t.eq_ignore_ascii_case("true") {
        return Some(SimpleLiteral::Bool(true));
    }
    if t.eq_ignore_ascii_case("false") {
        return Some(SimpleLiteral::Bool(false));
    }
    if number_regex().is_match(t) {
        return Some(SimpleLiteral::Number(t.to_string()));
    }
    let quoted = t
        .strip_prefix('N')
        .or_else(|| t.strip_prefix('n'))
        .filter(|rest| rest.starts_with('\''))
        .unwrap_or(t);
    unquote_string(quoted).map(SimpleLiteral::Text)
}

/// Unquote a single-quoted literal spanning the whole text.
pub fn unquote_string(text: &str) -> Option<String> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            // Inside the literal a quote must be doubled.
            if chars.next() != Some('\'') {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}

/// Constant results keyed by expression text and column type.
#[derive(Debug, Default)]
pub struct ConstantCache {
    entries: Mutex<HashMap<(String, DataTypeDescriptor), SqlValue>>,
}

impl ConstantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str, ty: &DataTypeDescriptor) -> Option<SqlValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(text.to_string(), *ty))
            .cloned()
    }

    pub fn insert(&self, text: &str, ty: &DataTypeDescriptor, value: SqlValue) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((text.to_string(), *ty), value);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Translate native default text into a canonical expression.
///
/// `recognize` is the engine's function table; `select_sql` wraps an
/// expression into the engine's scalar `SELECT`.
pub async fn canonicalize_default<R, S>(
    native: &str,
    store_type: &DataTypeDescriptor,
    conn: Option<&mut dyn SqlExecutor>,
    cache: &ConstantCache,
    recognize: R,
    select_sql: S,
) -> Result<Option<SqlExpressionDescriptor>>
where
    R: Fn(&str) -> Recognized,
    S: Fn(&str) -> String,
{
    let text = strip_redundant_parens(native);
    if text.is_empty() {
        return Ok(None);
    }

    match recognize(text) {
        Recognized::Function(f) => return Ok(Some(SqlExpressionDescriptor::Function(f))),
        Recognized::UnknownFunction => return Err(MigrateError::unsupported_expression(native)),
        Recognized::Constant => {}
    }

    if let Some(value) = cache.get(text, store_type) {
        return Ok(Some(SqlExpressionDescriptor::Constant(value)));
    }

    let literal = match parse_simple_literal(text) {
        Some(SimpleLiteral::Null) => return Ok(None),
        Some(SimpleLiteral::Text(s)) | Some(SimpleLiteral::Number(s)) => {
            SqlValue::parse_as(&s, store_type).ok()
        }
        Some(SimpleLiteral::Bool(b)) => SqlValue::Bool(b).coerce_to(store_type).ok(),
        None => None,
    };

    let value = match (literal, conn) {
        (Some(v), _) => v,
        (None, Some(conn)) => {
            let sql = select_sql(text);
            debug!("Evaluating default expression: {}", sql);
            conn.query_scalar(&sql, &[])
                .await
                .map_err(|e| {
                    debug!("Evaluation of default '{}' failed: {}", native, e);
                    MigrateError::unsupported_expression(native)
                })?
                .unwrap_or(SqlValue::Null)
                .coerce_to(store_type)
                .map_err(|_| MigrateError::unsupported_expression(native))?
        }
        (None, None) => return Err(MigrateError::unsupported_expression(native)),
    };

    if value.is_null() {
        return Ok(None);
    }
    cache.insert(text, store_type, value.clone());
    Ok(Some(SqlExpressionDescriptor::Constant(value)))
}
