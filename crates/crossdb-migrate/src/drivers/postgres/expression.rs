//! PostgreSQL default-expression translation.

use async_trait::async_trait;

use crate::core::expression::{SqlExpressionDescriptor, SqlFunction};
use crate::core::identifier::{escape_string_literal, qualify, quote_pg};
use crate::core::traits::{ExpressionTranslator, SqlExecutor, ValueRepr};
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::error::Result;
use crate::translate::expression::{parse_function_call, strip_casts, unquote_string};
use crate::translate::{canonicalize_default, ConstantCache, Recognized};

use super::repr::PostgresRepr;

const NOW_KEYWORDS: &[&str] = &[
    "current_timestamp",
    "current_date",
    "current_time",
    "localtimestamp",
    "localtime",
];

const NOW_FUNCTIONS: &[&str] = &[
    "now",
    "current_timestamp",
    "current_time",
    "localtimestamp",
    "localtime",
    "clock_timestamp",
    "statement_timestamp",
    "transaction_timestamp",
];

const UUID_FUNCTIONS: &[&str] = &["gen_random_uuid", "uuid_generate_v4", "uuid_generate_v1"];

#[derive(Debug, Default)]
pub struct PostgresExpressions {
    cache: ConstantCache,
}

impl PostgresExpressions {
    pub fn new() -> Self {
        Self::default()
    }
}

fn recognize(text: &str) -> Recognized {
    let bare = strip_casts(text).to_lowercase();
    if NOW_KEYWORDS.contains(&bare.as_str()) {
        return Recognized::Function(SqlFunction::Now);
    }
    let Some(call) = parse_function_call(&bare) else {
        return Recognized::Constant;
    };
    if NOW_FUNCTIONS.contains(&call.name.as_str()) {
        return Recognized::Function(SqlFunction::Now);
    }
    if UUID_FUNCTIONS.contains(&call.name.as_str()) {
        return Recognized::Function(SqlFunction::Uuid);
    }
    if call.name == "nextval" {
        // Case of the sequence name matters; re-read it from the original text.
        if let Some(f) = parse_function_call(strip_casts(text)).and_then(|c| parse_nextval(c.args)) {
            return Recognized::Function(f);
        }
    }
    Recognized::UnknownFunction
}

/// `'"Sales".order_seq'::regclass` to a `NextValue` function.
fn parse_nextval(args: &str) -> Option<SqlFunction> {
    let name = unquote_string(strip_casts(args))?;
    let mut parts = split_qualified(&name);
    let sequence = parts.pop()?;
    let schema = parts.pop();
    Some(SqlFunction::NextValue { schema, sequence })
}

/// Split `a."b.c"` into identifier parts, unquoting and folding unquoted parts.
fn split_qualified(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '.' if !quoted => {
                parts.push(finish_part(&mut current, was_quoted));
                was_quoted = false;
            }
            _ => current.push(c),
        }
    }
    parts.push(finish_part(&mut current, was_quoted));
    parts
}

fn finish_part(current: &mut String, was_quoted: bool) -> String {
    let part = std::mem::take(current);
    if was_quoted {
        part
    } else {
        part.to_lowercase()
    }
}

#[async_trait]
impl ExpressionTranslator for PostgresExpressions {
    async fn to_canonical(
        &self,
        native: &str,
        store_type: &DataTypeDescriptor,
        conn: Option<&mut dyn SqlExecutor>,
    ) -> Result<Option<SqlExpressionDescriptor>> {
        canonicalize_default(native, store_type, conn, &self.cache, recognize, |expr| {
            format!("SELECT {}", expr)
        })
        .await
    }

    fn from_canonical(
        &self,
        expr: &SqlExpressionDescriptor,
        store_type: &DataTypeDescriptor,
    ) -> Result<String> {
        match expr {
            SqlExpressionDescriptor::Function(SqlFunction::Now) => Ok(match store_type.db_type {
                DbType::Date => "CURRENT_DATE",
                DbType::Time => "LOCALTIME",
                DbType::DateTime => "LOCALTIMESTAMP",
                _ => "CURRENT_TIMESTAMP",
            }
            .to_string()),
            SqlExpressionDescriptor::Function(SqlFunction::Uuid) => {
                Ok("gen_random_uuid()".to_string())
            }
            SqlExpressionDescriptor::Function(SqlFunction::NextValue { schema, sequence }) => {
                let name = qualify(quote_pg, schema.as_deref(), sequence)?;
                Ok(format!("nextval('{}'::regclass)", escape_string_literal(&name)))
            }
            SqlExpressionDescriptor::Constant(value) => PostgresRepr.render(value, store_type),
        }
    }
}
