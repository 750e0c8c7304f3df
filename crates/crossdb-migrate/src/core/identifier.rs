//! Identifier validation and quoting.
//!
//! Object names cannot be bound as parameters, so every dialect builds them
//! into SQL text through exactly one quoting function defined here.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (SQL Server allows 128 characters, PostgreSQL 63 bytes).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier before it is quoted.
///
/// Rejects empty identifiers, identifiers containing NUL bytes, and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`] bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::UnsupportedSchema(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::UnsupportedSchema(format!(
            "identifier contains a NUL byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::UnsupportedSchema(format!(
            "identifier exceeds {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier: `"name"` with embedded quotes doubled.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a SQL Server identifier: `[name]` with embedded `]` doubled.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify `name` with an optional schema using the given quoting function.
pub fn qualify(
    quote: fn(&str) -> Result<String>,
    schema: Option<&str>,
    name: &str,
) -> Result<String> {
    match schema {
        Some(s) if !s.is_empty() => Ok(format!("{}.{}", quote(s)?, quote(name)?)),
        _ => quote(name),
    }
}

/// Quote and comma-join a column list.
pub fn quote_list(quote: fn(&str) -> Result<String>, names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote(n))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Escape text for use inside a single-quoted SQL string literal.
pub fn escape_string_literal(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_rejects_nul() {
        assert!(validate_identifier("bad\0name").is_err());
    }

    #[test]
    fn test_validate_rejects_long() {
        assert!(validate_identifier(&"x".repeat(129)).is_err());
        assert!(validate_identifier(&"x".repeat(128)).is_ok());
    }

    #[test]
    fn test_quote_pg_escapes() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("a\"b").unwrap(), "\"a\"\"b\"");
    }

    #[test]
    fn test_quote_mssql_escapes() {
        assert_eq!(quote_mssql("users").unwrap(), "[users]");
        assert_eq!(quote_mssql("a]b").unwrap(), "[a]]b]");
        assert_eq!(quote_mssql("a[b").unwrap(), "[a[b]");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(quote_pg, Some("s"), "t").unwrap(), "\"s\".\"t\"");
        assert_eq!(qualify(quote_mssql, None, "t").unwrap(), "[t]");
        assert_eq!(qualify(quote_mssql, Some(""), "t").unwrap(), "[t]");
    }

    #[test]
    fn test_quote_list() {
        let cols = vec!["a".to_string(), "b c".to_string()];
        assert_eq!(quote_list(quote_mssql, &cols).unwrap(), "[a], [b c]");
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("O'Brien"), "O''Brien");
    }
}
