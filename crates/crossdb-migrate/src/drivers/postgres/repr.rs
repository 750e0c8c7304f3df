//! PostgreSQL literal rendering.
//!
//! Strings are single-quoted with quotes doubled (standard conforming
//! strings). Control characters become `chr(n)` joined with `||`; NUL cannot
//! be stored in PostgreSQL text and is rejected.

use crate::core::identifier::escape_string_literal;
use crate::core::traits::ValueRepr;
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::translate::repr::{format_datetime, format_datetime_offset, format_time, render_text};

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresRepr;

fn quote(s: &str) -> String {
    format!("'{}'", escape_string_literal(s))
}

fn float_literal(v: f64, type_name: &str) -> String {
    if v.is_nan() {
        format!("'NaN'::{}", type_name)
    } else if v.is_infinite() {
        let sign = if v < 0.0 { "-" } else { "" };
        format!("'{}Infinity'::{}", sign, type_name)
    } else {
        v.to_string()
    }
}

impl ValueRepr for PostgresRepr {
    fn render(&self, value: &SqlValue, store_type: &DataTypeDescriptor) -> Result<String> {
        let value = value.clone().coerce_to(store_type)?;
        let literal = match &value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) if v.is_finite() => v.to_string(),
            SqlValue::F32(v) => float_literal(f64::from(*v), "real"),
            SqlValue::F64(v) => float_literal(*v, "double precision"),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) if store_type.db_type == DbType::Decimal => {
                if s == "NaN" {
                    "'NaN'::numeric".to_string()
                } else {
                    s.clone()
                }
            }
            SqlValue::Text(s) => render_text(s, "||", quote, |c| {
                if c == '\0' {
                    Err(MigrateError::unsupported_value(
                        "string containing NUL",
                        store_type.to_string(),
                    ))
                } else {
                    Ok(format!("chr({})", c as u32))
                }
            })?,
            SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            SqlValue::Uuid(u) => quote(&u.to_string()),
            SqlValue::Date(d) => quote(&d.format("%Y-%m-%d").to_string()),
            SqlValue::Time(t) => quote(&format_time(t)),
            SqlValue::DateTime(dt) => quote(&format_datetime(dt, ' ')),
            SqlValue::DateTimeOffset(dt) => quote(&format_datetime_offset(dt, ' ')),
        };
        Ok(literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Evaluate a rendered string expression the way PostgreSQL would.
    fn eval(literal: &str) -> String {
        let body = literal
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(literal);
        let mut out = String::new();
        let mut rest = body;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('\'') {
                let mut chars = after.char_indices().peekable();
                let mut end = None;
                while let Some((i, c)) = chars.next() {
                    if c == '\'' {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            out.push('\'');
                            chars.next();
                        } else {
                            end = Some(i);
                            break;
                        }
                    } else {
                        out.push(c);
                    }
                }
                rest = &after[end.expect("closing quote") + 1..];
            } else if let Some(after) = rest.strip_prefix("chr(") {
                let close = after.find(')').unwrap();
                let code: u32 = after[..close].parse().unwrap();
                out.push(char::from_u32(code).unwrap());
                rest = &after[close + 1..];
            } else if let Some(after) = rest.strip_prefix(" || ") {
                rest = after;
            } else {
                panic!("unexpected literal text: {}", rest);
            }
        }
        out
    }

    #[test]
    fn test_render_strings_round_trip() {
        let alphabet = ['a', 'Z', '\'', '\n', '\r', '\t', '\u{1}', '\u{1f}', 'é', '|', ' ', '\\'];
        let mut rng = StdRng::seed_from_u64(7);
        let ty = DataTypeDescriptor::text();
        let mut samples = vec![String::new(), "''''".to_string(), "\n\r\t".to_string()];
        for _ in 0..300 {
            let len = rng.gen_range(0..20);
            samples.push((0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect());
        }
        for s in samples {
            let rendered = PostgresRepr.render(&SqlValue::Text(s.clone()), &ty).unwrap();
            assert_eq!(eval(&rendered), s, "rendered as {}", rendered);
        }
    }

    #[test]
    fn test_render_rejects_nul() {
        let err = PostgresRepr
            .render(&SqlValue::Text("a\0b".into()), &DataTypeDescriptor::text())
            .unwrap_err();
        assert!(matches!(err, MigrateError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_render_scalars() {
        let r = PostgresRepr;
        assert_eq!(r.render(&SqlValue::Bool(false), &DataTypeDescriptor::boolean()).unwrap(), "FALSE");
        assert_eq!(r.render(&SqlValue::I32(0), &DataTypeDescriptor::boolean()).unwrap(), "FALSE");
        assert_eq!(r.render(&SqlValue::Null, &DataTypeDescriptor::int()).unwrap(), "NULL");
        assert_eq!(
            r.render(&SqlValue::Bytes(vec![0xde, 0xad]), &DataTypeDescriptor::blob()).unwrap(),
            "'\\xdead'::bytea"
        );
        assert_eq!(
            r.render(&SqlValue::F64(f64::NAN), &DataTypeDescriptor::double()).unwrap(),
            "'NaN'::double precision"
        );
    }

    #[test]
    fn test_render_wide_numeric_unquoted() {
        let ty = DataTypeDescriptor::decimal(38, 0);
        let wide = "-12345678901234567890123456789012345";
        assert_eq!(PostgresRepr.render(&SqlValue::Text(wide.into()), &ty).unwrap(), wide);
        assert_eq!(
            PostgresRepr.render(&SqlValue::Text("NaN".into()), &ty).unwrap(),
            "'NaN'::numeric"
        );
    }

    #[test]
    fn test_render_temporal_trims_zeros() {
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .and_then(|d| d.and_hms_micro_opt(7, 8, 9, 500_000))
            .unwrap();
        assert_eq!(
            PostgresRepr.render(&SqlValue::DateTime(dt), &DataTypeDescriptor::datetime(6)).unwrap(),
            "'2024-05-06 07:08:09.5'"
        );
    }
}
