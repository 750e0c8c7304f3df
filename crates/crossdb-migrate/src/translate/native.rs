//! Parsing of native type syntax such as `numeric(10, 2)`,
//! `character varying(20)` or `timestamp(3) without time zone`.

use crate::error::{MigrateError, Result};

/// One argument inside the type's parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeArg {
    Number(u32),
    /// SQL Server `max`.
    Max,
}

/// A native type split into a normalized name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    /// Lowercase, single-spaced, without the argument list or quoting.
    pub name: String,
    pub args: Vec<NativeArg>,
}

impl NativeType {
    pub fn parse(text: &str) -> Result<Self> {
        let fail = || MigrateError::unsupported_type(text);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(fail());
        }

        let (head, args, tail) = match trimmed.find('(') {
            Some(open) => {
                let close = trimmed[open..].find(')').map(|i| i + open).ok_or_else(fail)?;
                let args = trimmed[open + 1..close]
                    .split(',')
                    .map(|a| parse_arg(a.trim()).ok_or_else(fail))
                    .collect::<Result<Vec<_>>>()?;
                (&trimmed[..open], args, &trimmed[close + 1..])
            }
            None => (trimmed, Vec::new(), ""),
        };

        let name = format!("{} {}", head, tail)
            .split_whitespace()
            .map(|w| w.trim_matches(|c| c == '[' || c == ']' || c == '"'))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        // Schema-qualified names (`sys.int`, `pg_catalog.int4`) map by their last part.
        let name = match name.rsplit_once('.') {
            Some((_, last)) if !last.is_empty() => last.to_string(),
            _ => name,
        };

        if name.is_empty() {
            return Err(fail());
        }

        Ok(Self { name, args })
    }

    /// Numeric argument at `idx`; `Max` and missing yield `None`.
    pub fn number(&self, idx: usize) -> Option<u32> {
        match self.args.get(idx) {
            Some(NativeArg::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn is_max(&self) -> bool {
        matches!(self.args.first(), Some(NativeArg::Max))
    }
}

fn parse_arg(arg: &str) -> Option<NativeArg> {
    if arg.eq_ignore_ascii_case("max") {
        Some(NativeArg::Max)
    } else {
        arg.parse().ok().map(NativeArg::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let t = NativeType::parse("INT").unwrap();
        assert_eq!(t.name, "int");
        assert!(t.args.is_empty());
    }

    #[test]
    fn test_parse_with_args() {
        let t = NativeType::parse("numeric( 10 , 2 )").unwrap();
        assert_eq!(t.name, "numeric");
        assert_eq!(t.number(0), Some(10));
        assert_eq!(t.number(1), Some(2));
    }

    #[test]
    fn test_parse_args_in_the_middle() {
        let t = NativeType::parse("timestamp(3) without time zone").unwrap();
        assert_eq!(t.name, "timestamp without time zone");
        assert_eq!(t.number(0), Some(3));
    }

    #[test]
    fn test_parse_multiword() {
        let t = NativeType::parse("character   varying(20)").unwrap();
        assert_eq!(t.name, "character varying");
        assert_eq!(t.number(0), Some(20));
    }

    #[test]
    fn test_parse_max_and_brackets() {
        let t = NativeType::parse("[nvarchar](MAX)").unwrap();
        assert_eq!(t.name, "nvarchar");
        assert!(t.is_max());
        assert_eq!(t.number(0), None);
    }

    #[test]
    fn test_parse_schema_qualified() {
        assert_eq!(NativeType::parse("pg_catalog.int4").unwrap().name, "int4");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(NativeType::parse("").is_err());
        assert!(NativeType::parse("decimal(x)").is_err());
        assert!(NativeType::parse("varchar(10").is_err());
    }
}
