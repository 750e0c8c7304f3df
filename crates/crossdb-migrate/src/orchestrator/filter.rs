//! Include/exclude table globs.

use regex::Regex;

use crate::core::schema::TableDescriptor;
use crate::error::{MigrateError, Result};

/// Compile a glob (`*`, `?`) into an anchored, case-insensitive regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| MigrateError::Config(format!("Invalid table pattern '{}': {}", pattern, e)))
}

/// A table matches a pattern by its full name or its bare name.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: include.iter().map(|p| glob_to_regex(p)).collect::<Result<_>>()?,
            exclude: exclude.iter().map(|p| glob_to_regex(p)).collect::<Result<_>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn matches(&self, table: &TableDescriptor) -> bool {
        let full = table.full_name();
        let hit = |re: &Regex| re.is_match(&full) || re.is_match(&table.name);
        (self.include.is_empty() || self.include.iter().any(hit)) && !self.exclude.iter().any(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(schema: &str, name: &str) -> TableDescriptor {
        TableDescriptor::new(Some(schema.to_string()), name)
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = TableFilter::new(
            &["sales.*".to_string(), "Users".to_string()],
            &["*_archive".to_string(), "sales.tmp?".to_string()],
        )
        .unwrap();
        assert!(filter.matches(&t("sales", "orders")));
        assert!(filter.matches(&t("dbo", "users")));
        assert!(!filter.matches(&t("dbo", "products")));
        assert!(!filter.matches(&t("sales", "orders_archive")));
        assert!(!filter.matches(&t("sales", "tmp1")));
        assert!(filter.matches(&t("sales", "tmp12")));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let filter = TableFilter::new(&["a.b+c".to_string()], &[]).unwrap();
        assert!(filter.matches(&TableDescriptor::new(None, "a.b+c")));
        assert!(!filter.matches(&TableDescriptor::new(None, "axbbc")));
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = TableFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&t("any", "thing")));
    }
}
