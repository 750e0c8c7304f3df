//! Schema descriptors: tables, columns, keys, indexes, foreign keys, sequences.
//!
//! Descriptors are produced once per run by a source schema reader and are
//! only changed afterwards by the explicit normalization passes on
//! [`DatabaseDescriptor`]. They hold no connection handles.

use serde::Serialize;
use std::collections::HashSet;

use super::expression::SqlExpressionDescriptor;
use super::types::DataTypeDescriptor;
use crate::error::{MigrateError, Result};

/// Referential action on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl OnDelete {
    /// SQL keyword phrase, shared by every supported engine.
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse the rule text reported by information-schema views.
    pub fn parse(rule: &str) -> Self {
        match rule.trim().to_ascii_uppercase().replace('_', " ").as_str() {
            "CASCADE" => OnDelete::Cascade,
            "SET NULL" => OnDelete::SetNull,
            "SET DEFAULT" => OnDelete::SetDefault,
            "RESTRICT" => OnDelete::Restrict,
            _ => OnDelete::NoAction,
        }
    }
}

/// Identity generator state of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdentityInfo {
    pub start_value: i64,
    /// Never zero.
    pub increment_by: i64,
    /// Last generated value on the source, if any row was ever generated.
    pub current_value: Option<i64>,
    pub is_cyclic: bool,
}

impl IdentityInfo {
    /// Build identity info; an increment of zero is normalized to 1.
    pub fn new(start_value: i64, increment_by: i64, current_value: Option<i64>) -> Self {
        Self {
            start_value,
            increment_by: if increment_by == 0 { 1 } else { increment_by },
            current_value,
            is_cyclic: false,
        }
    }

    /// Value the generator must produce next: `current + increment`, or the
    /// start value when nothing was generated yet.
    pub fn next_value(&self) -> i64 {
        match self.current_value {
            Some(current) => current.saturating_add(self.increment_by),
            None => self.start_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: DataTypeDescriptor,
    pub is_nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<SqlExpressionDescriptor>,
    pub is_identity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityInfo>,
    /// Engine-native computed column expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_sql: Option<String>,
    pub is_stored: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: DataTypeDescriptor, is_nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_nullable,
            collation: None,
            default_value: None,
            is_identity: false,
            identity: None,
            computed_sql: None,
            is_stored: false,
        }
    }

    /// Mark the column as identity-generated. Identity columns are never nullable.
    pub fn with_identity(mut self, info: IdentityInfo) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self.identity = Some(IdentityInfo {
            is_cyclic: info.is_cyclic,
            ..IdentityInfo::new(info.start_value, info.increment_by, info.current_value)
        });
        self
    }

    pub fn with_default(mut self, default: SqlExpressionDescriptor) -> Self {
        self.default_value = Some(default);
        self
    }

    pub fn with_computed(mut self, sql: impl Into<String>, stored: bool) -> Self {
        self.computed_sql = Some(sql.into());
        self.is_stored = stored;
        self
    }

    pub fn is_computed(&self) -> bool {
        self.computed_sql.is_some()
    }
}

/// Primary key; column order is the key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryKeyDescriptor {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueDescriptor {
    pub name: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub is_unique: bool,
    /// Engine-native partial index predicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDescriptor {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub principal_schema: Option<String>,
    pub principal_table: String,
    /// Positionally paired with `columns`.
    pub principal_columns: Vec<String>,
    pub on_delete: OnDelete,
}

impl ForeignKeyDescriptor {
    pub fn principal_full_name(&self) -> String {
        full_name(self.principal_schema.as_deref(), &self.principal_table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDescriptor {
    pub schema: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<PrimaryKeyDescriptor>,
    pub uniques: Vec<UniqueDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    pub fn new(schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            comment: None,
            columns: Vec::new(),
            primary_key: None,
            uniques: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// `schema.name`, or `name` without a schema.
    pub fn full_name(&self) -> String {
        full_name(self.schema.as_deref(), &self.name)
    }

    /// `schema.table.column` used in diagnostics.
    pub fn column_location(&self, column: &str) -> String {
        format!("{}.{}", self.full_name(), column)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_identity(&self) -> bool {
        self.columns.iter().any(|c| c.is_identity)
    }

    pub fn identity_column(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_identity)
    }

    pub fn has_computed(&self) -> bool {
        self.columns.iter().any(ColumnDescriptor::is_computed)
    }

    pub fn is_primary_key_column(&self, column: &str) -> bool {
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.iter().any(|c| c == column))
            .unwrap_or(false)
    }

    /// Columns that carry data (computed columns are derived on the target).
    pub fn data_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_computed()).collect()
    }

    /// Deterministic pagination order: primary key columns, or every
    /// non-huge data column when the table has no primary key.
    pub fn ordering_columns(&self) -> Vec<String> {
        match &self.primary_key {
            Some(pk) if !pk.columns.is_empty() => pk.columns.clone(),
            _ => self
                .data_columns()
                .into_iter()
                .filter(|c| !c.data_type.db_type.is_huge())
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    /// Full names of other tables this table references.
    pub fn dependencies(&self) -> Vec<String> {
        let own = self.full_name();
        let mut seen = HashSet::new();
        self.foreign_keys
            .iter()
            .map(ForeignKeyDescriptor::principal_full_name)
            .filter(|p| *p != own && seen.insert(p.clone()))
            .collect()
    }

    /// Check structural invariants: unique column names and foreign key arity.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for col in &self.columns {
            if !names.insert(col.name.as_str()) {
                return Err(MigrateError::UnsupportedSchema(format!(
                    "duplicate column {}",
                    self.column_location(&col.name)
                )));
            }
            if col.identity.is_some() && !col.is_identity {
                return Err(MigrateError::UnsupportedSchema(format!(
                    "identity info on non-identity column {}",
                    self.column_location(&col.name)
                )));
            }
        }
        for fk in &self.foreign_keys {
            if fk.columns.len() != fk.principal_columns.len() || fk.columns.is_empty() {
                return Err(MigrateError::UnsupportedSchema(format!(
                    "foreign key {} on {} has {} columns but {} principal columns",
                    fk.name.as_deref().unwrap_or("<unnamed>"),
                    self.full_name(),
                    fk.columns.len(),
                    fk.principal_columns.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceDescriptor {
    pub schema: Option<String>,
    pub name: String,
    pub data_type: DataTypeDescriptor,
    pub start_value: i64,
    pub increment_by: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<i64>,
    pub is_cyclic: bool,
}

impl SequenceDescriptor {
    pub fn full_name(&self) -> String {
        full_name(self.schema.as_deref(), &self.name)
    }

    /// First value the recreated sequence must hand out.
    pub fn restart_value(&self) -> i64 {
        match self.current_value {
            Some(current) => current.saturating_add(self.increment_by),
            None => self.start_value,
        }
    }
}

/// Root aggregate of one migration run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub tables: Vec<TableDescriptor>,
    pub sequences: Vec<SequenceDescriptor>,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn table(&self, full_name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.full_name() == full_name)
    }

    /// Distinct schema names in first-seen order.
    pub fn schemas(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tables
            .iter()
            .filter_map(|t| t.schema.clone())
            .chain(self.sequences.iter().filter_map(|s| s.schema.clone()))
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.tables.iter().try_for_each(TableDescriptor::validate)
    }

    /// Normalization pass for targets without schema support.
    pub fn clear_schema_names(&mut self) {
        self.set_schema(None);
    }

    /// Normalization pass mapping every object into one target schema.
    pub fn remap_schema(&mut self, schema: &str) {
        self.set_schema(Some(schema.to_string()));
    }

    fn set_schema(&mut self, schema: Option<String>) {
        for table in &mut self.tables {
            table.schema = schema.clone();
            for fk in &mut table.foreign_keys {
                fk.principal_schema = schema.clone();
            }
            for col in &mut table.columns {
                if let Some(SqlExpressionDescriptor::Function(
                    super::expression::SqlFunction::NextValue { schema: s, .. },
                )) = &mut col.default_value
                {
                    *s = schema.clone();
                }
            }
        }
        for seq in &mut self.sequences {
            seq.schema = schema.clone();
        }
    }

    /// Normalization pass for a target on a different engine: engine-native
    /// SQL cannot be carried over. Computed columns become plain data
    /// columns, filtered indexes are dropped and collations are cleared.
    /// Returns one note per changed object.
    pub fn strip_engine_specific(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        for table in &mut self.tables {
            let owner = table.full_name();
            for col in &mut table.columns {
                if col.computed_sql.take().is_some() {
                    col.is_stored = false;
                    notes.push(format!(
                        "computed column {}.{} migrated as a plain column",
                        owner, col.name
                    ));
                }
                col.collation = None;
            }
            table.indexes.retain(|ix| {
                let keep = ix.filter.is_none();
                if !keep {
                    notes.push(format!(
                        "filtered index {} on {} skipped",
                        ix.name.as_deref().unwrap_or("<unnamed>"),
                        owner
                    ));
                }
                keep
            });
        }
        notes
    }

    /// Keep only the tables matching `keep`; foreign keys pointing at removed
    /// tables are dropped and returned as `(table, principal)` pairs.
    pub fn retain_tables<F>(&mut self, mut keep: F) -> Vec<(String, String)>
    where
        F: FnMut(&TableDescriptor) -> bool,
    {
        self.tables.retain(|t| keep(t));
        let remaining: HashSet<String> = self.tables.iter().map(|t| t.full_name()).collect();
        let mut dropped = Vec::new();
        for table in &mut self.tables {
            let owner = table.full_name();
            table.foreign_keys.retain(|fk| {
                let principal = fk.principal_full_name();
                let ok = remaining.contains(&principal);
                if !ok {
                    dropped.push((owner.clone(), principal));
                }
                ok
            });
        }
        dropped
    }
}

/// `schema.name`, or `name` when there is no schema.
pub fn full_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) if !s.is_empty() => format!("{}.{}", s, name),
        _ => name.to_string(),
    }
}
