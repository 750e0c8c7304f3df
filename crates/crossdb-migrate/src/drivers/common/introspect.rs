//! Assembly of catalog query results into descriptors.
//!
//! Engine readers run their own catalog queries, one row per column or key
//! column, ordered by table and ordinal. The helpers here turn those flat
//! rows into a [`DatabaseDescriptor`] and translate native column
//! definitions through the engine's translators.

use std::collections::HashMap;

use tracing::warn;

use crate::core::schema::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IdentityInfo, IndexDescriptor,
    OnDelete, PrimaryKeyDescriptor, TableDescriptor, UniqueDescriptor,
};
use crate::core::traits::{ExpressionTranslator, ReadSchemaOptions, SqlExecutor, TypeTranslator};
use crate::core::value::{Row, SqlValue};
use crate::core::DataTypeDescriptor;
use crate::error::{MigrateError, Result};

/// Text cell; NULL and missing cells are errors.
pub fn text(row: &Row, idx: usize) -> Result<String> {
    opt_text(row, idx)?.ok_or_else(|| {
        MigrateError::UnsupportedSchema(format!("catalog query returned NULL in column {}", idx))
    })
}

pub fn opt_text(row: &Row, idx: usize) -> Result<Option<String>> {
    match row.get(idx) {
        None => Err(MigrateError::UnsupportedSchema(format!(
            "catalog query returned too few columns (wanted index {})",
            idx
        ))),
        Some(SqlValue::Null) => Ok(None),
        Some(SqlValue::Text(s)) => Ok(Some(s.clone())),
        Some(other) => Ok(Some(other.to_plain_text())),
    }
}

pub fn opt_i64(row: &Row, idx: usize) -> Option<i64> {
    row.get(idx).and_then(SqlValue::as_i64)
}

pub fn flag(row: &Row, idx: usize) -> bool {
    row.get(idx).and_then(SqlValue::as_bool).unwrap_or(false)
}

/// Column definition as read from a catalog, before translation.
#[derive(Debug, Clone, Default)]
pub struct RawColumn {
    pub name: String,
    pub native_type: String,
    pub is_nullable: bool,
    pub collation: Option<String>,
    pub default_sql: Option<String>,
    pub identity: Option<IdentityInfo>,
    pub computed_sql: Option<String>,
    pub is_stored: bool,
}

/// Translate one raw column.
///
/// Unknown types fail unless `allow_unknown_types` is set. Unrecognized
/// defaults are reported and the column keeps no default.
pub async fn translate_column(
    table: &TableDescriptor,
    raw: RawColumn,
    types: &dyn TypeTranslator,
    expressions: &dyn ExpressionTranslator,
    conn: &mut dyn SqlExecutor,
    options: &ReadSchemaOptions,
) -> Result<ColumnDescriptor> {
    let location = table.column_location(&raw.name);

    let data_type = match types.to_canonical(&raw.native_type) {
        Ok(t) => t,
        Err(e) if options.allow_unknown_types => {
            warn!("{}; degrading to Unknown", e.at(location.clone()));
            DataTypeDescriptor::unknown()
        }
        Err(e) => return Err(e.at(location)),
    };

    let mut column = ColumnDescriptor::new(raw.name, data_type, raw.is_nullable);
    column.collation = raw.collation;

    if let Some(identity) = raw.identity {
        column = column.with_identity(identity);
    }
    if let Some(sql) = raw.computed_sql {
        return Ok(column.with_computed(sql, raw.is_stored));
    }

    if let (Some(default_sql), false) = (raw.default_sql, column.is_identity) {
        match expressions
            .to_canonical(&default_sql, &data_type, Some(conn))
            .await
        {
            Ok(Some(expr)) => column = column.with_default(expr),
            Ok(None) => {}
            Err(e @ MigrateError::UnsupportedExpression { .. }) => {
                warn!("{}; column is migrated without a default", e.at(location));
            }
            Err(e) => return Err(e.at(location)),
        }
    }

    Ok(column)
}

/// Builds a [`DatabaseDescriptor`] from flat catalog rows.
#[derive(Debug, Default)]
pub struct SchemaAssembler {
    database: DatabaseDescriptor,
    positions: HashMap<(String, String), usize>,
}

impl SchemaAssembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: DatabaseDescriptor::new(name),
            positions: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, schema: &str, name: &str, comment: Option<String>) {
        let mut table = TableDescriptor::new(Some(schema.to_string()), name);
        table.comment = comment.filter(|c| !c.is_empty());
        self.positions
            .insert((schema.to_string(), name.to_string()), self.database.tables.len());
        self.database.tables.push(table);
    }

    /// Table previously added; rows for unknown tables (filtered schemas,
    /// views) are ignored by callers.
    pub fn table_mut(&mut self, schema: &str, name: &str) -> Option<&mut TableDescriptor> {
        let pos = *self
            .positions
            .get(&(schema.to_string(), name.to_string()))?;
        self.database.tables.get_mut(pos)
    }

    pub fn push_primary_key_column(&mut self, schema: &str, table: &str, name: &str, column: String) {
        if let Some(t) = self.table_mut(schema, table) {
            t.primary_key
                .get_or_insert_with(|| PrimaryKeyDescriptor {
                    name: Some(name.to_string()),
                    columns: Vec::new(),
                })
                .columns
                .push(column);
        }
    }

    pub fn push_unique_column(&mut self, schema: &str, table: &str, name: &str, column: String) {
        if let Some(t) = self.table_mut(schema, table) {
            match t.uniques.iter_mut().find(|u| u.name.as_deref() == Some(name)) {
                Some(u) => u.columns.push(column),
                None => t.uniques.push(UniqueDescriptor {
                    name: Some(name.to_string()),
                    columns: vec![column],
                }),
            }
        }
    }

    pub fn push_index_column(
        &mut self,
        schema: &str,
        table: &str,
        name: &str,
        is_unique: bool,
        filter: Option<String>,
        column: String,
    ) {
        if let Some(t) = self.table_mut(schema, table) {
            match t.indexes.iter_mut().find(|i| i.name.as_deref() == Some(name)) {
                Some(i) => i.columns.push(column),
                None => t.indexes.push(IndexDescriptor {
                    name: Some(name.to_string()),
                    columns: vec![column],
                    is_unique,
                    filter,
                }),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push_foreign_key_column(
        &mut self,
        schema: &str,
        table: &str,
        name: &str,
        principal_schema: &str,
        principal_table: &str,
        column: String,
        principal_column: String,
        on_delete: OnDelete,
    ) {
        if let Some(t) = self.table_mut(schema, table) {
            match t.foreign_keys.iter_mut().find(|f| f.name.as_deref() == Some(name)) {
                Some(fk) => {
                    fk.columns.push(column);
                    fk.principal_columns.push(principal_column);
                }
                None => t.foreign_keys.push(ForeignKeyDescriptor {
                    name: Some(name.to_string()),
                    columns: vec![column],
                    principal_schema: Some(principal_schema.to_string()),
                    principal_table: principal_table.to_string(),
                    principal_columns: vec![principal_column],
                    on_delete,
                }),
            }
        }
    }

    pub fn database_mut(&mut self) -> &mut DatabaseDescriptor {
        &mut self.database
    }

    /// Validated descriptor.
    pub fn finish(self) -> Result<DatabaseDescriptor> {
        self.database.validate()?;
        Ok(self.database)
    }
}

/// Whether `schema` passes the reader's schema filter.
pub fn schema_selected(options: &ReadSchemaOptions, schema: &str) -> bool {
    options.schemas.is_empty() || options.schemas.iter().any(|s| s.eq_ignore_ascii_case(schema))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_groups_key_columns() {
        let mut a = SchemaAssembler::new("shop");
        a.add_table("dbo", "orders", Some(String::new()));
        a.push_primary_key_column("dbo", "orders", "pk_orders", "id".into());
        a.push_primary_key_column("dbo", "orders", "pk_orders", "line".into());
        a.push_index_column("dbo", "orders", "ix_a", false, None, "a".into());
        a.push_index_column("dbo", "orders", "ix_a", false, None, "b".into());
        a.push_foreign_key_column(
            "dbo", "orders", "fk_c", "dbo", "customers", "cid".into(), "id".into(), OnDelete::Cascade,
        );
        // Rows for tables outside the filter are ignored.
        a.push_unique_column("other", "x", "uq", "c".into());

        let db = a.finish().unwrap();
        let t = &db.tables[0];
        assert_eq!(t.comment, None);
        assert_eq!(t.primary_key.as_ref().unwrap().columns, vec!["id", "line"]);
        assert_eq!(t.indexes[0].columns, vec!["a", "b"]);
        assert_eq!(t.foreign_keys[0].principal_full_name(), "dbo.customers");
        assert_eq!(t.foreign_keys[0].on_delete, OnDelete::Cascade);
    }

    #[test]
    fn test_cell_helpers() {
        let row = vec![SqlValue::Text("a".into()), SqlValue::Null, SqlValue::I16(3)];
        assert_eq!(text(&row, 0).unwrap(), "a");
        assert!(text(&row, 1).is_err());
        assert_eq!(opt_text(&row, 2).unwrap().as_deref(), Some("3"));
        assert!(opt_text(&row, 9).is_err());
        assert_eq!(opt_i64(&row, 2), Some(3));
        assert!(flag(&row, 2));
    }

    #[tokio::test]
    async fn test_unknown_type_degrades_only_when_allowed() {
        use crate::core::types::DbType;
        use crate::drivers::postgres::{PostgresExpressions, PostgresTypes};
        use crate::testkit::MemoryEngine;

        let table = TableDescriptor::new(Some("public".into()), "docs");
        let raw = RawColumn {
            name: "body_tsv".into(),
            native_type: "tsvector".into(),
            is_nullable: true,
            ..Default::default()
        };
        let mut conn = MemoryEngine::new().executor();
        let expressions = PostgresExpressions::new();

        let mut options = ReadSchemaOptions::default();
        let err = translate_column(&table, raw.clone(), &PostgresTypes, &expressions, &mut conn, &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("tsvector"), "{}", err);
        assert!(err.to_string().contains("body_tsv"), "{}", err);

        options.allow_unknown_types = true;
        let column = translate_column(&table, raw, &PostgresTypes, &expressions, &mut conn, &options)
            .await
            .unwrap();
        assert_eq!(column.data_type.db_type, DbType::Unknown);
        assert!(column.is_nullable);
    }

    #[test]
    fn test_schema_filter() {
        let mut options = ReadSchemaOptions::default();
        assert!(schema_selected(&options, "anything"));
        options.schemas = vec!["DBO".into()];
        assert!(schema_selected(&options, "dbo"));
        assert!(!schema_selected(&options, "sales"));
    }
}
