//! SQL Server catalog introspection through the `sys.*` views.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::schema::{DatabaseDescriptor, IdentityInfo, OnDelete, SequenceDescriptor};
use crate::core::traits::{
    ExpressionTranslator, ReadSchemaOptions, SchemaReader, SqlExecutor, TypeTranslator,
};
use crate::core::types::DataTypeDescriptor;
use crate::core::value::Row;
use crate::drivers::common::introspect::{
    flag, opt_i64, opt_text, schema_selected, text, translate_column, RawColumn, SchemaAssembler,
};
use crate::error::Result;

const USER_TABLES: &str = "t.is_ms_shipped = 0 AND s.name NOT IN ('sys', 'INFORMATION_SCHEMA')";

const TABLES_SQL: &str = r#"
    SELECT s.name, t.name, CAST(ep.value AS nvarchar(max))
    FROM sys.tables t
    JOIN sys.schemas s ON s.schema_id = t.schema_id
    LEFT JOIN sys.extended_properties ep
         ON ep.class = 1 AND ep.major_id = t.object_id AND ep.minor_id = 0
        AND ep.name = N'MS_Description'
    WHERE t.is_ms_shipped = 0 AND s.name NOT IN ('sys', 'INFORMATION_SCHEMA')
    ORDER BY s.name, t.name
"#;

/// Native type text rebuilt from `sys.columns`; alias types resolve to
/// their base type. `max_length` counts bytes, so n-types are halved.
fn columns_sql() -> String {
    format!(
        r#"
        SELECT s.name, t.name, c.name,
               CASE
                 WHEN tn.name IN ('varchar', 'char', 'varbinary', 'binary')
                   THEN tn.name + '(' + CASE WHEN c.max_length = -1 THEN 'max'
                        ELSE CAST(c.max_length AS varchar(10)) END + ')'
                 WHEN tn.name IN ('nvarchar', 'nchar')
                   THEN tn.name + '(' + CASE WHEN c.max_length = -1 THEN 'max'
                        ELSE CAST(c.max_length / 2 AS varchar(10)) END + ')'
                 WHEN tn.name IN ('decimal', 'numeric')
                   THEN tn.name + '(' + CAST(c.precision AS varchar(10)) + ','
                        + CAST(c.scale AS varchar(10)) + ')'
                 WHEN tn.name IN ('time', 'datetime2', 'datetimeoffset')
                   THEN tn.name + '(' + CAST(c.scale AS varchar(10)) + ')'
                 ELSE tn.name
               END,
               c.is_nullable,
               CASE WHEN c.collation_name <> CAST(DATABASEPROPERTYEX(DB_NAME(), 'Collation') AS sysname)
                    THEN c.collation_name END,
               dc.definition,
               c.is_identity,
               CAST(ic.seed_value AS bigint), CAST(ic.increment_value AS bigint),
               CAST(ic.last_value AS bigint),
               cc.definition, cc.is_persisted
        FROM sys.columns c
        JOIN sys.tables t ON t.object_id = c.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        JOIN sys.types ty ON ty.user_type_id = c.user_type_id
        LEFT JOIN sys.types bt
             ON ty.is_user_defined = 1 AND ty.is_assembly_type = 0
            AND bt.user_type_id = ty.system_type_id
        CROSS APPLY (SELECT COALESCE(bt.name, ty.name) AS name) tn
        LEFT JOIN sys.default_constraints dc ON dc.object_id = c.default_object_id
        LEFT JOIN sys.identity_columns ic
             ON ic.object_id = c.object_id AND ic.column_id = c.column_id
        LEFT JOIN sys.computed_columns cc
             ON cc.object_id = c.object_id AND cc.column_id = c.column_id
        WHERE {}
        ORDER BY s.name, t.name, c.column_id
        "#,
        USER_TABLES
    )
}

fn keys_sql() -> String {
    format!(
        r#"
        SELECT s.name, t.name, kc.name, kc.type, c.name
        FROM sys.key_constraints kc
        JOIN sys.tables t ON t.object_id = kc.parent_object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        JOIN sys.index_columns ic
             ON ic.object_id = kc.parent_object_id AND ic.index_id = kc.unique_index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        WHERE kc.type IN ('PK', 'UQ') AND {}
        ORDER BY s.name, t.name, kc.name, ic.key_ordinal
        "#,
        USER_TABLES
    )
}

fn indexes_sql() -> String {
    format!(
        r#"
        SELECT s.name, t.name, i.name, i.is_unique, i.filter_definition, c.name
        FROM sys.indexes i
        JOIN sys.tables t ON t.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        WHERE i.type IN (1, 2) AND i.is_primary_key = 0 AND i.is_unique_constraint = 0
          AND i.is_hypothetical = 0 AND ic.is_included_column = 0 AND {}
        ORDER BY s.name, t.name, i.name, ic.key_ordinal
        "#,
        USER_TABLES
    )
}

fn foreign_keys_sql() -> String {
    format!(
        r#"
        SELECT s.name, t.name, fk.name, ps.name, pt.name, c.name, pc.name,
               fk.delete_referential_action_desc
        FROM sys.foreign_keys fk
        JOIN sys.tables t ON t.object_id = fk.parent_object_id
        JOIN sys.schemas s ON s.schema_id = t.schema_id
        JOIN sys.tables pt ON pt.object_id = fk.referenced_object_id
        JOIN sys.schemas ps ON ps.schema_id = pt.schema_id
        JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
        JOIN sys.columns c
             ON c.object_id = fkc.parent_object_id AND c.column_id = fkc.parent_column_id
        JOIN sys.columns pc
             ON pc.object_id = fkc.referenced_object_id AND pc.column_id = fkc.referenced_column_id
        WHERE {}
        ORDER BY s.name, t.name, fk.name, fkc.constraint_column_id
        "#,
        USER_TABLES
    )
}

const SEQUENCES_SQL: &str = r#"
    SELECT s.name, q.name,
           CASE WHEN TYPE_NAME(q.system_type_id) IN ('decimal', 'numeric')
                THEN TYPE_NAME(q.system_type_id) + '(' + CAST(q.precision AS varchar(10)) + ',0)'
                ELSE TYPE_NAME(q.system_type_id) END,
           CAST(q.start_value AS bigint), CAST(q.increment AS bigint),
           CAST(q.minimum_value AS bigint), CAST(q.maximum_value AS bigint),
           CAST(q.last_used_value AS bigint), q.is_cycling
    FROM sys.sequences q
    JOIN sys.schemas s ON s.schema_id = q.schema_id
    WHERE s.name NOT IN ('sys', 'INFORMATION_SCHEMA')
    ORDER BY s.name, q.name
"#;

/// SQL Server [`SchemaReader`].
pub struct MssqlSchemaReader {
    types: Arc<dyn TypeTranslator>,
    expressions: Arc<dyn ExpressionTranslator>,
}

impl MssqlSchemaReader {
    pub fn new(types: Arc<dyn TypeTranslator>, expressions: Arc<dyn ExpressionTranslator>) -> Self {
        Self { types, expressions }
    }

    fn raw_column(row: &Row) -> Result<RawColumn> {
        let identity = if flag(row, 7) {
            Some(IdentityInfo::new(
                opt_i64(row, 8).unwrap_or(1),
                opt_i64(row, 9).filter(|i| *i != 0).unwrap_or(1),
                opt_i64(row, 10),
            ))
        } else {
            None
        };
        let computed_sql = opt_text(row, 11)?;
        Ok(RawColumn {
            name: text(row, 2)?,
            native_type: text(row, 3)?,
            is_nullable: flag(row, 4),
            collation: opt_text(row, 5)?,
            default_sql: opt_text(row, 6)?,
            identity,
            is_stored: computed_sql.is_some() && flag(row, 12),
            computed_sql,
        })
    }
}

#[async_trait]
impl SchemaReader for MssqlSchemaReader {
    async fn read_database(
        &self,
        conn: &mut dyn SqlExecutor,
        options: &ReadSchemaOptions,
    ) -> Result<DatabaseDescriptor> {
        let name = conn
            .query_scalar("SELECT DB_NAME()", &[])
            .await?
            .map(|v| v.to_plain_text())
            .unwrap_or_default();
        let mut assembler = SchemaAssembler::new(&name);

        let tables = conn.query(TABLES_SQL, &[]).await?;
        for row in &tables.rows {
            let schema = text(row, 0)?;
            if schema_selected(options, &schema) {
                assembler.add_table(&schema, &text(row, 1)?, opt_text(row, 2)?);
            }
        }

        let columns = conn.query(&columns_sql(), &[]).await?;
        for row in &columns.rows {
            let (schema, table) = (text(row, 0)?, text(row, 1)?);
            let Some(descriptor) = assembler.table_mut(&schema, &table) else {
                continue;
            };
            let snapshot = descriptor.clone();
            let column = translate_column(
                &snapshot,
                Self::raw_column(row)?,
                self.types.as_ref(),
                self.expressions.as_ref(),
                conn,
                options,
            )
            .await?;
            if let Some(t) = assembler.table_mut(&schema, &table) {
                t.columns.push(column);
            }
        }

        let keys = conn.query(&keys_sql(), &[]).await?;
        for row in &keys.rows {
            let (schema, table, constraint) = (text(row, 0)?, text(row, 1)?, text(row, 2)?);
            let column = text(row, 4)?;
            if text(row, 3)?.trim() == "PK" {
                assembler.push_primary_key_column(&schema, &table, &constraint, column);
            } else {
                assembler.push_unique_column(&schema, &table, &constraint, column);
            }
        }

        let indexes = conn.query(&indexes_sql(), &[]).await?;
        for row in &indexes.rows {
            assembler.push_index_column(
                &text(row, 0)?,
                &text(row, 1)?,
                &text(row, 2)?,
                flag(row, 3),
                opt_text(row, 4)?,
                text(row, 5)?,
            );
        }

        let fks = conn.query(&foreign_keys_sql(), &[]).await?;
        for row in &fks.rows {
            assembler.push_foreign_key_column(
                &text(row, 0)?,
                &text(row, 1)?,
                &text(row, 2)?,
                &text(row, 3)?,
                &text(row, 4)?,
                text(row, 5)?,
                text(row, 6)?,
                OnDelete::parse(&text(row, 7)?),
            );
        }

        let sequences = conn.query(SEQUENCES_SQL, &[]).await?;
        for row in &sequences.rows {
            let schema = text(row, 0)?;
            if !schema_selected(options, &schema) {
                continue;
            }
            let sequence = SequenceDescriptor {
                schema: Some(schema),
                name: text(row, 1)?,
                data_type: self
                    .types
                    .to_canonical(&text(row, 2)?)
                    .unwrap_or_else(|_| DataTypeDescriptor::big_int()),
                start_value: opt_i64(row, 3).unwrap_or(1),
                increment_by: opt_i64(row, 4).filter(|i| *i != 0).unwrap_or(1),
                min_value: opt_i64(row, 5),
                max_value: opt_i64(row, 6),
                current_value: opt_i64(row, 7),
                is_cyclic: flag(row, 8),
            };
            debug!("Read sequence {}", sequence.full_name());
            assembler.database_mut().sequences.push(sequence);
        }

        let database = assembler.finish()?;
        info!(
            "Read SQL Server schema {}: {} tables, {} sequences",
            database.name,
            database.tables.len(),
            database.sequences.len()
        );
        Ok(database)
    }
}
