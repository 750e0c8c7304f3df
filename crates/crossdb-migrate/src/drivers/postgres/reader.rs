//! PostgreSQL catalog introspection.
//!
//! Reads `pg_catalog` directly rather than `information_schema` so identity
//! state, generated columns and partial index predicates are available.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::schema::{IdentityInfo, OnDelete, SequenceDescriptor};
use crate::core::traits::{
    ExpressionTranslator, ReadSchemaOptions, SchemaReader, SqlExecutor, TypeTranslator,
};
use crate::core::types::DataTypeDescriptor;
use crate::core::value::Row;
use crate::drivers::common::introspect::{
    flag, opt_i64, opt_text, schema_selected, text, translate_column, RawColumn, SchemaAssembler,
};
use crate::error::Result;

const USER_SCHEMAS: &str = "n.nspname NOT IN ('pg_catalog', 'information_schema') \
     AND n.nspname NOT LIKE 'pg\\_toast%' AND n.nspname NOT LIKE 'pg\\_temp%'";

fn tables_sql() -> String {
    format!(
        r#"
        SELECT n.nspname, c.relname, obj_description(c.oid, 'pg_class')
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'p') AND NOT c.relispartition AND {}
        ORDER BY n.nspname, c.relname
        "#,
        USER_SCHEMAS
    )
}

fn columns_sql() -> String {
    format!(
        r#"
        SELECT n.nspname, c.relname, a.attname,
               format_type(a.atttypid, a.atttypmod),
               NOT a.attnotnull,
               CASE WHEN a.attcollation <> 0 AND a.attcollation <> t.typcollation
                    THEN co.collname::text END,
               pg_get_expr(d.adbin, d.adrelid),
               a.attidentity::text,
               a.attgenerated::text,
               s.seqstart, s.seqincrement, s.seqcycle,
               CASE WHEN s.seqrelid IS NOT NULL THEN pg_sequence_last_value(s.seqrelid) END
        FROM pg_attribute a
        JOIN pg_class c ON c.oid = a.attrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_type t ON t.oid = a.atttypid
        LEFT JOIN pg_collation co ON co.oid = a.attcollation
        LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
        LEFT JOIN pg_depend dep ON dep.refobjid = c.oid AND dep.refobjsubid = a.attnum
             AND dep.deptype = 'i' AND dep.classid = 'pg_class'::regclass
        LEFT JOIN pg_sequence s ON s.seqrelid = dep.objid
        WHERE c.relkind IN ('r', 'p') AND NOT c.relispartition
          AND a.attnum > 0 AND NOT a.attisdropped AND {}
        ORDER BY n.nspname, c.relname, a.attnum
        "#,
        USER_SCHEMAS
    )
}

fn keys_sql() -> String {
    format!(
        r#"
        SELECT n.nspname, c.relname, con.conname, con.contype::text, a.attname
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
        WHERE con.contype IN ('p', 'u') AND {}
        ORDER BY n.nspname, c.relname, con.conname, k.ord
        "#,
        USER_SCHEMAS
    )
}

fn indexes_sql() -> String {
    format!(
        r#"
        SELECT n.nspname, t.relname, i.relname, ix.indisunique,
               pg_get_expr(ix.indpred, ix.indrelid), a.attname
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
        WHERE t.relkind IN ('r', 'p') AND ix.indexprs IS NULL
          AND k.ord <= ix.indnkeyatts
          AND NOT EXISTS (
              SELECT 1 FROM pg_constraint con
              WHERE con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x'))
          AND {}
        ORDER BY n.nspname, t.relname, i.relname, k.ord
        "#,
        USER_SCHEMAS
    )
}

fn foreign_keys_sql() -> String {
    format!(
        r#"
        SELECT n.nspname, c.relname, con.conname, pn.nspname, pc.relname,
               a.attname, pa.attname, con.confdeltype::text
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_class pc ON pc.oid = con.confrelid
        JOIN pg_namespace pn ON pn.oid = pc.relnamespace
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, fattnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute pa ON pa.attrelid = con.confrelid AND pa.attnum = k.fattnum
        WHERE con.contype = 'f' AND {}
        ORDER BY n.nspname, c.relname, con.conname, k.ord
        "#,
        USER_SCHEMAS
    )
}

const SEQUENCES_SQL: &str = r#"
    SELECT s.schemaname::text, s.sequencename::text, format_type(s.data_type, NULL),
           s.start_value, s.increment_by, s.min_value, s.max_value, s.last_value, s.cycle
    FROM pg_sequences s
    WHERE s.schemaname NOT IN ('pg_catalog', 'information_schema')
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d
          JOIN pg_class c ON c.oid = d.objid
          JOIN pg_namespace n ON n.oid = c.relnamespace
          WHERE n.nspname = s.schemaname AND c.relname = s.sequencename
            AND d.deptype = 'i')
    ORDER BY 1, 2
"#;

fn on_delete(code: &str) -> OnDelete {
    match code {
        "c" => OnDelete::Cascade,
        "n" => OnDelete::SetNull,
        "d" => OnDelete::SetDefault,
        "r" => OnDelete::Restrict,
        _ => OnDelete::NoAction,
    }
}

/// PostgreSQL [`SchemaReader`].
pub struct PostgresSchemaReader {
    types: Arc<dyn TypeTranslator>,
    expressions: Arc<dyn ExpressionTranslator>,
}

impl PostgresSchemaReader {
    pub fn new(types: Arc<dyn TypeTranslator>, expressions: Arc<dyn ExpressionTranslator>) -> Self {
        Self { types, expressions }
    }

    fn raw_column(row: &Row) -> Result<RawColumn> {
        let default_sql = opt_text(row, 6)?;
        let identity = match opt_text(row, 7)?.as_deref() {
            Some("a") | Some("d") => {
                let mut info =
                    IdentityInfo::new(opt_i64(row, 9).unwrap_or(1), opt_i64(row, 10).unwrap_or(1), opt_i64(row, 12));
                info.is_cyclic = flag(row, 11);
                Some(info)
            }
            _ => None,
        };
        let generated = opt_text(row, 8)?.as_deref() == Some("s");
        let (default_sql, computed_sql) = if generated {
            (None, default_sql)
        } else {
            (default_sql, None)
        };
        Ok(RawColumn {
            name: text(row, 2)?,
            native_type: text(row, 3)?,
            is_nullable: flag(row, 4),
            collation: opt_text(row, 5)?,
            default_sql,
            identity,
            computed_sql,
            is_stored: generated,
        })
    }
}

#[async_trait]
impl SchemaReader for PostgresSchemaReader {
    async fn read_database(
        &self,
        conn: &mut dyn SqlExecutor,
        options: &ReadSchemaOptions,
    ) -> Result<crate::core::schema::DatabaseDescriptor> {
        let name = conn
            .query_scalar("SELECT current_database()::text", &[])
            .await?
            .map(|v| v.to_plain_text())
            .unwrap_or_default();
        let mut assembler = SchemaAssembler::new(&name);

        let tables = conn.query(&tables_sql(), &[]).await?;
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
            if text(row, 3)? == "p" {
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
                on_delete(&text(row, 7)?),
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
            "Read PostgreSQL schema {}: {} tables, {} sequences",
            database.name,
            database.tables.len(),
            database.sequences.len()
        );
        Ok(database)
    }
}
