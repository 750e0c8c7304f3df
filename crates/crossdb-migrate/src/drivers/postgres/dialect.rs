//! PostgreSQL SQL dialect.
//!
//! Identity columns are created `GENERATED BY DEFAULT AS IDENTITY`, so
//! explicit values are accepted without switching generation off. Pages
//! select columns of unknown type as `text`, since the binary wire format of
//! such types is not decodable.

use crate::core::identifier::quote_pg;
use crate::core::schema::{ColumnDescriptor, IndexDescriptor, SequenceDescriptor, TableDescriptor};
use crate::core::traits::{constraint_name, Dialect, InsertStrategy};
use crate::core::types::DbType;
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn default_separator(&self) -> &str {
        ";"
    }

    fn max_parameters(&self) -> usize {
        u16::MAX as usize
    }

    fn preferred_strategy(&self) -> InsertStrategy {
        InsertStrategy::BlockCopy
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn create_schema(&self, schema: &str) -> Result<String> {
        Ok(format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote_ident(schema)?))
    }

    fn column_definition(
        &self,
        column: &ColumnDescriptor,
        native_type: &str,
        nullable: bool,
    ) -> Result<String> {
        let mut def = format!("{} {}", self.quote_ident(&column.name)?, native_type);
        if let Some(expr) = &column.computed_sql {
            // PostgreSQL only has stored generated columns.
            def.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
            return Ok(def);
        }
        if let Some(collation) = &column.collation {
            def.push_str(&format!(" COLLATE {}", self.quote_ident(collation)?));
        }
        if let Some(identity) = &column.identity {
            def.push_str(&format!(
                " GENERATED BY DEFAULT AS IDENTITY (START WITH {} INCREMENT BY {}{})",
                identity.start_value,
                identity.increment_by,
                if identity.is_cyclic { " CYCLE" } else { "" }
            ));
        }
        if !nullable {
            def.push_str(" NOT NULL");
        }
        Ok(def)
    }

    fn comment_on_table(&self, table: &TableDescriptor, comment: &str) -> Result<Option<String>> {
        Ok(Some(format!(
            "COMMENT ON TABLE {} IS {}",
            self.qualified_table(table)?,
            self.string_literal(comment)
        )))
    }

    fn set_not_null(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        _native_type: &str,
    ) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            self.qualified_table(table)?,
            self.quote_ident(&column.name)?
        ))
    }

    fn set_default(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        default_sql: &str,
    ) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
            self.qualified_table(table)?,
            self.quote_ident(&column.name)?,
            default_sql
        ))
    }

    fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<String> {
        let name = index
            .name
            .clone()
            .unwrap_or_else(|| constraint_name("ix", &table.name, &index.columns));
        let mut sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            self.quote_ident(&name)?,
            self.qualified_table(table)?,
            self.quote_columns(&index.columns)?
        );
        if let Some(filter) = &index.filter {
            sql.push_str(&format!(" WHERE {}", filter));
        }
        Ok(sql)
    }

    fn create_sequence(&self, sequence: &SequenceDescriptor, native_type: &str) -> Result<String> {
        let mut sql = format!("CREATE SEQUENCE {}", self.qualify(sequence.schema.as_deref(), &sequence.name)?);
        if sequence.data_type.db_type.is_integer() {
            sql.push_str(&format!(" AS {}", native_type));
        }
        sql.push_str(&format!(
            " INCREMENT BY {} START WITH {}",
            sequence.increment_by,
            sequence.restart_value()
        ));
        if let Some(min) = sequence.min_value {
            sql.push_str(&format!(" MINVALUE {}", min));
        }
        if let Some(max) = sequence.max_value {
            sql.push_str(&format!(" MAXVALUE {}", max));
        }
        sql.push_str(if sequence.is_cyclic { " CYCLE" } else { " NO CYCLE" });
        Ok(sql)
    }

    fn disable_identity(&self, _table: &TableDescriptor) -> Result<Option<String>> {
        Ok(None)
    }

    fn enable_identity(&self, _table: &TableDescriptor) -> Result<Option<String>> {
        Ok(None)
    }

    fn reseed_identity(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        next_value: i64,
        _rows_written: bool,
    ) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} RESTART WITH {}",
            self.qualified_table(table)?,
            self.quote_ident(&column.name)?,
            next_value
        ))
    }

    fn select_page(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        order_by: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<String> {
        let select_list = columns
            .iter()
            .map(|name| {
                let quoted = self.quote_ident(name)?;
                let unknown = table
                    .columns
                    .iter()
                    .any(|c| &c.name == name && c.data_type.db_type == DbType::Unknown);
                Ok(if unknown {
                    format!("{}::text AS {}", quoted, quoted)
                } else {
                    quoted
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list,
            self.qualified_table(table)?
        );
        if !order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.quote_columns(order_by)?));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::IdentityInfo;
    use crate::core::types::DataTypeDescriptor;

    fn orders() -> TableDescriptor {
        let mut t = TableDescriptor::new(Some("sales".into()), "orders");
        t.columns.push(
            ColumnDescriptor::new("id", DataTypeDescriptor::big_int(), false)
                .with_identity(IdentityInfo::new(1, 1, Some(5))),
        );
        t.columns.push(ColumnDescriptor::new("note", DataTypeDescriptor::text(), true));
        t
    }

    #[test]
    fn test_quote_and_placeholder() {
        let d = PostgresDialect::new();
        assert_eq!(d.quote_ident("my\"col").unwrap(), "\"my\"\"col\"");
        assert_eq!(d.param_placeholder(3), "$3");
        assert!(d.quote_ident("").is_err());
    }

    #[test]
    fn test_identity_column_definition() {
        let d = PostgresDialect::new();
        let t = orders();
        let def = d.column_definition(&t.columns[0], "bigint", false).unwrap();
        assert_eq!(
            def,
            "\"id\" bigint GENERATED BY DEFAULT AS IDENTITY (START WITH 1 INCREMENT BY 1) NOT NULL"
        );
        assert_eq!(d.disable_identity(&t).unwrap(), None);
    }

    #[test]
    fn test_reseed_and_page() {
        let d = PostgresDialect::new();
        let t = orders();
        assert_eq!(
            d.reseed_identity(&t, &t.columns[0], 6, true).unwrap(),
            "ALTER TABLE \"sales\".\"orders\" ALTER COLUMN \"id\" RESTART WITH 6"
        );
        assert_eq!(
            d.select_page(&t, &["id".into(), "note".into()], &["id".into()], 10, 5).unwrap(),
            "SELECT \"id\", \"note\" FROM \"sales\".\"orders\" ORDER BY \"id\" LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_page_reads_unknown_types_as_text() {
        let d = PostgresDialect::new();
        let mut t = orders();
        t.columns.push(ColumnDescriptor::new("span", DataTypeDescriptor::unknown(), true));
        assert_eq!(
            d.select_page(&t, &["id".into(), "span".into()], &["id".into()], 0, 100).unwrap(),
            "SELECT \"id\", \"span\"::text AS \"span\" FROM \"sales\".\"orders\" ORDER BY \"id\" LIMIT 100 OFFSET 0"
        );
    }

    #[test]
    fn test_create_sequence_restarts_after_current() {
        let d = PostgresDialect::new();
        let seq = SequenceDescriptor {
            schema: None,
            name: "ticket".into(),
            data_type: DataTypeDescriptor::big_int(),
            start_value: 1,
            increment_by: 10,
            min_value: Some(1),
            max_value: None,
            current_value: Some(41),
            is_cyclic: false,
        };
        assert_eq!(
            d.create_sequence(&seq, "bigint").unwrap(),
            "CREATE SEQUENCE \"ticket\" AS bigint INCREMENT BY 10 START WITH 51 MINVALUE 1 NO CYCLE"
        );
    }
}
