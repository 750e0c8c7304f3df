//! SQL Server SQL dialect.

use crate::core::identifier::quote_mssql;
use crate::core::schema::{ColumnDescriptor, IndexDescriptor, SequenceDescriptor, TableDescriptor};
use crate::core::traits::{constraint_name, Dialect, InsertStrategy};
use crate::error::Result;

/// Rows per `INSERT ... VALUES` (a server limit).
const MAX_ROWS_PER_INSERT: usize = 1000;

/// Parameters per request; the server limit is 2100, leave room for the driver.
const MAX_PARAMETERS: usize = 2000;

#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    pub fn new() -> Self {
        Self
    }

    /// `N'...'` literal for catalog procedure arguments.
    fn unicode_literal(&self, s: &str) -> String {
        format!("N{}", self.string_literal(s))
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn default_separator(&self) -> &str {
        "GO"
    }

    fn max_parameters(&self) -> usize {
        MAX_PARAMETERS
    }

    fn max_rows_per_insert(&self) -> usize {
        MAX_ROWS_PER_INSERT
    }

    fn preferred_strategy(&self) -> InsertStrategy {
        InsertStrategy::BatchRow
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn create_schema(&self, schema: &str) -> Result<String> {
        // CREATE SCHEMA must be the only statement in its batch.
        let create = format!("CREATE SCHEMA {}", self.quote_ident(schema)?);
        Ok(format!(
            "IF SCHEMA_ID({}) IS NULL EXEC({})",
            self.unicode_literal(schema),
            self.unicode_literal(&create)
        ))
    }

    fn column_definition(
        &self,
        column: &ColumnDescriptor,
        native_type: &str,
        nullable: bool,
    ) -> Result<String> {
        let name = self.quote_ident(&column.name)?;
        if let Some(expr) = &column.computed_sql {
            return Ok(format!(
                "{} AS ({}){}",
                name,
                expr,
                if column.is_stored { " PERSISTED" } else { "" }
            ));
        }
        let mut def = format!("{} {}", name, native_type);
        if let Some(collation) = &column.collation {
            def.push_str(&format!(" COLLATE {}", collation));
        }
        if let Some(identity) = &column.identity {
            def.push_str(&format!(
                " IDENTITY({}, {})",
                identity.start_value, identity.increment_by
            ));
        }
        def.push_str(if nullable { " NULL" } else { " NOT NULL" });
        Ok(def)
    }

    fn comment_on_table(&self, table: &TableDescriptor, comment: &str) -> Result<Option<String>> {
        let schema = table.schema.as_deref().unwrap_or("dbo");
        Ok(Some(format!(
            "EXEC sys.sp_addextendedproperty @name = N'MS_Description', @value = {}, \
             @level0type = N'SCHEMA', @level0name = {}, @level1type = N'TABLE', @level1name = {}",
            self.unicode_literal(comment),
            self.unicode_literal(schema),
            self.unicode_literal(&table.name)
        )))
    }

    fn set_not_null(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        native_type: &str,
    ) -> Result<String> {
        let mut sql = format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.qualified_table(table)?,
            self.quote_ident(&column.name)?,
            native_type
        );
        if let Some(collation) = &column.collation {
            sql.push_str(&format!(" COLLATE {}", collation));
        }
        sql.push_str(" NOT NULL");
        Ok(sql)
    }

    fn set_default(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        default_sql: &str,
    ) -> Result<String> {
        let name = constraint_name("df", &table.name, std::slice::from_ref(&column.name));
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {}",
            self.qualified_table(table)?,
            self.quote_ident(&name)?,
            default_sql,
            self.quote_ident(&column.name)?
        ))
    }

    fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<String> {
        let name = index
            .name
            .clone()
            .unwrap_or_else(|| constraint_name("ix", &table.name, &index.columns));
        let mut sql = format!(
            "CREATE {}NONCLUSTERED INDEX {} ON {} ({})",
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
        let mut sql = format!(
            "CREATE SEQUENCE {} AS {} START WITH {} INCREMENT BY {}",
            self.qualify(sequence.schema.as_deref(), &sequence.name)?,
            native_type,
            sequence.restart_value(),
            sequence.increment_by
        );
        if let Some(min) = sequence.min_value {
            sql.push_str(&format!(" MINVALUE {}", min));
        }
        if let Some(max) = sequence.max_value {
            sql.push_str(&format!(" MAXVALUE {}", max));
        }
        sql.push_str(if sequence.is_cyclic { " CYCLE" } else { " NO CYCLE" });
        Ok(sql)
    }

    fn disable_identity(&self, table: &TableDescriptor) -> Result<Option<String>> {
        Ok(Some(format!(
            "SET IDENTITY_INSERT {} ON",
            self.qualified_table(table)?
        )))
    }

    fn enable_identity(&self, table: &TableDescriptor) -> Result<Option<String>> {
        Ok(Some(format!(
            "SET IDENTITY_INSERT {} OFF",
            self.qualified_table(table)?
        )))
    }

    fn reseed_identity(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        next_value: i64,
        rows_written: bool,
    ) -> Result<String> {
        // After rows exist the next value is current + increment; on an empty
        // table the reseed value itself is handed out.
        let increment = column.identity.map(|i| i.increment_by).unwrap_or(1);
        let seed = if rows_written {
            next_value.saturating_sub(increment)
        } else {
            next_value
        };
        Ok(format!(
            "DBCC CHECKIDENT ({}, RESEED, {})",
            self.unicode_literal(&self.qualified_table(table)?),
            seed
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
        let order = if order_by.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            self.quote_columns(order_by)?
        };
        Ok(format!(
            "SELECT {} FROM {} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            self.quote_columns(columns)?,
            self.qualified_table(table)?,
            order,
            offset,
            limit
        ))
    }
}
