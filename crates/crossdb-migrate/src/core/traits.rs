//! Collaborator interfaces implemented once per database engine.
//!
//! - [`TypeTranslator`]: native type syntax to and from [`DataTypeDescriptor`]
//! - [`ExpressionTranslator`]: default-value SQL to and from [`SqlExpressionDescriptor`]
//! - [`ValueRepr`]: runtime values rendered as literal SQL
//! - [`SchemaReader`]: native introspection into a [`DatabaseDescriptor`]
//! - [`SqlExecutor`]: one connection (or a script sink) executing SQL
//! - [`ConnectionProvider`] / [`DatabaseLifecycle`]: opening connections, creating databases
//! - [`Dialect`]: SQL text generation for DDL and DML
//!
//! The migration engine only talks to these traits; concrete engines live in
//! `drivers/`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

use super::expression::SqlExpressionDescriptor;
use super::identifier::escape_string_literal;
use super::schema::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IndexDescriptor,
    PrimaryKeyDescriptor, SequenceDescriptor, TableDescriptor, UniqueDescriptor,
};
use super::types::DataTypeDescriptor;
use super::value::{QueryResult, Row, SqlValue};

/// How the data migrator writes rows to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertStrategy {
    /// The target engine's preferred strategy.
    #[default]
    Default,
    /// One parameterized INSERT per row.
    SingleRow,
    /// Multi-row INSERT ... VALUES with positional parameters.
    BatchRow,
    /// Engine-native bulk load, falling back to `BatchRow` where unsupported.
    BlockCopy,
}

impl FromStr for InsertStrategy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "default" => Ok(InsertStrategy::Default),
            "single_row" => Ok(InsertStrategy::SingleRow),
            "batch_row" => Ok(InsertStrategy::BatchRow),
            "block_copy" => Ok(InsertStrategy::BlockCopy),
            other => Err(MigrateError::Config(format!(
                "Invalid insert strategy '{}'. Valid values: default, single_row, batch_row, block_copy",
                other
            ))),
        }
    }
}

impl fmt::Display for InsertStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InsertStrategy::Default => "default",
            InsertStrategy::SingleRow => "single_row",
            InsertStrategy::BatchRow => "batch_row",
            InsertStrategy::BlockCopy => "block_copy",
        };
        f.write_str(name)
    }
}

/// Bidirectional mapping between native type syntax and canonical types.
///
/// Both directions are pure. `to_canonical` back-fills engine defaults for
/// omitted arguments (e.g. `decimal` without precision).
pub trait TypeTranslator: Send + Sync {
    /// Fails with `UnsupportedType` for unrecognized syntax.
    fn to_canonical(&self, native: &str) -> Result<DataTypeDescriptor>;

    fn to_native(&self, ty: &DataTypeDescriptor) -> Result<String>;
}

/// Bidirectional mapping between default-value SQL and canonical expressions.
#[async_trait]
pub trait ExpressionTranslator: Send + Sync {
    /// Translate native default text for a column of `store_type`.
    ///
    /// Returns `Ok(None)` for an explicit `NULL` default. Constants that are
    /// not simple literals are evaluated on `conn` when one is given; results
    /// are cached by expression text.
    async fn to_canonical(
        &self,
        native: &str,
        store_type: &DataTypeDescriptor,
        conn: Option<&mut dyn SqlExecutor>,
    ) -> Result<Option<SqlExpressionDescriptor>>;

    fn from_canonical(
        &self,
        expr: &SqlExpressionDescriptor,
        store_type: &DataTypeDescriptor,
    ) -> Result<String>;
}

/// Renders runtime values as dialect-correct, injection-safe literals.
pub trait ValueRepr: Send + Sync {
    fn render(&self, value: &SqlValue, store_type: &DataTypeDescriptor) -> Result<String>;
}

/// Options for schema introspection.
#[derive(Debug, Clone, Default)]
pub struct ReadSchemaOptions {
    /// Schemas to read; empty reads every user schema.
    pub schemas: Vec<String>,
    /// Degrade unrecognized column types to `DbType::Unknown` instead of failing.
    pub allow_unknown_types: bool,
}

/// Native schema introspection.
#[async_trait]
pub trait SchemaReader: Send + Sync {
    async fn read_database(
        &self,
        conn: &mut dyn SqlExecutor,
        options: &ReadSchemaOptions,
    ) -> Result<DatabaseDescriptor>;
}

/// Executes SQL on a single connection.
///
/// Connections are not shared between concurrent callers; every scheduler
/// worker opens its own.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Execute a statement with positional parameters, returning rows affected.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute a query and materialize all rows.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// First column of the first row.
    async fn query_scalar(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlValue>> {
        let result = self.query(sql, params).await?;
        Ok(result.rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }

    /// False for sinks that cannot bind parameters; values are then inlined.
    fn supports_parameters(&self) -> bool {
        true
    }

    /// Whether [`bulk_copy`](Self::bulk_copy) can load this table.
    fn supports_bulk_copy(&self, _table: &TableDescriptor) -> bool {
        false
    }

    /// Load rows through the engine's native bulk API.
    async fn bulk_copy(
        &mut self,
        table: &TableDescriptor,
        _columns: &[String],
        _rows: &[Row],
    ) -> Result<u64> {
        Err(MigrateError::transfer(
            table.full_name(),
            "bulk copy is not supported by this connection",
        ))
    }
}

/// Opens connections from connection strings.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn SqlExecutor>>;

    /// Same connection string pointing at another database.
    fn with_database(&self, connection_string: &str, database: &str) -> Result<String>;

    /// Database named by the connection string, if any.
    fn database_name(&self, connection_string: &str) -> Result<Option<String>>;
}

/// Creates and drops databases.
#[async_trait]
pub trait DatabaseLifecycle: Send + Sync {
    async fn create_database(&self, connection_string: &str, name: &str) -> Result<()>;

    async fn drop_database_if_exists(&self, connection_string: &str, name: &str) -> Result<()>;

    /// Remove backing files (file-based engines only).
    async fn delete_files(&self, _connection_string: &str) -> Result<()> {
        Ok(())
    }
}

/// SQL text generation for one engine.
///
/// Object names always go through [`quote_ident`](Self::quote_ident); values
/// are bound as parameters or rendered by a [`ValueRepr`].
pub trait Dialect: Send + Sync {
    fn name(&self) -> &str;

    fn supports_schemas(&self) -> bool {
        true
    }

    /// Separator line written between statements in a dump script.
    fn default_separator(&self) -> &str;

    /// Upper bound on bound parameters per statement.
    fn max_parameters(&self) -> usize;

    /// Upper bound on rows in one multi-row INSERT.
    fn max_rows_per_insert(&self) -> usize {
        usize::MAX
    }

    /// Strategy used for [`InsertStrategy::Default`].
    fn preferred_strategy(&self) -> InsertStrategy {
        InsertStrategy::BatchRow
    }

    fn quote_ident(&self, name: &str) -> Result<String>;

    fn qualify(&self, schema: Option<&str>, name: &str) -> Result<String> {
        match schema {
            Some(s) if self.supports_schemas() && !s.is_empty() => {
                Ok(format!("{}.{}", self.quote_ident(s)?, self.quote_ident(name)?))
            }
            _ => self.quote_ident(name),
        }
    }

    fn qualified_table(&self, table: &TableDescriptor) -> Result<String> {
        self.qualify(table.schema.as_deref(), &table.name)
    }

    fn quote_columns(&self, columns: &[String]) -> Result<String> {
        let quoted = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(quoted.join(", "))
    }

    /// Placeholder for the 1-based parameter `index`.
    fn param_placeholder(&self, index: usize) -> String;

    fn create_schema(&self, schema: &str) -> Result<String>;

    /// Column clause for CREATE TABLE with the given interim nullability.
    fn column_definition(
        &self,
        column: &ColumnDescriptor,
        native_type: &str,
        nullable: bool,
    ) -> Result<String>;

    fn create_table(&self, table: &TableDescriptor, column_definitions: &[String]) -> Result<String> {
        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.qualified_table(table)?,
            column_definitions.join(",\n    ")
        ))
    }

    fn comment_on_table(&self, table: &TableDescriptor, comment: &str) -> Result<Option<String>>;

    fn set_not_null(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        native_type: &str,
    ) -> Result<String>;

    fn add_primary_key(&self, table: &TableDescriptor, pk: &PrimaryKeyDescriptor) -> Result<String> {
        let name = pk
            .name
            .clone()
            .unwrap_or_else(|| constraint_name("pk", &table.name, &[]));
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
            self.qualified_table(table)?,
            self.quote_ident(&name)?,
            self.quote_columns(&pk.columns)?
        ))
    }

    fn set_default(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        default_sql: &str,
    ) -> Result<String>;

    fn add_unique(&self, table: &TableDescriptor, unique: &UniqueDescriptor) -> Result<String> {
        let name = unique
            .name
            .clone()
            .unwrap_or_else(|| constraint_name("uq", &table.name, &unique.columns));
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.qualified_table(table)?,
            self.quote_ident(&name)?,
            self.quote_columns(&unique.columns)?
        ))
    }

    fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<String>;

    fn add_foreign_key(&self, table: &TableDescriptor, fk: &ForeignKeyDescriptor) -> Result<String> {
        let name = fk
            .name
            .clone()
            .unwrap_or_else(|| constraint_name("fk", &table.name, &fk.columns));
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            self.qualified_table(table)?,
            self.quote_ident(&name)?,
            self.quote_columns(&fk.columns)?,
            self.qualify(fk.principal_schema.as_deref(), &fk.principal_table)?,
            self.quote_columns(&fk.principal_columns)?,
            fk.on_delete.sql()
        ))
    }

    fn create_sequence(&self, sequence: &SequenceDescriptor, native_type: &str) -> Result<String>;

    /// Statement allowing explicit identity values, if the engine needs one.
    fn disable_identity(&self, table: &TableDescriptor) -> Result<Option<String>>;

    fn enable_identity(&self, table: &TableDescriptor) -> Result<Option<String>>;

    /// Make the identity generator hand out `next_value` next.
    fn reseed_identity(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        next_value: i64,
        rows_written: bool,
    ) -> Result<String>;

    fn count_rows(&self, table: &TableDescriptor) -> Result<String> {
        Ok(format!("SELECT COUNT(*) FROM {}", self.qualified_table(table)?))
    }

    /// Page of `columns` ordered by `order_by`.
    fn select_page(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        order_by: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<String>;

    /// Multi-row INSERT; `rows` holds placeholders or rendered literals.
    fn insert_rows(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        rows: &[Vec<String>],
    ) -> Result<String> {
        let values = rows
            .iter()
            .map(|r| format!("({})", r.join(", ")))
            .collect::<Vec<_>>()
            .join(",\n    ");
        Ok(format!(
            "INSERT INTO {} ({}) VALUES\n    {}",
            self.qualified_table(table)?,
            self.quote_columns(columns)?,
            values
        ))
    }

    /// String literal for metadata statements (comments, catalog lookups).
    fn string_literal(&self, s: &str) -> String {
        format!("'{}'", escape_string_literal(s))
    }
}

/// Deterministic constraint name for unnamed keys, indexes and defaults.
pub fn constraint_name(prefix: &str, table: &str, columns: &[String]) -> String {
    let mut name = format!("{}_{}", prefix, table);
    for c in columns {
        name.push('_');
        name.push_str(c);
    }
    // PostgreSQL truncates identifiers at 63 bytes.
    if name.len() > 63 {
        let mut cut = 63;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}
