//! Core abstractions for engine-neutral migration.
//!
//! - [`types`]: canonical column types
//! - [`value`]: runtime values and materialized query results
//! - [`expression`]: canonical default-value expressions
//! - [`schema`]: database, table, column, key and sequence descriptors
//! - [`identifier`]: identifier validation and quoting
//! - [`traits`]: per-engine collaborator interfaces
//! - [`catalog`]: engine registry for dependency injection
//!
//! Nothing here depends on a concrete database driver; engines implement the
//! traits in `drivers/`.

pub mod catalog;
pub mod expression;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod types;
pub mod value;

pub use catalog::{DbAgent, DriverCatalog, Endpoint};
pub use expression::{SqlExpressionDescriptor, SqlFunction};
pub use schema::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IdentityInfo, IndexDescriptor,
    OnDelete, PrimaryKeyDescriptor, SequenceDescriptor, TableDescriptor, UniqueDescriptor,
};
pub use traits::{
    ConnectionProvider, DatabaseLifecycle, Dialect, ExpressionTranslator, InsertStrategy,
    ReadSchemaOptions, SchemaReader, SqlExecutor, TypeTranslator, ValueRepr,
};
pub use types::{DataTypeDescriptor, DbType};
pub use value::{QueryResult, Row, SqlValue};
