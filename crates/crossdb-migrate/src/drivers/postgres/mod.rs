//! PostgreSQL driver.
//!
//! - [`PostgresTypes`] / [`PostgresExpressions`] / [`PostgresRepr`]: translators
//! - [`PostgresDialect`]: SQL generation
//! - [`PostgresSchemaReader`]: `pg_catalog` introspection
//! - [`PgConnectionProvider`] / [`PgLifecycle`]: deadpool-backed connections

mod connection;
mod dialect;
mod expression;
mod reader;
mod repr;
mod types;

use std::sync::Arc;

use crate::core::catalog::DbAgent;

pub use connection::{with_database, PgConnectionProvider, PgExecutor, PgLifecycle};
pub use dialect::PostgresDialect;
pub use expression::PostgresExpressions;
pub use reader::PostgresSchemaReader;
pub use repr::PostgresRepr;
pub use types::PostgresTypes;

/// Collaborator bundle registered under `postgres`.
pub fn agent() -> DbAgent {
    let types = Arc::new(PostgresTypes);
    let expressions = Arc::new(PostgresExpressions::new());
    let connections = Arc::new(PgConnectionProvider::default());
    DbAgent {
        engine: "postgres".to_string(),
        types: types.clone(),
        expressions: expressions.clone(),
        repr: Arc::new(PostgresRepr),
        dialect: Arc::new(PostgresDialect::new()),
        schema_reader: Arc::new(PostgresSchemaReader::new(types, expressions)),
        connections: connections.clone(),
        lifecycle: Arc::new(PgLifecycle::new(connections)),
    }
}
