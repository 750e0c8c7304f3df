//! Microsoft SQL Server driver.
//!
//! - [`MssqlTypes`] / [`MssqlExpressions`] / [`MssqlRepr`]: translators
//! - [`MssqlDialect`]: T-SQL generation
//! - [`MssqlSchemaReader`]: `sys.*` catalog introspection
//! - [`MssqlConnectionProvider`] / [`MssqlLifecycle`]: bb8-pooled Tiberius connections

mod connection;
mod dialect;
mod expression;
mod reader;
mod repr;
mod types;

use std::sync::Arc;

use crate::core::catalog::DbAgent;

pub use connection::{
    with_database, MssqlConnectionProvider, MssqlExecutor, MssqlLifecycle,
    TiberiusConnectionManager,
};
pub use dialect::MssqlDialect;
pub use expression::MssqlExpressions;
pub use reader::MssqlSchemaReader;
pub use repr::MssqlRepr;
pub use types::MssqlTypes;

/// Collaborator bundle registered under `mssql`.
pub fn agent() -> DbAgent {
    let types = Arc::new(MssqlTypes);
    let expressions = Arc::new(MssqlExpressions::new());
    let connections = Arc::new(MssqlConnectionProvider::default());
    DbAgent {
        engine: "mssql".to_string(),
        types: types.clone(),
        expressions: expressions.clone(),
        repr: Arc::new(MssqlRepr),
        dialect: Arc::new(MssqlDialect::new()),
        schema_reader: Arc::new(MssqlSchemaReader::new(types, expressions)),
        connections: connections.clone(),
        lifecycle: Arc::new(MssqlLifecycle::new(connections)),
    }
}
