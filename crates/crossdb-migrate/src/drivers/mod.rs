//! Database driver implementations.
//!
//! Each engine module implements the collaborator traits from
//! [`crate::core::traits`] and exposes an `agent()` bundling them:
//!
//! - [`mssql`]: Microsoft SQL Server (Tiberius + bb8)
//! - [`postgres`]: PostgreSQL (tokio-postgres + deadpool)
//! - [`common`]: TLS setup and catalog assembly shared by both
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with type, expression and literal
//!    translators, a `Dialect`, a `SchemaReader` and a `ConnectionProvider`
//! 2. Return them from an `agent()` function
//! 3. Register the agent in `DriverCatalog::with_builtins()`

pub mod common;
pub mod mssql;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use mssql::MssqlDialect;
pub use postgres::PostgresDialect;
