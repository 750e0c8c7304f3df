//! # crossdb-migrate
//!
//! Cross-engine relational database migration between SQL Server and
//! PostgreSQL.
//!
//! A migration reads the source schema into engine-neutral descriptors,
//! recreates tables on the target, copies rows with adaptive pagination and
//! finally adds constraints, defaults, indexes and foreign keys:
//!
//! - **Canonical types and expressions** translated per engine
//! - **Dependency scheduling** so principals load before dependents
//! - **Insert strategies** from single-row inserts to bulk copy
//! - **Identity preservation** with reseeding after the load
//! - **Script dumps** that can be replayed later with `import`
//!
//! ## Example
//!
//! ```rust,no_run
//! use crossdb_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> crossdb_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let result = Orchestrator::new(config).run().await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod script;
pub mod transfer;
pub mod translate;

#[cfg(test)]
mod testkit;

// Re-exports for convenient access
pub use config::{Config, DumpConfig, EndpointConfig, MigrationConfig};
pub use crate::core::catalog::{DbAgent, DriverCatalog, Endpoint};
pub use crate::core::schema::DatabaseDescriptor;
pub use crate::core::traits::InsertStrategy;
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, MigrationResult, Orchestrator, TableFilter};
pub use progress::{ProgressEvent, ProgressReporter, Stage};
pub use transfer::{DataMigrationReport, DataMigrator, TransferOptions, TransferStats};
