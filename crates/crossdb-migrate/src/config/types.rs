//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::traits::{InsertStrategy, ReadSchemaOptions};
use crate::metadata::MetadataOptions;
use crate::scheduler::SchedulerOptions;
use crate::transfer::TransferOptions;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: EndpointConfig,

    pub target: EndpointConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub dump: DumpConfig,
}

impl Config {
    /// Fill unset performance settings from the machine's resources.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }

    pub fn metadata_options(&self) -> MetadataOptions {
        MetadataOptions {
            read: ReadSchemaOptions {
                schemas: self.source.schemas.clone(),
                allow_unknown_types: self.migration.allow_unknown_types,
            },
            create_indexes: self.migration.create_indexes,
            create_foreign_keys: self.migration.create_foreign_keys,
            scheduler: self.migration.scheduler_options(),
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            strategy: self.migration.insert_strategy,
            batch_rows: self.migration.batch_rows,
            fetch_growth: self.migration.fetch_growth,
            max_fetch_bytes: self.migration.max_fetch_bytes,
            scheduler: self.migration.scheduler_options(),
        }
    }
}

/// One database end of a migration.
///
/// Either `connection_string` is given verbatim, or it is assembled from
/// the individual fields in the engine's native format.
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Engine name: `postgres` (`postgresql`, `pg`) or `mssql` (`sqlserver`).
    pub engine: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    #[serde(default)]
    pub host: String,

    /// Defaults to the engine's well-known port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// PostgreSQL `sslmode` (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// MSSQL encryption (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    #[serde(default)]
    pub trust_server_cert: bool,

    /// Schemas to introspect; empty reads every user schema.
    #[serde(default)]
    pub schemas: Vec<String>,

    /// Remap every table and sequence into this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("engine", &self.engine)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "[REDACTED]"),
            )
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("schemas", &self.schemas)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Migration behavior configuration.
///
/// `workers` is an `Option` to tell "not set" (auto-tuned) from an explicit
/// value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub insert_strategy: InsertStrategy,

    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,

    #[serde(default = "default_fetch_growth")]
    pub fetch_growth: f64,

    #[serde(default = "default_max_fetch_bytes")]
    pub max_fetch_bytes: usize,

    /// Scheduler workers. Auto-tuned from CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(default = "default_retry_delay_ms")]
    pub scheduler_retry_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub scheduler_max_retries: u32,

    /// Copy table contents (default: true).
    #[serde(default = "default_true")]
    pub migrate_data: bool,

    #[serde(default = "default_true")]
    pub create_indexes: bool,

    #[serde(default = "default_true")]
    pub create_foreign_keys: bool,

    /// Degrade unrecognized column types instead of failing.
    #[serde(default)]
    pub allow_unknown_types: bool,

    /// Create the target database before migrating.
    #[serde(default)]
    pub create_database: bool,

    /// Drop an existing target database first (implies `create_database`).
    #[serde(default)]
    pub drop_existing_database: bool,

    /// Tables to include (glob patterns).
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            insert_strategy: InsertStrategy::Default,
            batch_rows: default_batch_rows(),
            fetch_growth: default_fetch_growth(),
            max_fetch_bytes: default_max_fetch_bytes(),
            workers: None,
            scheduler_retry_delay_ms: default_retry_delay_ms(),
            scheduler_max_retries: default_max_retries(),
            migrate_data: true,
            create_indexes: true,
            create_foreign_keys: true,
            allow_unknown_types: false,
            create_database: false,
            drop_existing_database: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.workers.is_none() {
            self.workers = Some(resources.cpu_cores.clamp(2, 8));
        }
        info!(
            "Auto-tuned config: workers={}, batch_rows={}, max_fetch_bytes={}",
            self.get_workers(),
            self.batch_rows,
            self.max_fetch_bytes
        );
        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(6)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            workers: self.get_workers(),
            retry_delay: Duration::from_millis(self.scheduler_retry_delay_ms),
            max_retries: self.scheduler_max_retries,
        }
    }
}

/// Script dump settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Statement separator; defaults to the target engine's (`GO` or `;`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_rows() -> usize {
    1000
}

fn default_fetch_growth() -> f64 {
    2.0
}

fn default_max_fetch_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    2400
}
