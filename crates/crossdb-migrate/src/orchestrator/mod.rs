//! Migration orchestrator - main workflow coordinator.
//!
//! A run is `ReadSource -> PreMigrateTarget -> DataMigrate -> PostMigrateTarget`.
//! A dump runs the same pipeline against a script sink instead of a live
//! target; an import replays such a script.

mod filter;

pub use filter::TableFilter;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, EndpointConfig};
use crate::core::catalog::{DriverCatalog, Endpoint};
use crate::core::schema::DatabaseDescriptor;
use crate::error::{MigrateError, Result};
use crate::metadata::{check_foreign_key_cycles, MetadataMigrator};
use crate::progress::ProgressReporter;
use crate::script::{self, ScriptSink, ScriptTokenizer};
use crate::transfer::DataMigrator;

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: DriverCatalog,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed or cancelled.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total tables processed.
    pub tables_total: usize,

    /// Tables successfully migrated.
    pub tables_success: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows transferred.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// List of failed table names.
    pub failed_tables: Vec<String>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connectivity of both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

async fn probe(endpoint: Result<Endpoint>) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let outcome = async {
        let endpoint = endpoint?;
        let mut conn = endpoint.connect().await?;
        conn.query_scalar("SELECT 1", &[]).await?;
        Ok::<_, MigrateError>(())
    }
    .await;
    let latency = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}

impl Orchestrator {
    /// Create an orchestrator over the built-in PostgreSQL and SQL Server drivers.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            catalog: DriverCatalog::with_builtins(),
            progress: ProgressReporter::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: DriverCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Stop between phases, tables and pages once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn endpoint(&self, config: &EndpointConfig) -> Result<Endpoint> {
        let agent = self.catalog.agent(&config.engine)?;
        Ok(Endpoint::new(agent, config.connection_string()?))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Cancellation requested, stopping");
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }

    fn separator(&self, target: &Endpoint) -> String {
        self.config
            .dump
            .separator
            .clone()
            .unwrap_or_else(|| target.dialect().default_separator().to_string())
    }

    /// Run the migration against the live target.
    pub async fn run(&self) -> Result<MigrationResult> {
        let source = self.endpoint(&self.config.source)?;
        let target = self.endpoint(&self.config.target)?;
        self.prepare_database(&target).await?;
        self.migrate(source, target, self.config.migration.get_workers())
            .await
    }

    /// Write the migration as a replayable script instead of executing it.
    pub async fn dump(&self, out: Box<dyn Write + Send>) -> Result<MigrationResult> {
        let source = self.endpoint(&self.config.source)?;
        let agent = self.catalog.agent(&self.config.target.engine)?;
        let placeholder = Endpoint::new(agent, String::new());
        let separator = self.separator(&placeholder);
        let sink = ScriptSink::new(out, &separator)?;
        let target = placeholder.with_connections(Arc::new(sink.clone()));

        sink.comment(&format!(
            "Migration script from {} to {}\nGenerated {}",
            source.engine(),
            target.engine(),
            Utc::now().to_rfc3339()
        ))
        .await?;
        // One worker keeps session-scoped statements contiguous.
        let result = self.migrate(source, target, 1).await?;
        let statements = sink.finish().await?;
        info!("Wrote {} statements (separator '{}')", statements, separator);
        Ok(result)
    }

    /// Replay a script against the target; returns the statements executed.
    pub async fn import(&self, path: &Path) -> Result<usize> {
        let target = self.endpoint(&self.config.target)?;
        self.prepare_database(&target).await?;
        let separator = self.separator(&target);
        let text = tokio::fs::read_to_string(path).await?;
        let statements = ScriptTokenizer::new(&separator)?.split(&text)?;
        info!(
            "Importing {} statements from {}",
            statements.len(),
            path.display()
        );
        let mut conn = target.connect().await?;
        let executed = script::replay(conn.as_mut(), &statements).await?;
        info!("Import complete: {} statements executed", executed);
        Ok(executed)
    }

    /// Read the source schema, filtered like a run would filter it.
    pub async fn inspect(&self) -> Result<DatabaseDescriptor> {
        let source = self.endpoint(&self.config.source)?;
        let mut conn = source.connect().await?;
        let mut db = source
            .agent
            .schema_reader
            .read_database(conn.as_mut(), &self.config.metadata_options().read)
            .await?;
        let filter = TableFilter::new(
            &self.config.migration.include_tables,
            &self.config.migration.exclude_tables,
        )?;
        if !filter.is_empty() {
            db.retain_tables(|t| filter.matches(t));
        }
        db.validate()?;
        Ok(db)
    }

    /// Open both ends and run a trivial query on each.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) =
            probe(self.endpoint(&self.config.source)).await;
        let (target_connected, target_latency_ms, target_error) =
            probe(self.endpoint(&self.config.target)).await;
        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        })
    }

    async fn prepare_database(&self, target: &Endpoint) -> Result<()> {
        let migration = &self.config.migration;
        if !migration.create_database && !migration.drop_existing_database {
            return Ok(());
        }
        let cs = &target.connection_string;
        let name = target.connections.database_name(cs)?.ok_or_else(|| {
            MigrateError::Config("target database name is required to create it".into())
        })?;
        let lifecycle = &target.agent.lifecycle;
        if migration.drop_existing_database {
            info!("Dropping target database {} if it exists", name);
            lifecycle.drop_database_if_exists(cs, &name).await?;
        }
        info!("Creating target database {}", name);
        lifecycle.create_database(cs, &name).await
    }

    /// Filter and normalize the source descriptor for the target.
    fn prepare_descriptor(
        &self,
        db: &mut DatabaseDescriptor,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<()> {
        let filter = TableFilter::new(
            &self.config.migration.include_tables,
            &self.config.migration.exclude_tables,
        )?;
        let before = db.tables.len();
        let dropped = db.retain_tables(|t| filter.matches(t));
        if !filter.is_empty() {
            info!("Table filter kept {} of {} tables", db.tables.len(), before);
        }
        for (owner, principal) in dropped {
            warn!(
                "Dropping foreign key from {} to {}: table is not migrated",
                owner, principal
            );
        }

        if source.engine() != target.engine() {
            for note in db.strip_engine_specific() {
                warn!("{}", note);
            }
        }
        if !target.dialect().supports_schemas() {
            db.clear_schema_names();
        } else if let Some(schema) = &self.config.target.schema {
            db.remap_schema(schema);
        }
        db.validate()?;
        check_foreign_key_cycles(db)
    }

    async fn migrate(
        &self,
        source: Endpoint,
        target: Endpoint,
        workers: usize,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Starting migration run {}: {} -> {}",
            run_id,
            source.engine(),
            target.engine()
        );

        let mut metadata_options = self.config.metadata_options();
        metadata_options.scheduler.workers = workers;
        let mut transfer_options = self.config.transfer_options();
        transfer_options.scheduler.workers = workers;

        let metadata = MetadataMigrator::new(
            source.clone(),
            target.clone(),
            metadata_options,
            self.progress.clone(),
        );

        info!("Phase 1: Reading source schema");
        let mut db = metadata.read_source().await?;
        self.prepare_descriptor(&mut db, &source, &target)?;
        info!("Found {} tables to migrate", db.tables.len());
        self.check_cancelled()?;

        info!("Phase 2: Creating tables on target");
        metadata.pre_migrate(&db).await?;
        self.check_cancelled()?;

        let report = if self.config.migration.migrate_data {
            info!("Phase 3: Transferring data");
            let data = DataMigrator::new(source, target, transfer_options, self.progress.clone())
                .with_cancellation(self.cancel.clone());
            Some(data.migrate_all(&db).await)
        } else {
            info!("Phase 3: Skipped (migrate_data is off)");
            None
        };

        // Constraints only go on top of a complete data load.
        let data_error = report.as_ref().and_then(|r| r.error.as_ref());
        if data_error.is_none() {
            self.check_cancelled()?;
            info!("Phase 4: Finalizing (constraints, indexes, foreign keys)");
            metadata.post_migrate(&db).await?;
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let tables_total = db.tables.len();
        let (tables_success, failed_tables, rows_transferred) = match &report {
            Some(r) => (r.tables.len(), r.failed_tables.clone(), r.rows_transferred()),
            None => (tables_total, Vec::new(), 0),
        };
        let rows_per_second = if duration > 0.0 {
            (rows_transferred as f64 / duration) as u64
        } else {
            0
        };
        let status = match data_error {
            Some(MigrateError::Cancelled) => "cancelled",
            Some(_) => "failed",
            None => "completed",
        };

        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            tables_total,
            tables_success,
            tables_failed: failed_tables.len(),
            rows_transferred,
            rows_per_second,
            failed_tables,
        };

        info!(
            "Migration {}: {} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_total,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );

        if let Some(e) = report.and_then(|r| r.error) {
            return Err(e);
        }
        Ok(result)
    }
}
