//! Table data transfer.
//!
//! Every table is copied on its own source and target connections as
//! `count -> page reads -> batched writes`. Pages are read in a deterministic
//! order (primary key, or every non-huge column) and sized by [`Pager`].
//! Tables go through the dependency scheduler so principals are loaded
//! before the tables that reference them.
//!
//! Identity columns are copied verbatim: generation is switched off before
//! the first write, switched back on afterwards (also when the copy fails),
//! and finally reseeded so the next generated value continues where the
//! source left off.

mod pager;
mod writer;

pub use pager::Pager;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::catalog::Endpoint;
use crate::core::schema::{ColumnDescriptor, DatabaseDescriptor, TableDescriptor};
use crate::core::traits::{InsertStrategy, SqlExecutor};
use crate::core::types::DataTypeDescriptor;
use crate::core::value::Row;
use crate::error::{MigrateError, Result};
use crate::progress::{ProgressReporter, Stage};
use crate::scheduler::{self, SchedulerOptions, WorkItem};

use writer::RowWriter;

/// Data transfer settings.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub strategy: InsertStrategy,
    /// Rows per INSERT or bulk load, before engine limits apply.
    pub batch_rows: usize,
    /// Page size multiplier after each full page.
    pub fetch_growth: f64,
    /// Estimated byte budget of one page.
    pub max_fetch_bytes: usize,
    pub scheduler: SchedulerOptions,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            strategy: InsertStrategy::Default,
            batch_rows: 1000,
            fetch_growth: 2.0,
            max_fetch_bytes: 8 * 1024 * 1024,
            scheduler: SchedulerOptions::default(),
        }
    }
}

/// Statistics from one table transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// Time spent reading pages.
    pub query_time: Duration,

    /// Time spent writing.
    pub write_time: Duration,

    /// Rows written to the target.
    pub rows: u64,

    /// Pages read from the source.
    pub pages: u64,

    /// Whether the table finished.
    pub completed: bool,
}

/// Outcome of migrating every table's data.
#[derive(Debug, Default)]
pub struct DataMigrationReport {
    /// Tables that finished, in completion order.
    pub tables: Vec<(String, TransferStats)>,
    pub failed_tables: Vec<String>,
    /// First error; it stopped the remaining tables.
    pub error: Option<MigrateError>,
}

impl DataMigrationReport {
    pub fn rows_transferred(&self) -> u64 {
        self.tables.iter().map(|(_, s)| s.rows).sum()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Copies table contents from the source endpoint to the target endpoint.
#[derive(Clone)]
pub struct DataMigrator {
    source: Endpoint,
    target: Endpoint,
    options: TransferOptions,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl DataMigrator {
    pub fn new(
        source: Endpoint,
        target: Endpoint,
        options: TransferOptions,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            source,
            target,
            options,
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before the next table or page once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// DataMigrate: copy every table, principals before dependents.
    pub async fn migrate_all(&self, db: &DatabaseDescriptor) -> DataMigrationReport {
        self.progress.stage(Stage::TableDataStart);
        info!("Migrating data for {} tables", db.tables.len());
        let start = Instant::now();

        let finished: Arc<Mutex<Vec<(String, TransferStats)>>> = Arc::default();
        let failed: Arc<Mutex<Vec<String>>> = Arc::default();
        let items: Vec<WorkItem<TableDescriptor>> = db
            .tables
            .iter()
            .map(|t| WorkItem::new(t.full_name(), t.dependencies(), t.clone()))
            .collect();

        let this = self.clone();
        let finished_tables = finished.clone();
        let failed_tables = failed.clone();
        let outcome = scheduler::run_all(items, &self.options.scheduler, move |table: TableDescriptor| {
            let this = this.clone();
            let finished = finished_tables.clone();
            let failed = failed_tables.clone();
            async move {
                let name = table.full_name();
                match this.migrate_table(&table).await {
                    Ok(stats) => {
                        finished.lock().await.push((name, stats));
                        Ok(())
                    }
                    Err(e) => {
                        failed.lock().await.push(name);
                        Err(e)
                    }
                }
            }
        })
        .await;

        let tables = std::mem::take(&mut *finished.lock().await);
        let failed_tables = std::mem::take(&mut *failed.lock().await);
        let report = DataMigrationReport {
            tables,
            failed_tables,
            error: outcome.err(),
        };
        info!(
            "Data migration transferred {} rows in {:?} ({} tables, {} failed)",
            report.rows_transferred(),
            start.elapsed(),
            report.tables.len(),
            report.failed_tables.len()
        );
        self.progress.stage(Stage::TableDataEnd);
        report
    }

    /// Copy one table. Errors other than cancellation name the table.
    pub async fn migrate_table(&self, table: &TableDescriptor) -> Result<TransferStats> {
        let name = table.full_name();
        self.transfer(table).await.map_err(|e| match e {
            MigrateError::Cancelled | MigrateError::Transfer { .. } => e,
            other => MigrateError::transfer(name, other.to_string()),
        })
    }

    fn resolve_strategy(&self, table: &TableDescriptor, target: &dyn SqlExecutor) -> InsertStrategy {
        let mut strategy = self.options.strategy;
        if strategy == InsertStrategy::Default {
            strategy = self.target.dialect().preferred_strategy();
        }
        if strategy == InsertStrategy::Default {
            strategy = InsertStrategy::BatchRow;
        }
        if strategy == InsertStrategy::BlockCopy && !target.supports_bulk_copy(table) {
            debug!("{}: bulk copy unavailable, using batched inserts", table.full_name());
            strategy = InsertStrategy::BatchRow;
        }
        strategy
    }

    async fn transfer(&self, table: &TableDescriptor) -> Result<TransferStats> {
        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        let name = table.full_name();
        let start = Instant::now();
        let mut source = self.source.connect().await?;
        let mut target = self.target.connect().await?;
        let target_dialect = self.target.dialect();

        let count_sql = self.source.dialect().count_rows(table)?;
        let total = source
            .query_scalar(&count_sql, &[])
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        self.progress.table_data(&name, total, 0, false);

        let strategy = self.resolve_strategy(table, target.as_ref());
        let columns = table.data_columns();
        let mut writer = RowWriter::new(
            table,
            columns.iter().map(|c| c.name.clone()).collect(),
            columns.iter().map(|c| c.data_type.clone()).collect(),
            target_dialect,
            self.target.agent.repr.as_ref(),
            strategy,
            target.supports_parameters(),
            self.options.batch_rows,
        );
        info!(
            "Starting transfer for {} ({} rows, strategy: {}, rows per write: {})",
            name,
            total,
            strategy,
            writer.rows_per_write()
        );

        let identity = table.identity_column().filter(|c| !c.is_computed());
        if identity.is_some() {
            if let Some(sql) = target_dialect.disable_identity(table)? {
                debug!("{}", sql);
                target.execute(&sql, &[]).await?;
            }
        }

        let mut stats = TransferStats::default();
        let copied = self
            .copy_rows(table, &columns, source.as_mut(), target.as_mut(), &mut writer, &mut stats, total)
            .await;

        if identity.is_some() {
            if let Some(sql) = target_dialect.enable_identity(table)? {
                debug!("{}", sql);
                let enabled = target.execute(&sql, &[]).await;
                match (&copied, enabled) {
                    (Ok(()), Err(e)) => return Err(e),
                    (Err(_), Err(e)) => warn!("{}: re-enabling identity failed: {}", name, e),
                    _ => {}
                }
            }
        }
        copied?;

        if let Some(column) = identity {
            self.reseed(target.as_mut(), table, column, stats.rows > 0).await?;
        }

        stats.completed = true;
        self.progress.table_data(&name, total, stats.rows, true);

        let elapsed = start.elapsed();
        let rows_per_sec = if elapsed.as_secs_f64() > 0.0 {
            (stats.rows as f64 / elapsed.as_secs_f64()) as u64
        } else {
            0
        };
        info!(
            "{}: transferred {} rows in {:?} ({} rows/sec, {} pages, read: {:?}, write: {:?})",
            name, stats.rows, elapsed, rows_per_sec, stats.pages, stats.query_time, stats.write_time
        );
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    async fn copy_rows(
        &self,
        table: &TableDescriptor,
        columns: &[&ColumnDescriptor],
        source: &mut dyn SqlExecutor,
        target: &mut dyn SqlExecutor,
        writer: &mut RowWriter<'_>,
        stats: &mut TransferStats,
        total: i64,
    ) -> Result<()> {
        let name = table.full_name();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let types: Vec<&DataTypeDescriptor> = columns.iter().map(|c| &c.data_type).collect();
        let order = table.ordering_columns();
        let mut pager = Pager::new(self.options.fetch_growth, self.options.max_fetch_bytes);
        let mut offset = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            let limit = pager.page_rows();
            let sql = self
                .source
                .dialect()
                .select_page(table, &names, &order, offset, limit)?;

            let read_start = Instant::now();
            let page = source.query(&sql, &[]).await?;
            stats.query_time += read_start.elapsed();
            stats.pages += 1;

            let returned = page.len();
            let bytes = page.byte_size();
            let rows = page
                .rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .zip(&types)
                        .map(|(value, ty)| value.coerce_to(ty))
                        .collect::<Result<Row>>()
                })
                .collect::<Result<Vec<_>>>()?;

            let write_start = Instant::now();
            writer.push(target, rows).await?;
            stats.write_time += write_start.elapsed();

            offset += returned as u64;
            self.progress.table_data(&name, total, offset, false);

            if pager.advance(returned, bytes) {
                debug!("{}: no more rows to read after {} pages", name, stats.pages);
                break;
            }
            if pager.page_rows() != limit {
                debug!(
                    "{}: page size {} -> {} rows ({} bytes in last page)",
                    name,
                    limit,
                    pager.page_rows(),
                    bytes
                );
            }
        }

        let write_start = Instant::now();
        stats.rows = writer.finish(target).await?;
        stats.write_time += write_start.elapsed();
        Ok(())
    }

    /// Continue generation after the source's last generated value. Skipped
    /// when the source never generated one.
    async fn reseed(
        &self,
        target: &mut dyn SqlExecutor,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        rows_written: bool,
    ) -> Result<()> {
        let Some(info) = column.identity.filter(|i| i.current_value.is_some()) else {
            return Ok(());
        };
        let sql = self
            .target
            .dialect()
            .reseed_identity(table, column, info.next_value(), rows_written)?;
        debug!("{}", sql);
        target.execute(&sql, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ForeignKeyDescriptor, IdentityInfo, OnDelete, PrimaryKeyDescriptor};
    use crate::core::value::SqlValue;
    use crate::metadata::{MetadataMigrator, MetadataOptions};
    use crate::progress::ProgressEvent;
    use crate::script::ScriptSink;
    use crate::testkit::{MemoryDialect, MemoryEngine, SharedBuffer};

    fn items_table(name: &str, current: Option<i64>) -> TableDescriptor {
        let mut t = TableDescriptor::new(Some("app".into()), name);
        t.columns.push(
            ColumnDescriptor::new("id", DataTypeDescriptor::int(), false)
                .with_identity(IdentityInfo::new(1, 1, current)),
        );
        t.columns
            .push(ColumnDescriptor::new("name", DataTypeDescriptor::varchar(Some(50)), true));
        t.primary_key = Some(PrimaryKeyDescriptor {
            name: None,
            columns: vec!["id".into()],
        });
        t
    }

    fn item_rows(n: i32) -> Vec<Row> {
        (1..=n)
            .map(|i| vec![SqlValue::I32(i), SqlValue::Text(format!("item {}", i))])
            .collect()
    }

    fn fast_scheduler() -> SchedulerOptions {
        SchedulerOptions {
            workers: 4,
            retry_delay: Duration::from_millis(1),
            max_retries: 5000,
        }
    }

    async fn prepare_target(source: &MemoryEngine, target: &MemoryEngine) -> DatabaseDescriptor {
        let m = MetadataMigrator::new(
            Endpoint::new(source.agent(), "source"),
            Endpoint::new(target.agent(), "target"),
            MetadataOptions::default(),
            ProgressReporter::disabled(),
        );
        let db = m.read_source().await.unwrap();
        m.pre_migrate(&db).await.unwrap();
        db
    }

    fn migrator(source: &MemoryEngine, target: &MemoryEngine, options: TransferOptions) -> DataMigrator {
        DataMigrator::new(
            Endpoint::new(source.agent(), "source"),
            Endpoint::new(target.agent(), "target"),
            options,
            ProgressReporter::disabled(),
        )
    }

    fn options() -> TransferOptions {
        TransferOptions {
            scheduler: fast_scheduler(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_identity_reseed_continues_after_source() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(5)), item_rows(5));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;

        let report = migrator(&source, &target, options()).migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.rows_transferred(), 5);

        let on = target.position("SET IDENTITY_INSERT \"app\".\"items\" ON").unwrap();
        let insert = target.position("INSERT INTO \"app\".\"items\"").unwrap();
        let off = target.position("SET IDENTITY_INSERT \"app\".\"items\" OFF").unwrap();
        let reseed = target.position("RESTART WITH 6").unwrap();
        assert!(on < insert && insert < off && off < reseed);

        let mut conn = target.executor();
        conn.execute("INSERT INTO \"app\".\"items\" (\"name\") VALUES ('next')", &[])
            .await
            .unwrap();
        let rows = target.rows("app.items");
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[5][0], SqlValue::I64(6));
    }

    #[tokio::test]
    async fn test_reseed_skipped_without_generated_values() {
        let source = MemoryEngine::new().with_table(items_table("items", None), vec![]);
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;
        let report = migrator(&source, &target, options()).migrate_all(&db).await;
        assert!(report.is_success());
        assert!(target.position("RESTART WITH").is_none());
    }

    #[tokio::test]
    async fn test_pages_grow_and_cover_table() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(300)), item_rows(300));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;
        let mut opts = options();
        opts.fetch_growth = 3.0;
        opts.max_fetch_bytes = 200;

        let report = migrator(&source, &target, opts).migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);

        let pages = source.pages("app.items");
        assert_eq!(pages[0], (1, 1));
        assert!(pages.windows(2).all(|w| w[0].0 <= w[1].0));
        let (last_limit, last_returned) = pages[pages.len() - 1];
        assert!((last_returned as u64) < last_limit);
        assert_eq!(pages.iter().map(|p| p.1).sum::<usize>(), 300);

        let copied: Vec<Row> = target
            .rows("app.items")
            .into_iter()
            .map(|r| vec![SqlValue::I32(r[0].as_i64().unwrap() as i32), r[1].clone()])
            .collect();
        assert_eq!(copied, item_rows(300));
    }

    #[tokio::test]
    async fn test_batches_respect_parameter_limit() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(5)), item_rows(5));
        let mut dialect = MemoryDialect::default();
        dialect.max_parameters = 4;
        let target = MemoryEngine::with_dialect(dialect);
        let db = prepare_target(&source, &target).await;

        let report = migrator(&source, &target, options()).migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);
        let inserts = target.log().iter().filter(|s| s.starts_with("INSERT")).count();
        assert_eq!(inserts, 3);
        assert_eq!(target.rows("app.items").len(), 5);
    }

    #[tokio::test]
    async fn test_single_row_strategy() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(3)), item_rows(3));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;
        let mut opts = options();
        opts.strategy = InsertStrategy::SingleRow;
        let report = migrator(&source, &target, opts).migrate_all(&db).await;
        assert!(report.is_success());
        assert_eq!(target.log().iter().filter(|s| s.starts_with("INSERT")).count(), 3);
    }

    #[tokio::test]
    async fn test_block_copy_uses_bulk_load_when_available() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(4)), item_rows(4));
        let target = MemoryEngine::new().with_bulk_copy();
        let db = prepare_target(&source, &target).await;
        let mut opts = options();
        opts.strategy = InsertStrategy::BlockCopy;

        let report = migrator(&source, &target, opts.clone()).migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);
        assert!(target.bulk_loads() > 0);
        assert!(target.position("INSERT INTO").is_none());
        assert_eq!(target.rows("app.items").len(), 4);

        // Without bulk support the same strategy degrades to batched inserts.
        let plain = MemoryEngine::new();
        let db = prepare_target(&source, &plain).await;
        let report = migrator(&source, &plain, opts).migrate_all(&db).await;
        assert!(report.is_success());
        assert_eq!(plain.bulk_loads(), 0);
        assert!(plain.position("INSERT INTO").is_some());
    }

    #[tokio::test]
    async fn test_script_target_inlines_values() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(2)), item_rows(2));
        let buffer = SharedBuffer::default();
        let sink = ScriptSink::new(Box::new(buffer.clone()), "GO").unwrap();
        let target = Endpoint::new(MemoryEngine::new().agent(), "").with_connections(Arc::new(sink));
        let db = source
            .agent()
            .schema_reader
            .read_database(&mut source.executor(), &Default::default())
            .await
            .unwrap();

        let m = DataMigrator::new(
            Endpoint::new(source.agent(), "source"),
            target,
            options(),
            ProgressReporter::disabled(),
        );
        let report = m.migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);

        let script = buffer.contents();
        assert!(script.contains("SET IDENTITY_INSERT \"app\".\"items\" ON\nGO"), "{}", script);
        assert!(script.contains("(1, 'item 1'),\n    (2, 'item 2')"), "{}", script);
        assert!(script.contains("RESTART WITH 3"), "{}", script);
    }

    #[tokio::test]
    async fn test_principals_load_before_dependents() {
        let parent = items_table("parent", Some(3));
        let mut child = items_table("child", Some(3));
        child
            .columns
            .push(ColumnDescriptor::new("parent_id", DataTypeDescriptor::int(), true));
        child.foreign_keys.push(ForeignKeyDescriptor {
            name: None,
            columns: vec!["parent_id".into()],
            principal_schema: Some("app".into()),
            principal_table: "parent".into(),
            principal_columns: vec!["id".into()],
            on_delete: OnDelete::Cascade,
        });
        let child_rows = (1..=3)
            .map(|i| vec![SqlValue::I32(i), SqlValue::Text("c".into()), SqlValue::I32(i)])
            .collect();
        let source = MemoryEngine::new()
            .with_table(child, child_rows)
            .with_table(parent, item_rows(3));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;

        let report = migrator(&source, &target, options()).migrate_all(&db).await;
        assert!(report.is_success(), "{:?}", report.error);
        let parent_insert = target.position("INSERT INTO \"app\".\"parent\"").unwrap();
        let child_insert = target.position("INSERT INTO \"app\".\"child\"").unwrap();
        assert!(parent_insert < child_insert);
        assert_eq!(report.tables.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_names_table_and_restores_identity() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(5)), item_rows(5));
        let target = MemoryEngine::new().fail_on("INSERT INTO");
        let db = prepare_target(&source, &target).await;

        let report = migrator(&source, &target, options()).migrate_all(&db).await;
        assert_eq!(report.failed_tables, vec!["app.items".to_string()]);
        match report.error {
            Some(MigrateError::Transfer { table, .. }) => assert_eq!(table, "app.items"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(target.position("SET IDENTITY_INSERT \"app\".\"items\" OFF").is_some());
        assert!(target.position("RESTART WITH").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(5)), item_rows(5));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;
        let token = CancellationToken::new();
        token.cancel();

        let report = migrator(&source, &target, options())
            .with_cancellation(token)
            .migrate_all(&db)
            .await;
        assert!(matches!(report.error, Some(MigrateError::Cancelled)));
        assert!(target.rows("app.items").is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_completion() {
        let source = MemoryEngine::new().with_table(items_table("items", Some(7)), item_rows(7));
        let target = MemoryEngine::new();
        let db = prepare_target(&source, &target).await;
        let (progress, mut rx) = ProgressReporter::channel();
        let m = DataMigrator::new(
            Endpoint::new(source.agent(), "source"),
            Endpoint::new(target.agent(), "target"),
            options(),
            progress,
        );
        m.migrate_all(&db).await;

        let mut last = None;
        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                ProgressEvent::TableDataProgress { .. } => last = Some(event),
                ProgressEvent::StageChanged { stage } => stages.push(stage),
                _ => {}
            }
        }
        assert_eq!(stages, vec![Stage::TableDataStart, Stage::TableDataEnd]);
        match last {
            Some(ProgressEvent::TableDataProgress {
                total,
                migrated,
                completed,
                ..
            }) => {
                assert_eq!(total, 7);
                assert_eq!(migrated, 7);
                assert!(completed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
