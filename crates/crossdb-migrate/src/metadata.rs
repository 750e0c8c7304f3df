//! Schema migration: read the source schema, then recreate it on the target
//! in two phases around the data load.
//!
//! PreMigrateTarget creates schemas, sequences, tables and primary keys.
//! Primary key columns are created NOT NULL; every other column starts out
//! nullable. PostMigrateTarget runs after the data load and applies NOT NULL,
//! defaults, unique constraints, indexes and finally foreign keys, which go
//! through the dependency scheduler keyed by owning table.

use tracing::{debug, error, info, warn};

use crate::core::catalog::Endpoint;
use crate::core::schema::{ColumnDescriptor, DatabaseDescriptor, TableDescriptor};
use crate::core::traits::{constraint_name, ReadSchemaOptions, SqlExecutor};
use crate::error::{MigrateError, Result};
use crate::progress::{ObjectKind, ProgressReporter, Stage};
use crate::scheduler::{self, find_cycle, SchedulerOptions, WorkItem};

#[derive(Debug, Clone)]
pub struct MetadataOptions {
    pub read: ReadSchemaOptions,
    pub create_indexes: bool,
    pub create_foreign_keys: bool,
    pub scheduler: SchedulerOptions,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            read: ReadSchemaOptions::default(),
            create_indexes: true,
            create_foreign_keys: true,
            scheduler: SchedulerOptions::default(),
        }
    }
}

/// Fail with `UnsupportedSchema` when foreign keys form a cycle between
/// distinct tables. Self-references are fine.
pub fn check_foreign_key_cycles(db: &DatabaseDescriptor) -> Result<()> {
    let graph: Vec<(String, Vec<String>)> = db
        .tables
        .iter()
        .map(|t| (t.full_name(), t.dependencies()))
        .collect();
    match find_cycle(&graph) {
        Some(cycle) => Err(MigrateError::UnsupportedSchema(format!(
            "foreign key cycle between tables {}",
            cycle.join(" -> ")
        ))),
        None => Ok(()),
    }
}

async fn execute(conn: &mut dyn SqlExecutor, sql: &str, object: &str) -> Result<()> {
    debug!("{}", sql);
    if let Err(e) = conn.execute(sql, &[]).await {
        error!("Failed creating {}: {}\n  Statement: {}", object, e, sql);
        return Err(e);
    }
    Ok(())
}

pub struct MetadataMigrator {
    source: Endpoint,
    target: Endpoint,
    options: MetadataOptions,
    progress: ProgressReporter,
}

impl MetadataMigrator {
    pub fn new(
        source: Endpoint,
        target: Endpoint,
        options: MetadataOptions,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            source,
            target,
            options,
            progress,
        }
    }

    /// ReadSource: introspect the source into a fresh descriptor.
    pub async fn read_source(&self) -> Result<DatabaseDescriptor> {
        let mut conn = self.source.connect().await?;
        let db = self
            .source
            .agent
            .schema_reader
            .read_database(conn.as_mut(), &self.options.read)
            .await?;
        db.validate()?;
        info!(
            "Read {} tables and {} sequences from {} source",
            db.tables.len(),
            db.sequences.len(),
            self.source.engine()
        );
        Ok(db)
    }

    fn native_type(&self, table: &TableDescriptor, column: &ColumnDescriptor) -> Result<String> {
        self.target
            .agent
            .types
            .to_native(&column.data_type)
            .map_err(|e| e.at(table.column_location(&column.name)))
    }

    /// PreMigrateTarget: schemas, sequences, tables, primary keys.
    pub async fn pre_migrate(&self, db: &DatabaseDescriptor) -> Result<()> {
        self.progress.stage(Stage::PreMetaStart);
        let dialect = self.target.dialect();
        let mut conn = self.target.connect().await?;

        if dialect.supports_schemas() {
            for schema in db.schemas() {
                execute(conn.as_mut(), &dialect.create_schema(&schema)?, &schema).await?;
                self.progress.object(ObjectKind::Schema, schema, None);
            }
        }

        for sequence in &db.sequences {
            let name = sequence.full_name();
            let native = self
                .target
                .agent
                .types
                .to_native(&sequence.data_type)
                .map_err(|e| e.at(name.as_str()))?;
            execute(conn.as_mut(), &dialect.create_sequence(sequence, &native)?, &name).await?;
            self.progress.object(ObjectKind::Sequence, name, None);
        }

        for table in &db.tables {
            self.create_table(conn.as_mut(), table).await?;
        }

        for table in &db.tables {
            let Some(pk) = &table.primary_key else {
                continue;
            };
            let name = pk
                .name
                .clone()
                .unwrap_or_else(|| constraint_name("pk", &table.name, &[]));
            execute(conn.as_mut(), &dialect.add_primary_key(table, pk)?, &name).await?;
            self.progress
                .object(ObjectKind::PrimaryKey, name, Some(table.full_name()));
        }

        info!("Created {} tables on {} target", db.tables.len(), self.target.engine());
        self.progress.stage(Stage::PreMetaEnd);
        Ok(())
    }

    async fn create_table(&self, conn: &mut dyn SqlExecutor, table: &TableDescriptor) -> Result<()> {
        let dialect = self.target.dialect();
        let definitions = table
            .columns
            .iter()
            .map(|col| {
                let native = self.native_type(table, col)?;
                let nullable = !(col.is_identity || table.is_primary_key_column(&col.name));
                dialect.column_definition(col, &native, nullable)
            })
            .collect::<Result<Vec<_>>>()?;

        let full_name = table.full_name();
        execute(conn, &dialect.create_table(table, &definitions)?, &full_name).await?;
        if let Some(comment) = &table.comment {
            if let Some(sql) = dialect.comment_on_table(table, comment)? {
                execute(conn, &sql, &full_name).await?;
            }
        }
        self.progress.object(ObjectKind::Table, full_name, None);
        Ok(())
    }

    /// PostMigrateTarget: NOT NULL, defaults, unique constraints, indexes,
    /// then foreign keys.
    pub async fn post_migrate(&self, db: &DatabaseDescriptor) -> Result<()> {
        self.progress.stage(Stage::PostMetaStart);
        let dialect = self.target.dialect();
        let mut conn = self.target.connect().await?;

        for table in &db.tables {
            for col in table.data_columns() {
                if col.is_nullable || col.is_identity || table.is_primary_key_column(&col.name) {
                    continue;
                }
                let native = self.native_type(table, col)?;
                let location = table.column_location(&col.name);
                execute(conn.as_mut(), &dialect.set_not_null(table, col, &native)?, &location)
                    .await?;
                self.progress
                    .object(ObjectKind::NotNull, location, Some(table.full_name()));
            }
        }

        for table in &db.tables {
            self.apply_defaults(conn.as_mut(), table).await?;
        }

        for table in &db.tables {
            for unique in &table.uniques {
                let name = unique
                    .name
                    .clone()
                    .unwrap_or_else(|| constraint_name("uq", &table.name, &unique.columns));
                execute(conn.as_mut(), &dialect.add_unique(table, unique)?, &name).await?;
                self.progress
                    .object(ObjectKind::Unique, name, Some(table.full_name()));
            }
        }

        if self.options.create_indexes {
            for table in &db.tables {
                for index in &table.indexes {
                    let name = index
                        .name
                        .clone()
                        .unwrap_or_else(|| constraint_name("ix", &table.name, &index.columns));
                    execute(conn.as_mut(), &dialect.create_index(table, index)?, &name).await?;
                    self.progress
                        .object(ObjectKind::Index, name, Some(table.full_name()));
                }
            }
        }
        drop(conn);

        if self.options.create_foreign_keys {
            self.create_foreign_keys(db).await?;
        }

        self.progress.stage(Stage::PostMetaEnd);
        Ok(())
    }

    async fn apply_defaults(&self, conn: &mut dyn SqlExecutor, table: &TableDescriptor) -> Result<()> {
        let dialect = self.target.dialect();
        for col in table.data_columns() {
            let Some(default) = &col.default_value else {
                continue;
            };
            let location = table.column_location(&col.name);
            let sql = match self.target.agent.expressions.from_canonical(default, &col.data_type) {
                Ok(sql) => sql,
                Err(
                    e @ (MigrateError::UnsupportedExpression { .. }
                    | MigrateError::UnsupportedValue { .. }),
                ) => {
                    warn!("{}; column migrated without a default", e.at(location.as_str()));
                    continue;
                }
                Err(e) => return Err(e.at(location)),
            };
            execute(conn, &dialect.set_default(table, col, &sql)?, &location).await?;
            self.progress
                .object(ObjectKind::Default, location, Some(table.full_name()));
        }
        Ok(())
    }

    async fn create_foreign_keys(&self, db: &DatabaseDescriptor) -> Result<()> {
        check_foreign_key_cycles(db)?;
        let items: Vec<WorkItem<TableDescriptor>> = db
            .tables
            .iter()
            .filter(|t| !t.foreign_keys.is_empty())
            .map(|t| WorkItem::new(t.full_name(), t.dependencies(), t.clone()))
            .collect();
        info!("Creating foreign keys for {} tables", items.len());

        let target = self.target.clone();
        let progress = self.progress.clone();
        scheduler::run_all(items, &self.options.scheduler, move |table: TableDescriptor| {
            let target = target.clone();
            let progress = progress.clone();
            async move {
                let mut conn = target.connect().await?;
                let owner = table.full_name();
                for fk in &table.foreign_keys {
                    let name = fk
                        .name
                        .clone()
                        .unwrap_or_else(|| constraint_name("fk", &table.name, &fk.columns));
                    let sql = target.dialect().add_foreign_key(&table, fk)?;
                    execute(conn.as_mut(), &sql, &name).await?;
                    progress.object(ObjectKind::ForeignKey, name, Some(owner.clone()));
                }
                Ok(())
            }
        })
        .await
    }
}
