//! Batches rows into INSERT statements or bulk loads.

use std::mem;

use crate::core::schema::TableDescriptor;
use crate::core::traits::{Dialect, InsertStrategy, SqlExecutor, ValueRepr};
use crate::core::types::DataTypeDescriptor;
use crate::core::value::{Row, SqlValue};
use crate::error::Result;

pub(crate) struct RowWriter<'a> {
    table: &'a TableDescriptor,
    columns: Vec<String>,
    types: Vec<DataTypeDescriptor>,
    dialect: &'a dyn Dialect,
    repr: &'a dyn ValueRepr,
    strategy: InsertStrategy,
    /// Bind values as parameters; otherwise inline them as literals.
    parameters: bool,
    rows_per_write: usize,
    buffer: Vec<Row>,
    written: u64,
}

impl<'a> RowWriter<'a> {
    /// `strategy` must already be resolved (never `Default`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: &'a TableDescriptor,
        columns: Vec<String>,
        types: Vec<DataTypeDescriptor>,
        dialect: &'a dyn Dialect,
        repr: &'a dyn ValueRepr,
        strategy: InsertStrategy,
        supports_parameters: bool,
        batch_rows: usize,
    ) -> Self {
        let width = columns.len().max(1);
        let parameters = supports_parameters && width <= dialect.max_parameters();
        let rows_per_write = match strategy {
            InsertStrategy::SingleRow => 1,
            InsertStrategy::BlockCopy => batch_rows,
            InsertStrategy::BatchRow | InsertStrategy::Default => {
                let mut n = batch_rows.min(dialect.max_rows_per_insert());
                if parameters {
                    n = n.min(dialect.max_parameters() / width);
                }
                n
            }
        }
        .max(1);
        Self {
            table,
            columns,
            types,
            dialect,
            repr,
            strategy,
            parameters,
            rows_per_write,
            buffer: Vec::new(),
            written: 0,
        }
    }

    pub fn rows_per_write(&self) -> usize {
        self.rows_per_write
    }

    pub async fn push(&mut self, conn: &mut dyn SqlExecutor, rows: Vec<Row>) -> Result<()> {
        self.buffer.extend(rows);
        while self.buffer.len() >= self.rows_per_write {
            let chunk: Vec<Row> = self.buffer.drain(..self.rows_per_write).collect();
            self.write(conn, &chunk).await?;
        }
        Ok(())
    }

    /// Write what is still buffered and return the total rows written.
    pub async fn finish(&mut self, conn: &mut dyn SqlExecutor) -> Result<u64> {
        if !self.buffer.is_empty() {
            let chunk = mem::take(&mut self.buffer);
            self.write(conn, &chunk).await?;
        }
        Ok(self.written)
    }

    async fn write(&mut self, conn: &mut dyn SqlExecutor, rows: &[Row]) -> Result<()> {
        if self.strategy == InsertStrategy::BlockCopy {
            conn.bulk_copy(self.table, &self.columns, rows).await?;
        } else {
            let (sql, params) = self.insert_statement(rows)?;
            conn.execute(&sql, &params).await?;
        }
        self.written += rows.len() as u64;
        Ok(())
    }

    fn insert_statement(&self, rows: &[Row]) -> Result<(String, Vec<SqlValue>)> {
        let width = self.columns.len();
        let mut params = Vec::new();
        let mut values = Vec::with_capacity(rows.len());
        for (r, row) in rows.iter().enumerate() {
            let rendered = if self.parameters {
                params.extend(row.iter().cloned());
                (0..width)
                    .map(|c| self.dialect.param_placeholder(r * width + c + 1))
                    .collect()
            } else {
                row.iter()
                    .zip(&self.types)
                    .map(|(value, ty)| self.repr.render(value, ty))
                    .collect::<Result<Vec<_>>>()?
            };
            values.push(rendered);
        }
        let sql = self.dialect.insert_rows(self.table, &self.columns, &values)?;
        Ok((sql, params))
    }
}
