//! In-memory engine for tests.
//!
//! [`MemoryEngine`] understands the statements produced by [`MemoryDialect`]
//! (PostgreSQL syntax, plus `SET IDENTITY_INSERT` around explicit identity
//! values). Explicit identity values are rejected unless identity insert is
//! on, and generation never moves past explicit values on its own, so tests
//! can observe whether a reseed happened.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::catalog::DbAgent;
use crate::core::schema::{
    ColumnDescriptor, DatabaseDescriptor, IndexDescriptor, SequenceDescriptor, TableDescriptor,
};
use crate::core::traits::{
    ConnectionProvider, DatabaseLifecycle, Dialect, InsertStrategy, ReadSchemaOptions,
    SchemaReader, SqlExecutor,
};
use crate::core::value::{QueryResult, Row, SqlValue};
use crate::drivers::postgres::{PostgresDialect, PostgresExpressions, PostgresRepr, PostgresTypes};
use crate::error::{MigrateError, Result};

/// `Write` target whose contents stay readable after the writer moves away.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// PostgreSQL syntax with MSSQL-style identity insert switching.
#[derive(Debug, Clone)]
pub struct MemoryDialect {
    inner: PostgresDialect,
    pub max_parameters: usize,
    pub max_rows_per_insert: usize,
    pub preferred: InsertStrategy,
}

impl Default for MemoryDialect {
    fn default() -> Self {
        Self {
            inner: PostgresDialect::new(),
            max_parameters: 2100,
            max_rows_per_insert: 1000,
            preferred: InsertStrategy::BatchRow,
        }
    }
}

impl Dialect for MemoryDialect {
    fn name(&self) -> &str {
        "memory"
    }

    fn default_separator(&self) -> &str {
        "GO"
    }

    fn max_parameters(&self) -> usize {
        self.max_parameters
    }

    fn max_rows_per_insert(&self) -> usize {
        self.max_rows_per_insert
    }

    fn preferred_strategy(&self) -> InsertStrategy {
        self.preferred
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        self.inner.quote_ident(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        self.inner.param_placeholder(index)
    }

    fn create_schema(&self, schema: &str) -> Result<String> {
        self.inner.create_schema(schema)
    }

    fn column_definition(
        &self,
        column: &ColumnDescriptor,
        native_type: &str,
        nullable: bool,
    ) -> Result<String> {
        self.inner.column_definition(column, native_type, nullable)
    }

    fn comment_on_table(&self, table: &TableDescriptor, comment: &str) -> Result<Option<String>> {
        self.inner.comment_on_table(table, comment)
    }

    fn set_not_null(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        native_type: &str,
    ) -> Result<String> {
        self.inner.set_not_null(table, column, native_type)
    }

    fn set_default(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        default_sql: &str,
    ) -> Result<String> {
        self.inner.set_default(table, column, default_sql)
    }

    fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<String> {
        self.inner.create_index(table, index)
    }

    fn create_sequence(&self, sequence: &SequenceDescriptor, native_type: &str) -> Result<String> {
        self.inner.create_sequence(sequence, native_type)
    }

    fn disable_identity(&self, table: &TableDescriptor) -> Result<Option<String>> {
        Ok(Some(format!("SET IDENTITY_INSERT {} ON", self.qualified_table(table)?)))
    }

    fn enable_identity(&self, table: &TableDescriptor) -> Result<Option<String>> {
        Ok(Some(format!("SET IDENTITY_INSERT {} OFF", self.qualified_table(table)?)))
    }

    fn reseed_identity(
        &self,
        table: &TableDescriptor,
        column: &ColumnDescriptor,
        next_value: i64,
        rows_written: bool,
    ) -> Result<String> {
        self.inner.reseed_identity(table, column, next_value, rows_written)
    }

    fn select_page(
        &self,
        table: &TableDescriptor,
        columns: &[String],
        order_by: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<String> {
        self.inner.select_page(table, columns, order_by, offset, limit)
    }
}

#[derive(Debug, Clone)]
struct MemIdentity {
    column: String,
    next: i64,
    increment: i64,
}

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    identity: Option<MemIdentity>,
    identity_insert: bool,
}

impl MemTable {
    fn from_descriptor(table: &TableDescriptor, rows: Vec<Row>) -> Self {
        Self {
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            rows,
            identity: table.identity_column().and_then(|c| {
                c.identity.map(|info| MemIdentity {
                    column: c.name.clone(),
                    next: info.next_value(),
                    increment: info.increment_by,
                })
            }),
            identity_insert: false,
        }
    }

    fn index_of(&self, table: &str, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| MigrateError::transfer(table, format!("no column {}", column)))
    }

    fn insert(&mut self, table: &str, columns: &[String], rows: Vec<Row>) -> Result<u64> {
        let positions = columns
            .iter()
            .map(|c| self.index_of(table, c))
            .collect::<Result<Vec<_>>>()?;
        let count = rows.len() as u64;
        for values in rows {
            let mut row = vec![SqlValue::Null; self.columns.len()];
            for (pos, value) in positions.iter().zip(values) {
                row[*pos] = value;
            }
            if let Some(identity) = &mut self.identity {
                let pos = self
                    .columns
                    .iter()
                    .position(|c| *c == identity.column)
                    .unwrap_or(0);
                if columns.contains(&identity.column) {
                    if !self.identity_insert {
                        return Err(MigrateError::transfer(
                            table,
                            "explicit value for identity column while IDENTITY_INSERT is OFF",
                        ));
                    }
                } else {
                    row[pos] = SqlValue::I64(identity.next);
                    identity.next += identity.increment;
                }
            }
            self.rows.push(row);
        }
        Ok(count)
    }
}

#[derive(Default)]
struct MemoryState {
    descriptor: DatabaseDescriptor,
    tables: BTreeMap<String, MemTable>,
    schemas: BTreeSet<String>,
    log: Vec<String>,
    pages: Vec<(String, u64, usize)>,
    fail_on: Option<String>,
    bulk_copy: bool,
    bulk_loads: usize,
}

/// Shared in-memory database. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
    dialect: Arc<MemoryDialect>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(dialect: MemoryDialect) -> Self {
        Self {
            state: Arc::default(),
            dialect: Arc::new(dialect),
        }
    }

    /// Register a table visible to the schema reader, with its rows.
    pub fn with_table(self, table: TableDescriptor, rows: Vec<Row>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .tables
                .insert(table.full_name(), MemTable::from_descriptor(&table, rows));
            state.descriptor.tables.push(table);
        }
        self
    }

    pub fn with_sequence(self, sequence: SequenceDescriptor) -> Self {
        self.state.lock().unwrap().descriptor.sequences.push(sequence);
        self
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.state.lock().unwrap().fail_on = Some(pattern.to_string());
        self
    }

    pub fn with_bulk_copy(self) -> Self {
        self.state.lock().unwrap().bulk_copy = true;
        self
    }

    pub fn executor(&self) -> MemoryExecutor {
        MemoryExecutor {
            engine: self.clone(),
        }
    }

    pub fn agent(&self) -> DbAgent {
        let types = Arc::new(PostgresTypes);
        let expressions = Arc::new(PostgresExpressions::new());
        DbAgent {
            engine: "memory".to_string(),
            types,
            expressions,
            repr: Arc::new(PostgresRepr),
            dialect: self.dialect.clone(),
            schema_reader: Arc::new(self.clone()),
            connections: Arc::new(self.clone()),
            lifecycle: Arc::new(self.clone()),
        }
    }

    /// Executed statements in order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Position of the first logged statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.log().iter().position(|s| s.contains(needle))
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(table)
    }

    pub fn schemas(&self) -> Vec<String> {
        self.state.lock().unwrap().schemas.iter().cloned().collect()
    }

    /// Requested page sizes and returned row counts for `table`.
    pub fn pages(&self, table: &str) -> Vec<(u64, usize)> {
        self.state
            .lock()
            .unwrap()
            .pages
            .iter()
            .filter(|(t, _, _)| t == table)
            .map(|(_, limit, returned)| (*limit, *returned))
            .collect()
    }

    pub fn bulk_loads(&self) -> usize {
        self.state.lock().unwrap().bulk_loads
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let mut state = self.state.lock().unwrap();
        if let Some(pattern) = &state.fail_on {
            if sql.contains(pattern.as_str()) {
                return Err(MigrateError::Script(format!("injected failure: {}", sql)));
            }
        }
        let result = Parser::new(sql)?.statement(&mut state, params)?;
        state.log.push(sql.to_string());
        Ok(result)
    }
}

#[async_trait]
impl ConnectionProvider for MemoryEngine {
    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        Ok(Box::new(self.executor()))
    }

    fn with_database(&self, connection_string: &str, database: &str) -> Result<String> {
        Ok(format!("{};database={}", connection_string, database))
    }

    fn database_name(&self, connection_string: &str) -> Result<Option<String>> {
        Ok(connection_string
            .split(';')
            .find_map(|part| part.strip_prefix("database="))
            .map(str::to_string))
    }
}

#[async_trait]
impl DatabaseLifecycle for MemoryEngine {
    async fn create_database(&self, _connection_string: &str, name: &str) -> Result<()> {
        self.state.lock().unwrap().log.push(format!("CREATE DATABASE {}", name));
        Ok(())
    }

    async fn drop_database_if_exists(&self, _connection_string: &str, name: &str) -> Result<()> {
        self.state.lock().unwrap().log.push(format!("DROP DATABASE IF EXISTS {}", name));
        Ok(())
    }
}

#[async_trait]
impl SchemaReader for MemoryEngine {
    async fn read_database(
        &self,
        _conn: &mut dyn SqlExecutor,
        options: &ReadSchemaOptions,
    ) -> Result<DatabaseDescriptor> {
        let mut db = self.state.lock().unwrap().descriptor.clone();
        if !options.schemas.is_empty() {
            db.tables
                .retain(|t| t.schema.as_ref().map_or(true, |s| options.schemas.contains(s)));
        }
        Ok(db)
    }
}

pub struct MemoryExecutor {
    engine: MemoryEngine,
}

#[async_trait]
impl SqlExecutor for MemoryExecutor {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let result = self.engine.run(sql, params)?;
        Ok(result.scalar().and_then(SqlValue::as_i64).unwrap_or(0) as u64)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.engine.run(sql, params)
    }

    fn supports_bulk_copy(&self, _table: &TableDescriptor) -> bool {
        self.engine.state.lock().unwrap().bulk_copy
    }

    async fn bulk_copy(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let mut state = self.engine.state.lock().unwrap();
        state.bulk_loads += 1;
        let name = table.full_name();
        let target = state
            .tables
            .get_mut(&name)
            .ok_or_else(|| MigrateError::transfer(&name, "no such table"))?;
        let saved = target.identity_insert;
        target.identity_insert = true;
        let result = target.insert(&name, columns, rows.to_vec());
        target.identity_insert = saved;
        result
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    Str(String),
    Num(String),
    Param(usize),
    Punct(char),
}

fn syntax(sql: &str) -> MigrateError {
    MigrateError::Script(format!("memory engine cannot parse: {}", sql))
}

fn lex(sql: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(syntax(sql)),
                    Some(&q) if q == c => {
                        if chars.get(i + 1) == Some(&c) {
                            text.push(c);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&other) => {
                        text.push(other);
                        i += 1;
                    }
                }
            }
            out.push(if c == '"' { Tok::Quoted(text) } else { Tok::Str(text) });
        } else if c == '$' && chars.get(i + 1).map_or(false, char::is_ascii_digit) {
            let start = i + 1;
            i += 1;
            while chars.get(i).map_or(false, char::is_ascii_digit) {
                i += 1;
            }
            let n: String = chars[start..i].iter().collect();
            out.push(Tok::Param(n.parse().map_err(|_| syntax(sql))?));
        } else if c.is_ascii_digit() {
            let start = i;
            while chars.get(i).map_or(false, |d| d.is_ascii_digit() || *d == '.') {
                i += 1;
            }
            out.push(Tok::Num(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while chars.get(i).map_or(false, |d| d.is_alphanumeric() || *d == '_') {
                i += 1;
            }
            out.push(Tok::Word(chars[start..i].iter().collect()));
        } else {
            out.push(Tok::Punct(c));
            i += 1;
        }
    }
    Ok(out)
}

fn compare(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Greater,
        (_, SqlValue::Null) => Ordering::Less,
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

struct Parser<'a> {
    sql: &'a str,
    toks: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Result<Self> {
        Ok(Self {
            sql,
            toks: lex(sql)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok> {
        let tok = self.toks.get(self.pos).cloned().ok_or_else(|| syntax(self.sql))?;
        self.pos += 1;
        Ok(tok)
    }

    fn keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, word: &str) -> Result<()> {
        if self.keyword(word) {
            Ok(())
        } else {
            Err(syntax(self.sql))
        }
    }

    fn punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Tok::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if self.punct(c) {
            Ok(())
        } else {
            Err(syntax(self.sql))
        }
    }

    fn name(&mut self) -> Result<String> {
        match self.next()? {
            Tok::Word(w) | Tok::Quoted(w) => Ok(w),
            _ => Err(syntax(self.sql)),
        }
    }

    fn qualified(&mut self) -> Result<String> {
        let mut name = self.name()?;
        while self.punct('.') {
            name = format!("{}.{}", name, self.name()?);
        }
        Ok(name)
    }

    fn names(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.name()?];
        while self.punct(',') {
            names.push(self.name()?);
        }
        Ok(names)
    }

    fn integer(&mut self) -> Result<i64> {
        let negative = self.punct('-');
        match self.next()? {
            Tok::Num(n) => {
                let v: i64 = n.parse().map_err(|_| syntax(self.sql))?;
                Ok(if negative { -v } else { v })
            }
            _ => Err(syntax(self.sql)),
        }
    }

    fn literal(&mut self, params: &[SqlValue]) -> Result<SqlValue> {
        let value = match self.next()? {
            Tok::Param(n) => params.get(n - 1).cloned().ok_or_else(|| syntax(self.sql))?,
            Tok::Str(s) => SqlValue::Text(s),
            Tok::Num(n) => match n.parse::<i64>() {
                Ok(v) => SqlValue::I64(v),
                Err(_) => SqlValue::F64(n.parse().map_err(|_| syntax(self.sql))?),
            },
            Tok::Punct('-') => match self.literal(params)? {
                SqlValue::I64(v) => SqlValue::I64(-v),
                SqlValue::F64(v) => SqlValue::F64(-v),
                _ => return Err(syntax(self.sql)),
            },
            Tok::Word(w) if w.eq_ignore_ascii_case("null") => SqlValue::Null,
            Tok::Word(w) if w.eq_ignore_ascii_case("true") => SqlValue::Bool(true),
            Tok::Word(w) if w.eq_ignore_ascii_case("false") => SqlValue::Bool(false),
            _ => return Err(syntax(self.sql)),
        };
        if self.punct(':') {
            self.expect_punct(':')?;
            self.name()?;
        }
        Ok(value)
    }

    fn statement(&mut self, state: &mut MemoryState, params: &[SqlValue]) -> Result<QueryResult> {
        let empty = || QueryResult::new(Vec::new(), Vec::new());
        if self.keyword("SELECT") {
            return self.select(state);
        }
        if self.keyword("INSERT") {
            self.expect("INTO")?;
            let table = self.qualified()?;
            self.expect_punct('(')?;
            let columns = self.names()?;
            self.expect_punct(')')?;
            self.expect("VALUES")?;
            let mut rows = Vec::new();
            loop {
                self.expect_punct('(')?;
                let mut row = vec![self.literal(params)?];
                while self.punct(',') {
                    row.push(self.literal(params)?);
                }
                self.expect_punct(')')?;
                rows.push(row);
                if !self.punct(',') {
                    break;
                }
            }
            let target = state
                .tables
                .get_mut(&table)
                .ok_or_else(|| MigrateError::transfer(&table, "no such table"))?;
            let count = target.insert(&table, &columns, rows)?;
            return Ok(QueryResult::new(vec!["count".into()], vec![vec![SqlValue::I64(count as i64)]]));
        }
        if self.keyword("SET") {
            self.expect("IDENTITY_INSERT")?;
            let table = self.qualified()?;
            let on = self.keyword("ON");
            let target = state.tables.get_mut(&table).ok_or_else(|| syntax(self.sql))?;
            target.identity_insert = on;
            return Ok(empty());
        }
        if self.keyword("CREATE") {
            if self.keyword("SCHEMA") {
                if self.keyword("IF") {
                    self.expect("NOT")?;
                    self.expect("EXISTS")?;
                }
                let schema = self.name()?;
                state.schemas.insert(schema);
                return Ok(empty());
            }
            if self.keyword("TABLE") {
                let table = self.qualified()?;
                if state.tables.contains_key(&table) {
                    return Err(MigrateError::transfer(&table, "table already exists"));
                }
                let created = self.table_body()?;
                state.tables.insert(table, created);
                return Ok(empty());
            }
            if self.keyword("INDEX") || self.keyword("UNIQUE") || self.keyword("SEQUENCE") {
                return Ok(empty());
            }
            return Err(syntax(self.sql));
        }
        if self.keyword("ALTER") {
            self.expect("TABLE")?;
            let table = self.qualified()?;
            if !state.tables.contains_key(&table) {
                return Err(MigrateError::transfer(&table, "no such table"));
            }
            if self.keyword("ALTER") {
                self.expect("COLUMN")?;
                let column = self.name()?;
                if self.keyword("RESTART") {
                    self.expect("WITH")?;
                    let next = self.integer()?;
                    if let Some(identity) = state
                        .tables
                        .get_mut(&table)
                        .and_then(|t| t.identity.as_mut())
                        .filter(|i| i.column == column)
                    {
                        identity.next = next;
                    }
                }
            }
            return Ok(empty());
        }
        if self.keyword("COMMENT") {
            return Ok(empty());
        }
        Err(syntax(self.sql))
    }

    fn select(&mut self, state: &mut MemoryState) -> Result<QueryResult> {
        if let Some(Tok::Num(_)) = self.peek() {
            let v = self.integer()?;
            return Ok(QueryResult::new(vec!["?column?".into()], vec![vec![SqlValue::I32(v as i32)]]));
        }
        if self.keyword("COUNT") {
            self.expect_punct('(')?;
            self.expect_punct('*')?;
            self.expect_punct(')')?;
            self.expect("FROM")?;
            let table = self.qualified()?;
            let t = state
                .tables
                .get(&table)
                .ok_or_else(|| MigrateError::transfer(&table, "no such table"))?;
            return Ok(QueryResult::new(
                vec!["count".into()],
                vec![vec![SqlValue::I64(t.rows.len() as i64)]],
            ));
        }
        let columns = self.names()?;
        self.expect("FROM")?;
        let table = self.qualified()?;
        let order = if self.keyword("ORDER") {
            self.expect("BY")?;
            self.names()?
        } else {
            Vec::new()
        };
        self.expect("LIMIT")?;
        let limit = self.integer()? as u64;
        self.expect("OFFSET")?;
        let offset = self.integer()? as usize;

        let t = state
            .tables
            .get(&table)
            .ok_or_else(|| MigrateError::transfer(&table, "no such table"))?;
        let order = order
            .iter()
            .map(|c| t.index_of(&table, c))
            .collect::<Result<Vec<_>>>()?;
        let projection = columns
            .iter()
            .map(|c| t.index_of(&table, c))
            .collect::<Result<Vec<_>>>()?;
        let mut rows = t.rows.clone();
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|&i| compare(&a[i], &b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        let page: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|r| projection.iter().map(|&i| r[i].clone()).collect())
            .collect();
        state.pages.push((table, limit, page.len()));
        Ok(QueryResult::new(columns, page))
    }

    fn table_body(&mut self) -> Result<MemTable> {
        self.expect_punct('(')?;
        let mut table = MemTable::default();
        loop {
            let column = self.name()?;
            let mut depth = 0usize;
            let mut clause = Vec::new();
            loop {
                match self.peek() {
                    Some(Tok::Punct('(')) => depth += 1,
                    Some(Tok::Punct(')')) if depth == 0 => break,
                    Some(Tok::Punct(')')) => depth -= 1,
                    Some(Tok::Punct(',')) if depth == 0 => break,
                    None => return Err(syntax(self.sql)),
                    _ => {}
                }
                clause.push(self.next()?);
            }
            let word_at = |w: &str| {
                clause
                    .iter()
                    .position(|t| matches!(t, Tok::Word(x) if x.eq_ignore_ascii_case(w)))
            };
            let number_after = |i: usize| -> Option<i64> {
                let (negative, at) = match clause.get(i) {
                    Some(Tok::Punct('-')) => (true, i + 1),
                    _ => (false, i),
                };
                match clause.get(at) {
                    Some(Tok::Num(n)) => n.parse::<i64>().ok().map(|v| if negative { -v } else { v }),
                    _ => None,
                }
            };
            if word_at("IDENTITY").is_some() {
                let start = word_at("START").and_then(|i| number_after(i + 2)).unwrap_or(1);
                let increment = word_at("INCREMENT").and_then(|i| number_after(i + 2)).unwrap_or(1);
                table.identity = Some(MemIdentity {
                    column: column.clone(),
                    next: start,
                    increment,
                });
            }
            table.columns.push(column);
            if self.punct(')') {
                return Ok(table);
            }
            self.expect_punct(',')?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::IdentityInfo;
    use crate::core::types::DataTypeDescriptor;

    #[tokio::test]
    async fn test_identity_insert_is_enforced() {
        let engine = MemoryEngine::new();
        let mut conn = engine.executor();
        conn.execute(
            "CREATE TABLE \"t\" (\n \"id\" integer GENERATED BY DEFAULT AS IDENTITY (START WITH 1 INCREMENT BY 1) NOT NULL,\n \"v\" text\n)",
            &[],
        )
        .await
        .unwrap();
        assert!(conn
            .execute("INSERT INTO \"t\" (\"id\", \"v\") VALUES ($1, $2)", &[SqlValue::I32(7), "a".into()])
            .await
            .is_err());
        conn.execute("SET IDENTITY_INSERT \"t\" ON", &[]).await.unwrap();
        conn.execute("INSERT INTO \"t\" (\"id\", \"v\") VALUES (7, 'it''s')", &[])
            .await
            .unwrap();
        conn.execute("SET IDENTITY_INSERT \"t\" OFF", &[]).await.unwrap();
        conn.execute("INSERT INTO \"t\" (\"v\") VALUES ('b')", &[]).await.unwrap();
        let rows = engine.rows("t");
        assert_eq!(rows[0], vec![SqlValue::I64(7), SqlValue::Text("it's".into())]);
        assert_eq!(rows[1][0], SqlValue::I64(1));
    }

    #[tokio::test]
    async fn test_pages_are_ordered_and_recorded() {
        let mut table = TableDescriptor::new(None, "n");
        table.columns.push(
            ColumnDescriptor::new("id", DataTypeDescriptor::int(), false)
                .with_identity(IdentityInfo::new(1, 1, Some(3))),
        );
        let engine = MemoryEngine::new().with_table(
            table,
            vec![vec![SqlValue::I32(3)], vec![SqlValue::I32(1)], vec![SqlValue::I32(2)]],
        );
        let mut conn = engine.executor();
        let page = conn
            .query("SELECT \"id\" FROM \"n\" ORDER BY \"id\" LIMIT 2 OFFSET 1", &[])
            .await
            .unwrap();
        assert_eq!(page.rows, vec![vec![SqlValue::I32(2)], vec![SqlValue::I32(3)]]);
        assert_eq!(engine.pages("n"), vec![(2, 2)]);
    }
}
