//! PostgreSQL connections: pooled executors, parameter binding, COPY loads and
//! database lifecycle.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use regex::Regex;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::identifier::quote_pg;
use crate::core::schema::TableDescriptor;
use crate::core::traits::{ConnectionProvider, DatabaseLifecycle, SqlExecutor};
use crate::core::value::{is_wide_numeric, QueryResult, Row, SqlValue};
use crate::drivers::common::tls::{split_ssl_mode, SslMode, TlsBuilder};
use crate::error::{MigrateError, Result};
use crate::translate::repr::{format_datetime, format_datetime_offset, format_time};

/// Database used for CREATE/DROP DATABASE.
const MAINTENANCE_DATABASE: &str = "postgres";

/// Rows buffered before each COPY send.
const COPY_CHUNK_ROWS: usize = 10_000;

type BoxError = Box<dyn StdError + Sync + Send>;

/// Opens pooled connections, one deadpool pool per connection string.
pub struct PgConnectionProvider {
    pools: Mutex<HashMap<String, Pool>>,
    max_size: usize,
}

impl PgConnectionProvider {
    pub fn new(max_size: usize) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
        }
    }

    async fn pool(&self, connection_string: &str) -> Result<Pool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(connection_string) {
            return Ok(pool.clone());
        }
        let pool = build_pool(connection_string, self.max_size, true)?;
        pools.insert(connection_string.to_string(), pool.clone());
        Ok(pool)
    }

    /// Replace the pool for `connection_string` with a plain TCP one.
    async fn plaintext_pool(&self, connection_string: &str) -> Result<Pool> {
        let pool = build_pool(connection_string, self.max_size, false)?;
        if let Some(old) = self
            .pools
            .lock()
            .await
            .insert(connection_string.to_string(), pool.clone())
        {
            old.close();
        }
        Ok(pool)
    }

    /// Close and forget pools connected to `database`.
    async fn evict(&self, database: &str) {
        let mut pools = self.pools.lock().await;
        pools.retain(|cs, pool| {
            let keep = database_of(cs).as_deref() != Some(database);
            if !keep {
                pool.close();
            }
            keep
        });
    }
}

impl Default for PgConnectionProvider {
    fn default() -> Self {
        Self::new(16)
    }
}

fn parse_config(connection_string: &str) -> Result<(PgConfig, SslMode)> {
    let (rest, ssl_mode) = split_ssl_mode(connection_string)?;
    let config = rest
        .parse::<PgConfig>()
        .map_err(|e| MigrateError::Config(format!("Invalid PostgreSQL connection string: {}", e)))?;
    Ok((config, ssl_mode))
}

fn build_pool(connection_string: &str, max_size: usize, use_tls: bool) -> Result<Pool> {
    let (pg_config, ssl_mode) = parse_config(connection_string)?;
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let connector = if use_tls {
        TlsBuilder::new(ssl_mode).build()?
    } else {
        None
    };
    let pool = match connector {
        Some(connector) => {
            let mgr = Manager::from_config(pg_config, connector, mgr_config);
            Pool::builder(mgr).max_size(max_size).build()
        }
        None => {
            let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
            Pool::builder(mgr).max_size(max_size).build()
        }
    };
    pool.map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))
}

/// `sslmode=prefer`: a failed TLS connection is retried without TLS.
fn falls_back_to_plaintext(connection_string: &str) -> bool {
    matches!(split_ssl_mode(connection_string), Ok((_, SslMode::Prefer)))
}

fn database_of(connection_string: &str) -> Option<String> {
    parse_config(connection_string)
        .ok()
        .and_then(|(c, _)| c.get_dbname().map(str::to_string))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(postgres(?:ql)?://[^/?]*)(/[^?]*)?(\?.*)?$").expect("valid url regex")
    })
}

fn dbname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(^|\s)dbname\s*=\s*('(?:[^'\\]|\\.)*'|\S+)").expect("valid dbname regex")
    })
}

fn percent_encode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

fn keyword_value(s: &str) -> String {
    if !s.is_empty() && !s.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\') {
        return s.to_string();
    }
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Point a URL or key/value connection string at another database.
pub fn with_database(connection_string: &str, database: &str) -> Result<String> {
    let cs = connection_string.trim();
    if let Some(caps) = url_regex().captures(cs) {
        let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let query = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        return Ok(format!("{}/{}{}", base, percent_encode(database), query));
    }
    if cs.contains("://") {
        return Err(MigrateError::Config(format!(
            "Unsupported PostgreSQL connection URL scheme in '{}'",
            cs
        )));
    }
    let value = keyword_value(database);
    if dbname_regex().is_match(cs) {
        Ok(dbname_regex()
            .replace(cs, |caps: &regex::Captures| {
                format!("{}dbname={}", &caps[1], value)
            })
            .into_owned())
    } else if cs.is_empty() {
        Ok(format!("dbname={}", value))
    } else {
        Ok(format!("{} dbname={}", cs, value))
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        let pool = self.pool(connection_string).await?;
        let client = match pool.get().await {
            Ok(client) => client,
            Err(e) if falls_back_to_plaintext(connection_string) => {
                warn!("TLS connection failed ({}); sslmode=prefer retries over plain TCP", e);
                self.plaintext_pool(connection_string)
                    .await?
                    .get()
                    .await
                    .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))?
            }
            Err(e) => return Err(MigrateError::pool(e, "getting PostgreSQL connection")),
        };
        Ok(Box::new(PgExecutor { client }))
    }

    fn with_database(&self, connection_string: &str, database: &str) -> Result<String> {
        with_database(connection_string, database)
    }

    fn database_name(&self, connection_string: &str) -> Result<Option<String>> {
        let (config, _) = parse_config(connection_string)?;
        Ok(config.get_dbname().map(str::to_string))
    }
}

/// One pooled PostgreSQL connection.
pub struct PgExecutor {
    client: Object,
}

impl PgExecutor {
    async fn run_query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let bound: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let statement = self.client.prepare(sql).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = self.client.query(&statement, &refs).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for (idx, column) in row.columns().iter().enumerate() {
                values.push(read_value(row, idx, column.type_())?);
            }
            out.push(values);
        }
        Ok(QueryResult::new(columns, out))
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        if params.is_empty() {
            // Simple protocol: allows multi-statement text and utility commands.
            self.client.batch_execute(sql).await?;
            return Ok(0);
        }
        let bound: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        Ok(self.client.execute(sql, &refs).await?)
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.run_query(sql, params).await
    }

    fn supports_bulk_copy(&self, _table: &TableDescriptor) -> bool {
        true
    }

    async fn bulk_copy(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let table_name = table.full_name();
        let qualified = match &table.schema {
            Some(s) => format!("{}.{}", quote_pg(s)?, quote_pg(&table.name)?),
            None => quote_pg(&table.name)?,
        };
        let column_list = columns
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualified, column_list
        );

        let sink = self.client.copy_in(copy_stmt.as_str()).await?;
        tokio::pin!(sink);

        let mut buf = BytesMut::with_capacity(1024 * 1024);
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    buf.put_u8(b'\t');
                }
                buf.extend_from_slice(copy_text(value).as_bytes());
            }
            buf.put_u8(b'\n');

            if (i + 1) % COPY_CHUNK_ROWS == 0 || i + 1 == rows.len() {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| MigrateError::transfer(&table_name, format!("COPY send failed: {}", e)))?;
            }
        }

        let copied = sink.finish().await?;
        debug!("COPY loaded {} rows into {}", copied, table_name);
        Ok(copied)
    }
}

/// COPY text-format field. Escapes backslash, tab, newline and carriage return.
fn copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::F32(v) => float_text(f64::from(*v)),
        SqlValue::F64(v) => float_text(*v),
        SqlValue::Text(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Time(t) => format_time(t),
        SqlValue::DateTime(dt) => format_datetime(dt, ' '),
        SqlValue::DateTimeOffset(dt) => format_datetime_offset(dt, ' '),
        other => other.to_plain_text(),
    }
}

fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v < 0.0 { "-Infinity" } else { "Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

/// Any value read as its text bytes.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(RawText(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// NUMERIC decoded to its exact decimal text, whatever its width.
struct NumericText(String);

fn take_u16(buf: &mut &[u8]) -> std::result::Result<u16, BoxError> {
    if buf.len() < 2 {
        return Err("numeric value truncated".into());
    }
    let value = u16::from_be_bytes([buf[0], buf[1]]);
    *buf = &buf[2..];
    Ok(value)
}

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let mut buf = raw;
        let ndigits = usize::from(take_u16(&mut buf)?);
        let weight = i32::from(take_u16(&mut buf)? as i16);
        let sign = take_u16(&mut buf)?;
        let dscale = usize::from(take_u16(&mut buf)?);
        match sign {
            NUMERIC_NAN => return Ok(NumericText("NaN".into())),
            NUMERIC_PINF => return Ok(NumericText("Infinity".into())),
            NUMERIC_NINF => return Ok(NumericText("-Infinity".into())),
            _ => {}
        }
        let digits = (0..ndigits)
            .map(|_| take_u16(&mut buf))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let digit = |idx: i32| {
            usize::try_from(idx)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            text.push_str(&digit(0).to_string());
            for idx in 1..=weight {
                text.push_str(&format!("{:04}", digit(idx)));
            }
        }
        if dscale > 0 {
            let mut frac = String::with_capacity(dscale + 4);
            let mut idx = weight + 1;
            while frac.len() < dscale {
                frac.push_str(&format!("{:04}", digit(idx)));
                idx += 1;
            }
            frac.truncate(dscale);
            text.push('.');
            text.push_str(&frac);
        }
        Ok(NumericText(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Encode a plain decimal literal (or `NaN`) in the NUMERIC binary format.
fn numeric_text_to_sql(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if text == "NaN" {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(NUMERIC_NAN);
        out.put_u16(0);
        return Ok(IsNull::No);
    }
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let valid = !(int_part.is_empty() && frac_part.is_empty())
        && int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit());
    if !valid {
        return Err(format!("invalid numeric literal {:?}", text).into());
    }

    // Base-10000 groups aligned on the decimal point.
    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let aligned = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_part,
        frac_part,
        "0".repeat(frac_pad)
    );
    let mut groups: Vec<i16> = aligned
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(*b - b'0')))
        .collect();
    let mut weight = ((int_pad + int_part.len()) / 4) as i32 - 1;
    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i32;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(i16::try_from(weight)?);
    out.put_u16(if negative && !groups.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    });
    out.put_u16(u16::try_from(frac_part.len())?);
    for group in groups {
        out.put_i16(group);
    }
    Ok(IsNull::No)
}

fn numeric_value(text: String) -> SqlValue {
    if is_wide_numeric(&text) {
        return SqlValue::Text(text);
    }
    match text.parse::<Decimal>() {
        Ok(d) => SqlValue::Decimal(d),
        Err(_) => SqlValue::Text(text),
    }
}

fn read_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<SqlValue> {
    macro_rules! get {
        ($t:ty) => {
            SqlValue::from(row.try_get::<_, Option<$t>>(idx)?)
        };
    }

    let value = match *ty {
        Type::BOOL => get!(bool),
        Type::INT2 => get!(i16),
        Type::INT4 => get!(i32),
        Type::INT8 => get!(i64),
        Type::OID => SqlValue::from(row.try_get::<_, Option<u32>>(idx)?.map(i64::from)),
        Type::CHAR => SqlValue::from(row.try_get::<_, Option<i8>>(idx)?.map(i16::from)),
        Type::FLOAT4 => get!(f32),
        Type::FLOAT8 => get!(f64),
        Type::NUMERIC => match row.try_get::<_, Option<NumericText>>(idx)? {
            Some(NumericText(text)) => numeric_value(text),
            None => SqlValue::Null,
        },
        Type::UUID => get!(Uuid),
        Type::DATE => get!(NaiveDate),
        Type::TIME => get!(NaiveTime),
        Type::TIMESTAMP => get!(NaiveDateTime),
        Type::TIMESTAMPTZ => get!(DateTime<FixedOffset>),
        Type::BYTEA => get!(Vec<u8>),
        Type::JSON | Type::JSONB => SqlValue::from(
            row.try_get::<_, Option<serde_json::Value>>(idx)?
                .map(|v| v.to_string()),
        ),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get!(String),
        _ => SqlValue::from(row.try_get::<_, Option<RawText>>(idx)?.map(|r| r.0)),
    };
    Ok(value)
}

/// Binds a [`SqlValue`] to whatever type the server inferred for the
/// placeholder, widening or parsing where the representations differ.
#[derive(Debug)]
struct PgParam<'a>(&'a SqlValue);

fn mismatch(value: &SqlValue, ty: &Type) -> BoxError {
    format!("cannot bind {:?} as PostgreSQL {}", value, ty).into()
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }
        let text = || value.to_plain_text();
        match *ty {
            Type::BOOL => value
                .as_bool()
                .ok_or_else(|| mismatch(value, ty))?
                .to_sql(ty, out),
            Type::INT2 => {
                let v = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
                i16::try_from(v)?.to_sql(ty, out)
            }
            Type::INT4 => {
                let v = value.as_i64().ok_or_else(|| mismatch(value, ty))?;
                i32::try_from(v)?.to_sql(ty, out)
            }
            Type::INT8 => value
                .as_i64()
                .ok_or_else(|| mismatch(value, ty))?
                .to_sql(ty, out),
            Type::FLOAT4 | Type::FLOAT8 => {
                let v = match value {
                    SqlValue::F32(v) => f64::from(*v),
                    SqlValue::F64(v) => *v,
                    SqlValue::Decimal(d) => d.to_string().parse()?,
                    SqlValue::Text(s) => s.trim().parse()?,
                    other => other.as_i64().ok_or_else(|| mismatch(value, ty))? as f64,
                };
                if *ty == Type::FLOAT4 {
                    (v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Type::NUMERIC => {
                let d = match value {
                    SqlValue::Text(s) if is_wide_numeric(s.trim()) => {
                        return numeric_text_to_sql(s.trim(), out)
                    }
                    SqlValue::Decimal(d) => *d,
                    SqlValue::F32(v) => Decimal::try_from(*v)?,
                    SqlValue::F64(v) => Decimal::try_from(*v)?,
                    SqlValue::Text(s) => s.trim().parse()?,
                    other => Decimal::from(other.as_i64().ok_or_else(|| mismatch(value, ty))?),
                };
                d.to_sql(ty, out)
            }
            Type::UUID => match value {
                SqlValue::Uuid(u) => u.to_sql(ty, out),
                _ => Uuid::parse_str(text().trim())?.to_sql(ty, out),
            },
            Type::BYTEA => match value {
                SqlValue::Bytes(b) => b.to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Type::DATE => match value {
                SqlValue::Date(d) => d.to_sql(ty, out),
                SqlValue::DateTime(dt) => dt.date().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Type::TIME => match value {
                SqlValue::Time(t) => t.to_sql(ty, out),
                SqlValue::DateTime(dt) => dt.time().to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Type::TIMESTAMP => match value {
                SqlValue::DateTime(dt) => dt.to_sql(ty, out),
                SqlValue::DateTimeOffset(dt) => dt.naive_local().to_sql(ty, out),
                SqlValue::Date(d) => d.and_time(NaiveTime::MIN).to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Type::TIMESTAMPTZ => match value {
                SqlValue::DateTimeOffset(dt) => dt.to_sql(ty, out),
                SqlValue::DateTime(dt) => Utc.from_utc_datetime(dt).to_sql(ty, out),
                _ => Err(mismatch(value, ty)),
            },
            Type::JSON | Type::JSONB => {
                let json: serde_json::Value = match value {
                    SqlValue::Text(s) => serde_json::from_str(s)?,
                    _ => serde_json::from_str(&text())?,
                };
                json.to_sql(ty, out)
            }
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                text().to_sql(ty, out)
            }
            _ => {
                // xml, citext, enums: binary input equals the text form.
                out.extend_from_slice(text().as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// CREATE/DROP DATABASE through the maintenance database.
pub struct PgLifecycle {
    connections: Arc<PgConnectionProvider>,
}

impl PgLifecycle {
    pub fn new(connections: Arc<PgConnectionProvider>) -> Self {
        Self { connections }
    }

    async fn maintenance(&self, connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        let cs = with_database(connection_string, MAINTENANCE_DATABASE)?;
        self.connections.connect(&cs).await
    }
}

#[async_trait]
impl DatabaseLifecycle for PgLifecycle {
    async fn create_database(&self, connection_string: &str, name: &str) -> Result<()> {
        let mut conn = self.maintenance(connection_string).await?;
        let exists = conn
            .query_scalar(
                "SELECT COUNT(*) FROM pg_database WHERE datname = $1",
                &[SqlValue::from(name)],
            )
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            > 0;
        if exists {
            info!("Database {} already exists", name);
            return Ok(());
        }
        conn.execute(&format!("CREATE DATABASE {}", quote_pg(name)?), &[])
            .await?;
        info!("Created database {}", name);
        Ok(())
    }

    async fn drop_database_if_exists(&self, connection_string: &str, name: &str) -> Result<()> {
        self.connections.evict(name).await;
        let mut conn = self.maintenance(connection_string).await?;
        if let Err(e) = conn
            .execute(
                &format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_pg(name)?),
                &[],
            )
            .await
        {
            // Servers before 13 lack WITH (FORCE).
            warn!("DROP DATABASE ... WITH (FORCE) failed ({}); retrying without it", e);
            conn.execute(&format!("DROP DATABASE IF EXISTS {}", quote_pg(name)?), &[])
                .await?;
        }
        info!("Dropped database {}", name);
        Ok(())
    }
}
