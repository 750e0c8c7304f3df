//! SQL Server connections: bb8-pooled Tiberius clients, TDS bulk load and
//! database lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tiberius::{Client, ColumnData, Config, FromSql, ToSql, TokenRow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::core::identifier::quote_mssql;
use crate::core::schema::TableDescriptor;
use crate::core::traits::{ConnectionProvider, DatabaseLifecycle, SqlExecutor};
use crate::core::types::{DataTypeDescriptor, DbType};
use crate::core::value::{QueryResult, Row, SqlValue};
use crate::error::{MigrateError, Result};

/// Database used for CREATE/DROP DATABASE.
const MAINTENANCE_DATABASE: &str = "master";

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: Config,
}

impl TiberiusConnectionManager {
    fn new(connection_string: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string).map_err(|e| {
            MigrateError::Config(format!("Invalid SQL Server connection string: {}", e))
        })?;
        Ok(Self { config })
    }

    async fn open_tcp(&self) -> std::result::Result<TcpStream, tiberius::error::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();

        let std_tcp = match tcp.into_std() {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to configure TCP keepalives on SQL Server connection: {}", e);
                return TcpStream::connect(self.config.get_addr()).await.map_err(|e| {
                    tiberius::error::Error::Io {
                        kind: e.kind(),
                        message: e.to_string(),
                    }
                });
            }
        };
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on SQL Server connection: {}", e);
        }
        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        TcpStream::from_std(std_tcp).map_err(|e| tiberius::error::Error::Io {
            kind: e.kind(),
            message: format!("Failed to convert socket: {}", e),
        })
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = self.open_tcp().await?;
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Opens pooled connections, one bb8 pool per connection string.
pub struct MssqlConnectionProvider {
    pools: Mutex<HashMap<String, Pool<TiberiusConnectionManager>>>,
    max_size: u32,
}

impl MssqlConnectionProvider {
    pub fn new(max_size: u32) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
        }
    }

    async fn pool(&self, connection_string: &str) -> Result<Pool<TiberiusConnectionManager>> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(connection_string) {
            return Ok(pool.clone());
        }
        let manager = TiberiusConnectionManager::new(connection_string)?;
        let pool = Pool::builder()
            .max_size(self.max_size)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build_unchecked(manager);
        pools.insert(connection_string.to_string(), pool.clone());
        Ok(pool)
    }

    /// Forget pools connected to `database`; idle connections close on drop.
    async fn evict(&self, database: &str) {
        let mut pools = self.pools.lock().await;
        pools.retain(|cs, _| {
            database_of(cs)
                .map(|db| !db.eq_ignore_ascii_case(database))
                .unwrap_or(true)
        });
    }
}

impl Default for MssqlConnectionProvider {
    fn default() -> Self {
        Self::new(16)
    }
}

const DATABASE_KEYS: &[&str] = &["database", "initial catalog"];

/// Split an ADO.NET connection string into `(key, value)` pairs, honoring
/// quoted and braced values.
fn ado_pairs(connection_string: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = connection_string.chars().peekable();
    loop {
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.trim().is_empty() && chars.peek().is_none() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut value = String::new();
        match chars.peek().copied() {
            Some(open @ ('"' | '\'' | '{')) => {
                let close = if open == '{' { '}' } else { open };
                chars.next();
                while let Some(c) = chars.next() {
                    if c == close {
                        if chars.peek() == Some(&close) {
                            value.push(close);
                            chars.next();
                        } else {
                            break;
                        }
                    } else {
                        value.push(c);
                    }
                }
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
            }
            _ => {
                value = chars.by_ref().take_while(|c| *c != ';').collect();
                value = value.trim().to_string();
            }
        }
        if !key.trim().is_empty() {
            pairs.push((key.trim().to_string(), value));
        }
        if chars.peek().is_none() {
            break;
        }
    }
    pairs
}

fn ado_value(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ';' | '"' | '\'' | '{' | '}')) || value.trim() != value {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn database_of(connection_string: &str) -> Option<String> {
    ado_pairs(connection_string)
        .into_iter()
        .find(|(k, _)| DATABASE_KEYS.contains(&k.to_lowercase().as_str()))
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Point an ADO.NET connection string at another database.
pub fn with_database(connection_string: &str, database: &str) -> String {
    let mut parts: Vec<String> = ado_pairs(connection_string)
        .into_iter()
        .filter(|(k, _)| !DATABASE_KEYS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| format!("{}={}", k, ado_value(&v)))
        .collect();
    parts.push(format!("Database={}", ado_value(database)));
    parts.join(";")
}

#[async_trait]
impl ConnectionProvider for MssqlConnectionProvider {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        let pool = self.pool(connection_string).await?;
        let conn = pool
            .get_owned()
            .await
            .map_err(|e| MigrateError::pool(e, "getting SQL Server connection"))?;
        Ok(Box::new(MssqlExecutor { conn }))
    }

    fn with_database(&self, connection_string: &str, database: &str) -> Result<String> {
        Ok(with_database(connection_string, database))
    }

    fn database_name(&self, connection_string: &str) -> Result<Option<String>> {
        Ok(database_of(connection_string))
    }
}

/// One pooled SQL Server connection.
pub struct MssqlExecutor {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
}

/// Convert SqlValue to a boxed Tiberius parameter.
fn to_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) => Box::new(b.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
    }
}

/// Read one Tiberius cell into a [`SqlValue`].
fn read_value(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match &data {
        ColumnData::U8(v) => SqlValue::from(v.map(i16::from)),
        ColumnData::I16(v) => SqlValue::from(*v),
        ColumnData::I32(v) => SqlValue::from(*v),
        ColumnData::I64(v) => SqlValue::from(*v),
        ColumnData::F32(v) => SqlValue::from(*v),
        ColumnData::F64(v) => SqlValue::from(*v),
        ColumnData::Bit(v) => SqlValue::from(*v),
        ColumnData::String(v) => SqlValue::from(v.as_ref().map(|s| s.to_string())),
        ColumnData::Guid(v) => SqlValue::from(*v),
        ColumnData::Binary(v) => SqlValue::from(v.as_ref().map(|b| b.to_vec())),
        ColumnData::Numeric(v) => match v {
            None => SqlValue::Null,
            Some(n) => match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
                Ok(d) => SqlValue::Decimal(d),
                // Beyond 28 digits: keep the exact text.
                Err(_) => SqlValue::Text(n.to_string()),
            },
        },
        ColumnData::Xml(v) => {
            SqlValue::from(v.as_ref().map(|x| x.clone().into_owned().into_string()))
        }
        ColumnData::Date(_) => SqlValue::from(NaiveDate::from_sql(&data)?),
        ColumnData::Time(_) => SqlValue::from(NaiveTime::from_sql(&data)?),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            SqlValue::from(NaiveDateTime::from_sql(&data)?)
        }
        ColumnData::DateTimeOffset(_) => {
            SqlValue::from(DateTime::<FixedOffset>::from_sql(&data)?)
        }
    };
    Ok(value)
}

#[async_trait]
impl SqlExecutor for MssqlExecutor {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        if params.is_empty() {
            self.conn.simple_query(sql).await?.into_results().await?;
            return Ok(0);
        }
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
        let result = self.conn.execute(sql, &refs).await?;
        Ok(result.total())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
        let mut stream = if refs.is_empty() {
            self.conn.simple_query(sql).await?
        } else {
            self.conn.query(sql, &refs).await?
        };
        let columns: Vec<String> = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = stream.into_first_result().await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.into_iter().map(read_value).collect::<Result<Row>>()?);
        }
        Ok(QueryResult::new(columns, out))
    }

    fn supports_bulk_copy(&self, table: &TableDescriptor) -> bool {
        bulk_loadable(table)
    }

    async fn bulk_copy(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        let table_name = table.full_name();
        // The load request covers every table column in declaration order.
        let positions = table
            .columns
            .iter()
            .map(|c| {
                columns.iter().position(|n| n == &c.name).ok_or_else(|| {
                    MigrateError::transfer(
                        &table_name,
                        format!("bulk copy needs every column; '{}' is missing", c.name),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let qualified = match &table.schema {
            Some(s) => format!("{}.{}", quote_mssql(s)?, quote_mssql(&table.name)?),
            None => quote_mssql(&table.name)?,
        };
        let mut bulk_load = self
            .conn
            .bulk_insert(&qualified)
            .await
            .map_err(|e| MigrateError::transfer(&table_name, format!("bulk insert init: {}", e)))?;

        for row in rows {
            let mut token_row = TokenRow::new();
            for (column, &pos) in table.columns.iter().zip(&positions) {
                let value = row.get(pos).cloned().unwrap_or(SqlValue::Null);
                token_row.push(column_data(value, &column.data_type)?);
            }
            bulk_load.send(token_row).await.map_err(|e| {
                MigrateError::transfer(&table_name, format!("bulk insert send: {}", e))
            })?;
        }

        let total = bulk_load
            .finalize()
            .await
            .map_err(|e| MigrateError::transfer(&table_name, format!("bulk insert finalize: {}", e)))?
            .total();
        debug!("Bulk loaded {} rows into {}", total, table_name);
        Ok(total)
    }
}

/// The bulk load request cannot keep identity values, and encodes `date`
/// and `xml` incorrectly.
fn bulk_loadable(table: &TableDescriptor) -> bool {
    !table.has_identity()
        && !table.has_computed()
        && table
            .columns
            .iter()
            .all(|c| !matches!(c.data_type.db_type, DbType::Date | DbType::Xml | DbType::Unknown))
}

fn days_from_ce(date: NaiveDate) -> Result<tiberius::time::Date> {
    u32::try_from(date.num_days_from_ce() - 1)
        .map(tiberius::time::Date::new)
        .map_err(|_| MigrateError::unsupported_value(date.to_string(), "datetime2"))
}

/// Time of day in `10^-scale` second increments.
fn time_at_scale(time: NaiveTime, scale: u32) -> tiberius::time::Time {
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond() % 1_000_000_000);
    let increments = nanos / 10u64.pow(9 - scale);
    tiberius::time::Time::new(increments, scale as u8)
}

fn datetime2(dt: NaiveDateTime, scale: u32) -> Result<tiberius::time::DateTime2> {
    Ok(tiberius::time::DateTime2::new(
        days_from_ce(dt.date())?,
        time_at_scale(dt.time(), scale),
    ))
}

/// Exact decimal text at the column scale. `None` when digits beyond the
/// scale are not zero or the value exceeds 38 digits.
fn wide_numeric(text: &str, ty: &DataTypeDescriptor) -> Option<tiberius::numeric::Numeric> {
    let scale = ty.precision_scale().map(|(_, s)| s).unwrap_or(0) as usize;
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let (kept, dropped) = frac_part.split_at(frac_part.len().min(scale));
    if !dropped.bytes().all(|b| b == b'0') {
        return None;
    }
    let digits = format!("{}{}{}", int_part, kept, "0".repeat(scale - kept.len()));
    let mantissa: i128 = digits.parse().ok()?;
    if mantissa >= 10i128.pow(38) {
        return None;
    }
    let mantissa = if negative { -mantissa } else { mantissa };
    Some(tiberius::numeric::Numeric::new_with_scale(mantissa, scale as u8))
}

/// Convert a value to the Tiberius bulk-load cell for a column of type `ty`.
fn column_data(value: SqlValue, ty: &DataTypeDescriptor) -> Result<ColumnData<'static>> {
    let value = value.coerce_to(ty)?;
    let scale = ty.fractional_scale().unwrap_or(7).min(7);
    let mismatch = |v: &SqlValue| MigrateError::unsupported_value(format!("{:?}", v), ty.to_string());

    let data = match ty.db_type {
        DbType::Boolean => ColumnData::Bit(value.as_bool()),
        DbType::TinyInt => ColumnData::U8(match value.as_i64() {
            None => None,
            Some(n) => Some(u8::try_from(n).map_err(|_| mismatch(&value))?),
        }),
        DbType::SmallInt => ColumnData::I16(match value.as_i64() {
            None => None,
            Some(n) => Some(i16::try_from(n).map_err(|_| mismatch(&value))?),
        }),
        DbType::Int => ColumnData::I32(match value.as_i64() {
            None => None,
            Some(n) => Some(i32::try_from(n).map_err(|_| mismatch(&value))?),
        }),
        DbType::BigInt => ColumnData::I64(value.as_i64()),
        DbType::Decimal => ColumnData::Numeric(match value {
            SqlValue::Decimal(mut d) => {
                if let Some((_, s)) = ty.precision_scale() {
                    d.rescale(s);
                }
                Some(tiberius::numeric::Numeric::new_with_scale(
                    d.mantissa(),
                    d.scale() as u8,
                ))
            }
            SqlValue::Text(s) => match wide_numeric(&s, ty) {
                Some(n) => Some(n),
                None => return Err(mismatch(&SqlValue::Text(s))),
            },
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Real => ColumnData::F32(match value {
            SqlValue::F32(f) if f.is_finite() => Some(f),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Double => ColumnData::F64(match value {
            SqlValue::F64(f) if f.is_finite() => Some(f),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Binary | DbType::VarBinary | DbType::Blob => ColumnData::Binary(match value {
            SqlValue::Bytes(b) => Some(b.into()),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Uuid => ColumnData::Guid(match value {
            SqlValue::Uuid(u) => Some(u),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Time => ColumnData::Time(match value {
            SqlValue::Time(t) => Some(time_at_scale(t, scale)),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::DateTime => ColumnData::DateTime2(match value {
            SqlValue::DateTime(dt) => Some(datetime2(dt, scale)?),
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::DateTimeOffset => ColumnData::DateTimeOffset(match value {
            SqlValue::DateTimeOffset(dto) => {
                let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
                Some(tiberius::time::DateTimeOffset::new(
                    datetime2(dto.naive_utc(), scale)?,
                    offset_minutes,
                ))
            }
            SqlValue::Null => None,
            other => return Err(mismatch(&other)),
        }),
        DbType::Date | DbType::Xml | DbType::Unknown => return Err(mismatch(&value)),
        _ => ColumnData::String(match value {
            SqlValue::Null => None,
            other => Some(other.to_plain_text().into()),
        }),
    };
    Ok(data)
}

/// CREATE/DROP DATABASE through `master`.
pub struct MssqlLifecycle {
    connections: Arc<MssqlConnectionProvider>,
}

impl MssqlLifecycle {
    pub fn new(connections: Arc<MssqlConnectionProvider>) -> Self {
        Self { connections }
    }

    async fn maintenance(&self, connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        let cs = with_database(connection_string, MAINTENANCE_DATABASE);
        self.connections.connect(&cs).await
    }
}

fn unicode_literal(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

#[async_trait]
impl DatabaseLifecycle for MssqlLifecycle {
    async fn create_database(&self, connection_string: &str, name: &str) -> Result<()> {
        let mut conn = self.maintenance(connection_string).await?;
        conn.execute(
            &format!(
                "IF DB_ID({}) IS NULL CREATE DATABASE {}",
                unicode_literal(name),
                quote_mssql(name)?
            ),
            &[],
        )
        .await?;
        info!("Ensured database {} exists", name);
        Ok(())
    }

    async fn drop_database_if_exists(&self, connection_string: &str, name: &str) -> Result<()> {
        self.connections.evict(name).await;
        let mut conn = self.maintenance(connection_string).await?;
        let quoted = quote_mssql(name)?;
        conn.execute(
            &format!(
                "IF DB_ID({lit}) IS NOT NULL BEGIN \
                 ALTER DATABASE {q} SET SINGLE_USER WITH ROLLBACK IMMEDIATE; \
                 DROP DATABASE {q}; END",
                lit = unicode_literal(name),
                q = quoted
            ),
            &[],
        )
        .await?;
        info!("Dropped database {}", name);
        Ok(())
    }
}
