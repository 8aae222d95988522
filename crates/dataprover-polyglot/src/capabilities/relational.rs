//! `relationalQuery`: pooled SQL access for guest code.
//!
//! `createPool` returns an opaque handle string; every other call takes that
//! handle first. Pools belong to the execution context that created them and
//! are closed with it.
//!
//! Accepted URLs: `jdbc:postgresql://..`, `postgres://..`, `postgresql://..`,
//! `jdbc:sqlite:..` and `sqlite:..`.

use std::str::FromStr;
use std::time::Duration;

use dashmap::DashMap;
use dataprover_codec::{HostValue, Record};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::Handle;

use super::Args;
use crate::error::{PolyglotError, Result};

/// Pool size when `maxPoolSize` is not given.
const DEFAULT_POOL_SIZE: u32 = 5;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Pool configuration
// ---------------------------------------------------------------------------

/// Connection settings passed to `createPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_pool_size: u32,
}

impl PoolConfig {
    fn from_host(value: &HostValue) -> Result<Self> {
        let text = |key: &str| value.get(key).and_then(HostValue::as_str).map(str::to_owned);
        let url = text("jdbcUrl")
            .or_else(|| text("url"))
            .ok_or_else(|| PolyglotError::capability("relationalQuery", "createPool: `jdbcUrl` is required"))?;
        let max_pool_size = value
            .get("maxPoolSize")
            .and_then(HostValue::as_i64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POOL_SIZE);
        Ok(Self {
            url,
            username: text("username"),
            password: text("password"),
            max_pool_size,
        })
    }
}

/// Which backend a URL names, with the URL in sqlx form.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Backend {
    Postgres(String),
    Sqlite(String),
}

fn backend(url: &str) -> Result<Backend> {
    let url = url.trim();
    let url = url.strip_prefix("jdbc:").unwrap_or(url);
    if url.starts_with("postgresql://") || url.starts_with("postgres://") {
        Ok(Backend::Postgres(url.to_owned()))
    } else if url.starts_with("sqlite:") {
        Ok(Backend::Sqlite(url.to_owned()))
    } else {
        Err(PolyglotError::capability(
            "relationalQuery",
            format!("unsupported database URL `{url}`; expected postgresql or sqlite"),
        ))
    }
}

fn connect_error(err: sqlx::Error) -> PolyglotError {
    PolyglotError::capability("relationalQuery", format!("connection failed: {err}"))
}

fn query_error(err: sqlx::Error) -> PolyglotError {
    tracing::error!(error = %err, "sql statement failed");
    PolyglotError::capability("relationalQuery", format!("query failed: {err}"))
}

fn pg_options(url: &str, config: &PoolConfig) -> Result<PgConnectOptions> {
    let mut options = PgConnectOptions::from_str(url).map_err(connect_error)?;
    if let Some(user) = &config.username {
        options = options.username(user);
    }
    if let Some(password) = &config.password {
        options = options.password(password);
    }
    Ok(options)
}

fn sqlite_options(url: &str) -> Result<SqliteConnectOptions> {
    Ok(SqliteConnectOptions::from_str(url)
        .map_err(connect_error)?
        .create_if_missing(true))
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum RelationalPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl RelationalPool {
    async fn connect(config: &PoolConfig) -> Result<Self> {
        match backend(&config.url)? {
            Backend::Postgres(url) => PgPoolOptions::new()
                .max_connections(config.max_pool_size)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(pg_options(&url, config)?)
                .await
                .map(Self::Postgres)
                .map_err(connect_error),
            Backend::Sqlite(url) => SqlitePoolOptions::new()
                .max_connections(config.max_pool_size)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(sqlite_options(&url)?)
                .await
                .map(Self::Sqlite)
                .map_err(connect_error),
        }
    }

    async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Bind host values onto a sqlx query. `$decimal` maps a decimal to a type
/// the backend can encode.
macro_rules! bind_params {
    ($query:expr, $params:expr, $decimal:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                HostValue::Null => query.bind(None::<String>),
                HostValue::Bool(b) => query.bind(*b),
                HostValue::Int(n) => match i64::try_from(*n) {
                    Ok(v) => query.bind(v),
                    Err(_) => query.bind(n.to_string()),
                },
                HostValue::Float(f) => query.bind(*f),
                HostValue::Decimal(d) => query.bind(($decimal)(d)),
                HostValue::Text(s) => query.bind(s.clone()),
                HostValue::Bytes(b) => query.bind(b.clone()),
                other => query.bind(other.to_json().to_string()),
            };
        }
        query
    }};
}

fn pg_decimal(d: &Decimal) -> Decimal {
    *d
}

fn sqlite_decimal(d: &Decimal) -> Option<f64> {
    d.to_f64()
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn pg_value(row: &PgRow, i: usize) -> HostValue {
    let type_name = match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return HostValue::Null,
        Ok(raw) => raw.type_info().name().to_owned(),
        Err(_) => return HostValue::Null,
    };
    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(i).map(HostValue::Bool),
        "INT2" => row.try_get::<i16, _>(i).map(|v| HostValue::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(i).map(|v| HostValue::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(i).map(|v| HostValue::Int(v.into())),
        "FLOAT4" => row.try_get::<f32, _>(i).map(|v| HostValue::Float(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(i).map(HostValue::Float),
        "NUMERIC" => row.try_get::<Decimal, _>(i).map(HostValue::Decimal),
        "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(HostValue::Bytes),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
            .map(|v| HostValue::Text(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .map(|v| HostValue::Text(v.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(i)
            .map(|v| HostValue::Text(v.to_string())),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(i)
            .map(|v| HostValue::Text(v.to_string())),
        "JSON" | "JSONB" => row.try_get::<serde_json::Value, _>(i).map(HostValue::from),
        _ => row.try_get::<String, _>(i).map(HostValue::Text),
    };
    decoded.unwrap_or_else(|err| {
        tracing::debug!(column = i, type_name = %type_name, error = %err, "undecodable column, returning null");
        HostValue::Null
    })
}

fn sqlite_value(row: &SqliteRow, i: usize) -> HostValue {
    let type_name = match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return HostValue::Null,
        Ok(raw) => raw.type_info().name().to_owned(),
        Err(_) => return HostValue::Null,
    };
    let decoded = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(i).map(|v| HostValue::Int(v.into())),
        "REAL" => row.try_get::<f64, _>(i).map(HostValue::Float),
        "BOOLEAN" => row.try_get::<bool, _>(i).map(HostValue::Bool),
        "BLOB" => row.try_get::<Vec<u8>, _>(i).map(HostValue::Bytes),
        _ => row
            .try_get::<i64, _>(i)
            .map(|v| HostValue::Int(v.into()))
            .or_else(|_| row.try_get::<f64, _>(i).map(HostValue::Float))
            .or_else(|_| row.try_get::<String, _>(i).map(HostValue::Text)),
    };
    decoded.unwrap_or_else(|err| {
        tracing::debug!(column = i, type_name = %type_name, error = %err, "undecodable column, returning null");
        HostValue::Null
    })
}

fn pg_record(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name().to_owned(), pg_value(row, i)))
        .collect()
}

fn sqlite_record(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name().to_owned(), sqlite_value(row, i)))
        .collect()
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Pools created by one execution context, keyed by handle.
#[derive(Debug, Default)]
pub struct RelationalQuery {
    pools: DashMap<String, RelationalPool>,
}

impl RelationalQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub(super) fn call(&self, handle: &Handle, method: &str, args: &Args) -> Result<HostValue> {
        match method {
            "createPool" => {
                let config = PoolConfig::from_host(args.value(0)?)?;
                handle.block_on(self.create_pool(&config)).map(HostValue::Text)
            }
            "query" => {
                let pool = self.pool(args.text(0)?)?;
                let rows = handle.block_on(query(&pool, args.text(1)?, &params(args)?))?;
                Ok(HostValue::List(rows.into_iter().map(HostValue::Map).collect()))
            }
            "queryScalar" => {
                let pool = self.pool(args.text(0)?)?;
                let rows = handle.block_on(query(&pool, args.text(1)?, &params(args)?))?;
                Ok(rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next())
                    .map(|(_, v)| v)
                    .unwrap_or(HostValue::Null))
            }
            "execute" => {
                let pool = self.pool(args.text(0)?)?;
                let affected = handle.block_on(execute(&pool, args.text(1)?, &params(args)?))?;
                Ok(HostValue::Int(affected.into()))
            }
            "closePool" => {
                if let Some((_, pool)) = self.pools.remove(args.text(0)?) {
                    handle.block_on(pool.close());
                }
                Ok(HostValue::Null)
            }
            _ => {
                let config = PoolConfig {
                    url: args.text(0)?.to_owned(),
                    username: args.get(1).and_then(HostValue::as_str).map(str::to_owned),
                    password: args.get(2).and_then(HostValue::as_str).map(str::to_owned),
                    max_pool_size: 1,
                };
                handle.block_on(test_connection(&config)).map(HostValue::Bool)
            }
        }
    }

    /// Open a pool and return its handle.
    pub async fn create_pool(&self, config: &PoolConfig) -> Result<String> {
        let pool = RelationalPool::connect(config).await?;
        let id = format!("pool-{}", uuid::Uuid::now_v7());
        tracing::debug!(pool = %id, max_connections = config.max_pool_size, "created database pool");
        self.pools.insert(id.clone(), pool);
        Ok(id)
    }

    /// Close every pool this context opened.
    pub fn close_all(&self, handle: &Handle) {
        let pools: Vec<RelationalPool> = self.pools.iter().map(|e| e.value().clone()).collect();
        self.pools.clear();
        if pools.is_empty() {
            return;
        }
        tracing::debug!(count = pools.len(), "closing database pools");
        let close = async move {
            for pool in &pools {
                pool.close().await;
            }
        };
        // Blocking would panic on a runtime thread; hand the work to it instead.
        if Handle::try_current().is_ok() {
            handle.spawn(close);
        } else {
            handle.block_on(close);
        }
    }

    fn pool(&self, id: &str) -> Result<RelationalPool> {
        self.pools
            .get(id)
            .map(|p| p.value().clone())
            .ok_or_else(|| PolyglotError::capability("relationalQuery", format!("unknown pool `{id}`")))
    }
}

/// Statement parameters: a list, or absent.
fn params(args: &Args) -> Result<Vec<HostValue>> {
    match args.get(2) {
        None => Ok(Vec::new()),
        Some(_) => Ok(args.list(2)?.to_vec()),
    }
}

async fn query(pool: &RelationalPool, sql: &str, params: &[HostValue]) -> Result<Vec<Record>> {
    tracing::debug!(sql, params = params.len(), "executing query");
    match pool {
        RelationalPool::Postgres(pool) => {
            let rows = bind_params!(sqlx::query(sql), params, pg_decimal)
                .fetch_all(pool)
                .await
                .map_err(query_error)?;
            Ok(rows.iter().map(pg_record).collect())
        }
        RelationalPool::Sqlite(pool) => {
            let rows = bind_params!(sqlx::query(sql), params, sqlite_decimal)
                .fetch_all(pool)
                .await
                .map_err(query_error)?;
            Ok(rows.iter().map(sqlite_record).collect())
        }
    }
}

async fn execute(pool: &RelationalPool, sql: &str, params: &[HostValue]) -> Result<u64> {
    tracing::debug!(sql, params = params.len(), "executing statement");
    let affected = match pool {
        RelationalPool::Postgres(pool) => bind_params!(sqlx::query(sql), params, pg_decimal)
            .execute(pool)
            .await
            .map_err(query_error)?
            .rows_affected(),
        RelationalPool::Sqlite(pool) => bind_params!(sqlx::query(sql), params, sqlite_decimal)
            .execute(pool)
            .await
            .map_err(query_error)?
            .rows_affected(),
    };
    Ok(affected)
}

/// Open and ping a single connection.
async fn test_connection(config: &PoolConfig) -> Result<bool> {
    match backend(&config.url)? {
        Backend::Postgres(url) => {
            let mut conn = sqlx::PgConnection::connect_with(&pg_options(&url, config)?)
                .await
                .map_err(connect_error)?;
            conn.ping().await.map_err(connect_error)?;
            conn.close().await.map_err(connect_error)?;
        }
        Backend::Sqlite(url) => {
            let mut conn = sqlx::SqliteConnection::connect_with(&sqlite_options(&url)?)
                .await
                .map_err(connect_error)?;
            conn.ping().await.map_err(connect_error)?;
            conn.close().await.map_err(connect_error)?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_jdbc_urls() {
        assert_eq!(
            backend("jdbc:postgresql://db:5432/yaci").expect("pg"),
            Backend::Postgres("postgresql://db:5432/yaci".into())
        );
        assert_eq!(
            backend("jdbc:sqlite:/tmp/x.db").expect("sqlite"),
            Backend::Sqlite("sqlite:/tmp/x.db".into())
        );
        assert!(backend("mysql://db/x").is_err());
    }

    #[test]
    fn pool_config_defaults() {
        let value = HostValue::from(serde_json::json!({
            "jdbcUrl": "jdbc:postgresql://db/x",
            "username": "u",
            "password": "p"
        }));
        let config = PoolConfig::from_host(&value).expect("config");
        assert_eq!(config.max_pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.username.as_deref(), Some("u"));
        assert!(PoolConfig::from_host(&HostValue::Map(Record::new())).is_err());
    }

    async fn sqlite_pool(dir: &tempfile::TempDir, relational: &RelationalQuery) -> String {
        let config = PoolConfig {
            url: format!("sqlite:{}", dir.path().join("test.db").display()),
            username: None,
            password: None,
            max_pool_size: 2,
        };
        relational.create_pool(&config).await.expect("pool must open")
    }

    #[tokio::test]
    async fn sqlite_query_and_execute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let relational = RelationalQuery::new();
        let id = sqlite_pool(&dir, &relational).await;
        let pool = relational.pool(&id).expect("pool");

        execute(
            &pool,
            "CREATE TABLE stake (address TEXT, amount INTEGER, ratio REAL, raw BLOB, note TEXT)",
            &[],
        )
        .await
        .expect("create");
        let affected = execute(
            &pool,
            "INSERT INTO stake VALUES (?, ?, ?, ?, ?)",
            &[
                "stake_test1abc".into(),
                HostValue::Int(5_000_000),
                HostValue::Float(0.25),
                HostValue::Bytes(vec![0xAB]),
                HostValue::Null,
            ],
        )
        .await
        .expect("insert");
        assert_eq!(affected, 1);

        let rows = query(&pool, "SELECT * FROM stake WHERE amount > ?", &[HostValue::Int(1)])
            .await
            .expect("select");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("address"), Some(&HostValue::from("stake_test1abc")));
        assert_eq!(row.get("amount"), Some(&HostValue::Int(5_000_000)));
        assert_eq!(row.get("ratio"), Some(&HostValue::Float(0.25)));
        assert_eq!(row.get("raw"), Some(&HostValue::Bytes(vec![0xAB])));
        assert_eq!(row.get("note"), Some(&HostValue::Null));
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, ["address", "amount", "ratio", "raw", "note"]);
    }

    #[test]
    fn capability_calls_through_handle() {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let relational = RelationalQuery::new();
        let url = format!("jdbc:sqlite:{}", dir.path().join("cap.db").display());

        let config = HostValue::from(serde_json::json!({"jdbcUrl": url}));
        let pool = relational
            .call(rt.handle(), "createPool", &Args::new("relationalQuery", "createPool", vec![config]))
            .expect("createPool");
        let call = |method: &str, values: Vec<HostValue>| {
            relational.call(rt.handle(), method, &Args::new("relationalQuery", method, values))
        };

        call("execute", vec![pool.clone(), "CREATE TABLE t (n INTEGER)".into()]).expect("create");
        call(
            "execute",
            vec![
                pool.clone(),
                "INSERT INTO t VALUES (?), (?)".into(),
                HostValue::List(vec![HostValue::Int(3), HostValue::Int(4)]),
            ],
        )
        .expect("insert");
        assert_eq!(
            call("queryScalar", vec![pool.clone(), "SELECT SUM(n) FROM t".into()]).expect("scalar"),
            HostValue::Int(7)
        );
        assert_eq!(
            call("queryScalar", vec![pool.clone(), "SELECT n FROM t WHERE n > 10".into()])
                .expect("scalar"),
            HostValue::Null
        );

        call("closePool", vec![pool.clone()]).expect("close");
        assert_eq!(relational.pool_count(), 0);
        assert!(call("query", vec![pool, "SELECT 1".into()]).is_err());

        assert_eq!(
            call("testConnection", vec![url.into()]).expect("test connection"),
            HostValue::Bool(true)
        );
    }

    #[test]
    fn close_all_outside_runtime() {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let relational = RelationalQuery::new();
        rt.block_on(sqlite_pool(&dir, &relational));
        assert_eq!(relational.pool_count(), 1);
        relational.close_all(rt.handle());
        assert_eq!(relational.pool_count(), 0);
    }
}
