//! Embedded SQLite adapter.
//!
//! The always-available built-in database: used directly when no external
//! backend is configured, and as the fallback target when the external
//! connection fails. Thin delegation with no dialect translation — SQLite
//! accepts the MySQL-flavored templates this layer is given (backtick
//! identifiers, `?` placeholders, loose type names).
//!
//! A single pooled connection is sufficient here and keeps in-memory
//! databases coherent across operations.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::{ConnectionStatus, DatabaseAdapter, ensure_non_empty};
use crate::config::BackendKind;
use crate::error::DbFallbackError;
use crate::value::{Row, Value};
use crate::Result;

/// Adapter over an embedded SQLite database (file-based or in-memory).
pub struct EmbeddedAdapter {
    pool: SqlitePool,
    path: String,
    table_prefix: String,
    tx: Mutex<Option<PoolConnection<Sqlite>>>,
}

impl std::fmt::Debug for EmbeddedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedAdapter")
            .field("path", &self.path)
            .field("table_prefix", &self.table_prefix)
            .finish_non_exhaustive()
    }
}

impl EmbeddedAdapter {
    /// Opens the embedded database at `path` (`:memory:` for transient).
    ///
    /// The database file is created if missing.
    ///
    /// # Errors
    /// Returns a connection error if the database cannot be opened.
    pub async fn new(path: &str, table_prefix: &str) -> Result<Self> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                DbFallbackError::configuration(format!("invalid sqlite options: {e}"))
            })?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .map_err(|e| {
                DbFallbackError::connection_failed(
                    format!("opening embedded database at '{path}'"),
                    e,
                )
            })?;

        Ok(Self {
            pool,
            path: path.to_string(),
            table_prefix: table_prefix.to_string(),
            tx: Mutex::new(None),
        })
    }

    /// Closes the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.tx.lock().await;
        let result = if params.is_empty() {
            // Unprepared path: supports DDL and multi-statement scripts.
            match guard.as_mut() {
                Some(conn) => (&mut **conn).execute(sql).await,
                None => self.pool.execute(sql).await,
            }
        } else {
            let query = bind_params(sqlx::query(sql), params);
            match guard.as_mut() {
                Some(conn) => query.execute(&mut **conn).await,
                None => query.execute(&self.pool).await,
            }
        };

        match result {
            Ok(done) => Ok(done.rows_affected()),
            Err(e) => {
                error!(query = sql, "embedded query failed: {e}");
                Err(DbFallbackError::query_failed(format!("executing '{sql}'"), e))
            }
        }
    }

    async fn run_fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<SqliteRow>> {
        let mut guard = self.tx.lock().await;
        let query = bind_params(sqlx::query(sql), params);
        let result = match guard.as_mut() {
            Some(conn) => query.fetch_all(&mut **conn).await,
            None => query.fetch_all(&self.pool).await,
        };

        result.map_err(|e| {
            error!(query = sql, "embedded query failed: {e}");
            DbFallbackError::query_failed(format!("fetching '{sql}'"), e)
        })
    }
}

#[async_trait]
impl DatabaseAdapter for EmbeddedAdapter {
    async fn execute(&self, query: &str, params: &[Value]) -> Result<u64> {
        self.run_execute(query, params).await
    }

    async fn fetch_all(&self, query: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = self.run_fetch_all(query, params).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn fetch_one(&self, query: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.run_fetch_all(query, params).await?;
        Ok(rows.first().map(decode_row))
    }

    async fn fetch_scalar(&self, query: &str, params: &[Value]) -> Result<Option<Value>> {
        Ok(self
            .fetch_one(query, params)
            .await?
            .and_then(|row| row.values().first().cloned()))
    }

    async fn fetch_column(&self, query: &str, params: &[Value]) -> Result<Vec<Value>> {
        let rows = self.run_fetch_all(query, params).await?;
        Ok(rows
            .iter()
            .map(|row| decode_value(row, 0))
            .collect())
    }

    async fn insert(&self, table: &str, fields: &[(&str, Value)]) -> Result<Option<i64>> {
        ensure_non_empty(table, "insert", fields)?;
        let (sql, params) = build_insert(table, fields, false);

        let mut guard = self.tx.lock().await;
        let query = bind_params(sqlx::query(&sql), &params);
        let result = match guard.as_mut() {
            Some(conn) => query.execute(&mut **conn).await,
            None => query.execute(&self.pool).await,
        };

        match result {
            Ok(done) => Ok(Some(done.last_insert_rowid())),
            Err(e) => {
                error!(table, "embedded insert failed: {e}");
                Err(DbFallbackError::query_failed(
                    format!("inserting into '{table}'"),
                    e,
                ))
            }
        }
    }

    async fn insert_ignore(&self, table: &str, fields: &[(&str, Value)]) -> Result<bool> {
        ensure_non_empty(table, "insert", fields)?;
        let (sql, params) = build_insert(table, fields, true);
        let affected = self.run_execute(&sql, &params).await.map_err(|e| {
            error!(table, "embedded insert-ignore failed");
            e
        })?;
        Ok(affected > 0)
    }

    async fn update(
        &self,
        table: &str,
        set: &[(&str, Value)],
        filter: &[(&str, Value)],
    ) -> Result<u64> {
        ensure_non_empty(table, "update set", set)?;
        ensure_non_empty(table, "update filter", filter)?;

        let assignments: Vec<String> = set.iter().map(|(c, _)| format!("\"{c}\" = ?")).collect();
        let conditions: Vec<String> = filter.iter().map(|(c, _)| format!("\"{c}\" = ?")).collect();
        let sql = format!(
            "UPDATE \"{table}\" SET {} WHERE {}",
            assignments.join(", "),
            conditions.join(" AND ")
        );
        let params: Vec<Value> = set
            .iter()
            .chain(filter.iter())
            .map(|(_, v)| v.clone())
            .collect();

        self.run_execute(&sql, &params).await
    }

    async fn delete(&self, table: &str, filter: &[(&str, Value)]) -> Result<u64> {
        ensure_non_empty(table, "delete filter", filter)?;

        let conditions: Vec<String> = filter.iter().map(|(c, _)| format!("\"{c}\" = ?")).collect();
        let sql = format!("DELETE FROM \"{table}\" WHERE {}", conditions.join(" AND "));
        let params: Vec<Value> = filter.iter().map(|(_, v)| v.clone()).collect();

        self.run_execute(&sql, &params).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(DbFallbackError::configuration(
                "a transaction is already open on this adapter",
            ));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbFallbackError::connection_failed("acquiring connection", e))?;
        (&mut *conn)
            .execute("BEGIN")
            .await
            .map_err(|e| DbFallbackError::query_failed("beginning transaction", e))?;

        *guard = Some(conn);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let Some(mut conn) = guard.take() else {
            return Err(DbFallbackError::configuration("no open transaction"));
        };
        (&mut *conn)
            .execute("COMMIT")
            .await
            .map_err(|e| DbFallbackError::query_failed("committing transaction", e))?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let Some(mut conn) = guard.take() else {
            return Err(DbFallbackError::configuration("no open transaction"));
        };
        (&mut *conn)
            .execute("ROLLBACK")
            .await
            .map_err(|e| DbFallbackError::query_failed("rolling back transaction", e))?;
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        let result: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DbFallbackError::connection_failed("embedded connectivity probe", e))?;

        if result != 1 {
            return Err(DbFallbackError::configuration(
                "connectivity probe returned an unexpected result",
            ));
        }
        Ok(())
    }

    async fn connection_status(&self) -> ConnectionStatus {
        let version: Option<String> = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| debug!("embedded status probe failed: {e}"))
            .ok();

        ConnectionStatus {
            connected: version.is_some(),
            driver: "sqlite".to_string(),
            host: None,
            database: Some(self.path.clone()),
            port: None,
            server_version: version,
            retry_count: 0,
        }
    }

    fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Embedded
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bool(b) => query.bind(*b),
        };
    }
    query
}

fn build_insert(table: &str, fields: &[(&str, Value)], ignore: bool) -> (String, Vec<Value>) {
    let columns: Vec<String> = fields.iter().map(|(c, _)| format!("\"{c}\"")).collect();
    let placeholders: Vec<&str> = fields.iter().map(|_| "?").collect();
    let verb = if ignore { "INSERT OR IGNORE" } else { "INSERT" };
    let sql = format!(
        "{verb} INTO \"{table}\" ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    let params = fields.iter().map(|(_, v)| v.clone()).collect();
    (sql, params)
}

fn decode_row(row: &SqliteRow) -> Row {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for column in row.columns() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, column.ordinal()));
    }
    Row::new(columns, values)
}

fn decode_value(row: &SqliteRow, ordinal: usize) -> Value {
    let Ok(raw) = row.try_get_raw(ordinal) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    let type_name = raw.type_info().name().to_uppercase();
    match type_name.as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" => row
            .try_get::<i64, _>(ordinal)
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get::<f64, _>(ordinal)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "BOOLEAN" | "BOOL" => row
            .try_get::<bool, _>(ordinal)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(ordinal)
            .map(Value::Text)
            .or_else(|_| row.try_get::<i64, _>(ordinal).map(Value::Int))
            .unwrap_or(Value::Null),
    }
}
