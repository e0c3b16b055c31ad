//! Database adapter trait and concrete adapters.
//!
//! This module defines the capability contract every adapter satisfies so
//! that repositories depend only on [`DatabaseAdapter`], never on a concrete
//! backend. Two adapters are provided:
//!
//! - [`embedded::EmbeddedAdapter`] — the always-available embedded SQLite
//!   database, used directly or as the fallback target.
//! - [`external::ExternalAdapter`] — an external PostgreSQL-compatible
//!   database with connection retry and MySQL-to-PostgreSQL dialect
//!   translation.
//!
//! # Error policy
//! Every fallible operation returns `Result`; there are no sentinel
//! failure values. Query and CRUD failures are logged with the offending
//! table or query context before the error is returned. Nothing in this
//! module panics on a bad query or a down connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::BackendKind;
use crate::value::{Row, Value};

pub mod embedded;
pub mod external;

pub use embedded::EmbeddedAdapter;
pub use external::{ConnectionDetails, ExternalAdapter, ExternalConfig};

/// Ephemeral connection status, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether a connectivity probe currently succeeds.
    pub connected: bool,
    /// Driver name ("sqlite" or "postgresql").
    pub driver: String,
    /// Host the adapter targets, when applicable.
    pub host: Option<String>,
    /// Database name or file path.
    pub database: Option<String>,
    /// TCP port, when applicable.
    pub port: Option<u16>,
    /// Server version string reported by the backend, when connected.
    pub server_version: Option<String>,
    /// Connection attempts used by the most recent establishment.
    pub retry_count: u32,
}

/// Capability contract every adapter implements.
///
/// All read operations accept a query template plus a positional parameter
/// list; substitution always happens through driver-level binding, never
/// string concatenation. The external adapter additionally rewrites the
/// template from MySQL syntax to its own dialect before execution.
///
/// # Object safety
/// The trait is object-safe; the factory hands out `Arc<dyn DatabaseAdapter>`.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Executes a statement, returning the affected-row count.
    async fn execute(&self, query: &str, params: &[Value]) -> Result<u64>;

    /// Runs a query and returns all result rows.
    async fn fetch_all(&self, query: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Runs a query and returns the first row, if any.
    async fn fetch_one(&self, query: &str, params: &[Value]) -> Result<Option<Row>>;

    /// Runs a query and returns the first column of the first row, if any.
    async fn fetch_scalar(&self, query: &str, params: &[Value]) -> Result<Option<Value>>;

    /// Runs a query and returns the first column of every row.
    async fn fetch_column(&self, query: &str, params: &[Value]) -> Result<Vec<Value>>;

    /// Inserts a row built from column/value pairs, returning the
    /// driver-reported insert id when the table exposes one.
    async fn insert(&self, table: &str, fields: &[(&str, Value)]) -> Result<Option<i64>>;

    /// Inserts a row unless a unique constraint already holds it.
    ///
    /// Returns `true` when a row was inserted, `false` when it already
    /// existed. Used by the migration tracker to stay idempotent under
    /// duplicate application.
    async fn insert_ignore(&self, table: &str, fields: &[(&str, Value)]) -> Result<bool>;

    /// Updates rows matching the equality `where` map (AND-joined),
    /// returning the affected-row count (0 for no match, not an error).
    async fn update(
        &self,
        table: &str,
        set: &[(&str, Value)],
        filter: &[(&str, Value)],
    ) -> Result<u64>;

    /// Deletes rows matching the equality `where` map, returning the
    /// affected-row count.
    async fn delete(&self, table: &str, filter: &[(&str, Value)]) -> Result<u64>;

    /// Opens a transaction. Transactions are non-nested; opening a second
    /// one before commit/rollback is a configuration error.
    async fn begin_transaction(&self) -> Result<()>;

    /// Commits the open transaction.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the open transaction.
    async fn rollback(&self) -> Result<()>;

    /// Performs a trivial round-trip query (`SELECT 1`).
    async fn test_connection(&self) -> Result<()>;

    /// Recomputes the connection status, including the server version when
    /// connected. Never fails; an unreachable backend reports
    /// `connected: false`.
    async fn connection_status(&self) -> ConnectionStatus;

    /// The configured table prefix.
    fn table_prefix(&self) -> &str;

    /// The backend kind this adapter serves.
    fn backend(&self) -> BackendKind;

    /// Prefixes a logical table name.
    fn qualified_table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix(), name)
    }
}

/// Guards shared by both adapters' CRUD builders.
pub(crate) fn ensure_non_empty(
    table: &str,
    clause: &str,
    fields: &[(&str, Value)],
) -> Result<()> {
    if fields.is_empty() {
        return Err(crate::error::DbFallbackError::configuration(format!(
            "{clause} for table '{table}' requires at least one column"
        )));
    }
    Ok(())
}
