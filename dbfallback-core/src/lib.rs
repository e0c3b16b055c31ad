//! Embedded-first database adapter layer with external PostgreSQL support
//! and automatic fallback.
//!
//! Repositories depend only on the [`adapters::DatabaseAdapter`] trait. The
//! [`factory::AdapterFactory`] resolves the active adapter from persisted
//! configuration: an embedded SQLite database by default, or an external
//! PostgreSQL-compatible database when one is configured and reachable. An
//! unreachable external database degrades gracefully — the factory falls
//! back to the embedded adapter, records a health event, and re-evaluates
//! from scratch on the next instantiation.
//!
//! # Architecture
//! - Object-safe adapter trait with driver-level parameter binding only
//! - MySQL-flavored query templates, rewritten per-dialect by the adapter
//! - Explicit migration registry applied in per-migration transactions
//! - Injected configuration and health collaborators, no ambient globals
//!
//! # Security
//! - Connection strings are redacted in all errors and log output
//! - The external connection string only moves through the configuration
//!   store's secret channel, never alongside plain settings

pub mod adapters;
pub mod config;
pub mod error;
pub mod factory;
pub mod health;
pub mod logging;
pub mod migrate;
pub mod value;

// Re-export commonly used types
pub use adapters::{
    ConnectionDetails, ConnectionStatus, DatabaseAdapter, EmbeddedAdapter, ExternalAdapter,
    ExternalConfig, external::validate_connection_string,
};
pub use config::{
    AdapterConfig, AdapterSettings, BackendKind, ConfigStore, FileConfigStore, MemoryConfigStore,
    RetryPolicy,
};
pub use error::{DbFallbackError, Result, redact_database_url};
pub use factory::{AdapterFactory, ProbeReport};
pub use health::{HealthEvent, HealthMetrics, HealthSink, HealthStatus, MemoryHealthSink,
    TracingHealthSink};
pub use logging::init_logging;
pub use migrate::{
    Migration, MigrationReport, MigrationRunner, MigrationSet, MigrationStatus, RollbackOutcome,
    RollbackStep,
};
pub use value::{Row, Value};
