//! Ordered, idempotent schema migrations.
//!
//! Migrations are an explicit registry of name + forward/backward statement
//! lists — no filename scanning or runtime name-based dispatch. Names follow
//! the `<timestamp>_<snake_case_description>` convention and apply in
//! lexicographic order, so the timestamp prefix is the ordering key.
//!
//! Statements are written in the MySQL-flavored template dialect; the
//! external adapter rewrites them for PostgreSQL, the embedded adapter runs
//! them as-is. Each migration applies inside its own transaction and is
//! recorded in a tracking table with a unique name column, which makes
//! re-application a no-op. Concurrent runs are not serialized and remain an
//! out-of-scope hazard.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::DatabaseAdapter;
use crate::error::{DbFallbackError, Result};
use crate::value::Value;

/// Logical name of the tracking table (prefixed by the adapter).
const TRACKING_TABLE: &str = "migrations";

fn migration_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+_[a-z][a-z0-9_]*$").expect("migration name pattern"))
}

/// A single registered migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// `<timestamp>_<snake_case_description>`; also the ordering key.
    pub name: String,
    /// Forward statements, run in order inside one transaction.
    pub up: Vec<String>,
    /// Backward statements; `None` makes the migration irreversible.
    pub down: Option<Vec<String>>,
}

impl Migration {
    /// Creates a reversible migration.
    pub fn new(
        name: impl Into<String>,
        up: Vec<String>,
        down: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            up,
            down: Some(down),
        }
    }

    /// Creates a migration without a backward operation.
    pub fn irreversible(name: impl Into<String>, up: Vec<String>) -> Self {
        Self {
            name: name.into(),
            up,
            down: None,
        }
    }
}

/// An ordered, validated registry of migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Builds a set from a list of migrations, validating names and
    /// sorting lexicographically.
    ///
    /// # Errors
    /// Returns a configuration error for a malformed or duplicate name.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self> {
        let mut seen = HashSet::new();
        for migration in &migrations {
            if !migration_name_re().is_match(&migration.name) {
                return Err(DbFallbackError::configuration(format!(
                    "migration name '{}' must match <timestamp>_<snake_case_description>",
                    migration.name
                )));
            }
            if !seen.insert(migration.name.clone()) {
                return Err(DbFallbackError::configuration(format!(
                    "duplicate migration name '{}'",
                    migration.name
                )));
            }
        }
        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { migrations })
    }

    /// Looks up a migration by name.
    pub fn get(&self, name: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.name == name)
    }

    /// Iterates migrations in application order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Batch number assigned to this run (0 when nothing was pending).
    pub batch: i64,
    /// Names applied by this run, in order.
    pub applied: Vec<String>,
}

/// Outcome of a single rollback step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackOutcome {
    /// The backward operation ran and the tracking row was removed.
    RolledBack,
    /// The step was skipped; the tracking row remains.
    Skipped {
        /// Why the step could not be rolled back.
        reason: String,
    },
}

/// One entry in a rollback report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    /// Migration name.
    pub name: String,
    /// What happened to this step.
    pub outcome: RollbackOutcome,
}

/// Diagnostic counts over the registry and tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Registered migrations.
    pub total: usize,
    /// Tracking rows present.
    pub applied: usize,
    /// Registered but not yet applied.
    pub pending: usize,
    /// Highest batch number, if any run has completed.
    pub last_batch: Option<i64>,
}

/// Applies and reverses registered migrations against the active adapter.
pub struct MigrationRunner {
    adapter: Arc<dyn DatabaseAdapter>,
    set: MigrationSet,
}

impl MigrationRunner {
    /// Creates a runner over an adapter and a migration registry.
    pub fn new(adapter: Arc<dyn DatabaseAdapter>, set: MigrationSet) -> Self {
        Self { adapter, set }
    }

    fn tracking_table(&self) -> String {
        self.adapter.qualified_table(TRACKING_TABLE)
    }

    async fn ensure_tracking_table(&self) -> Result<()> {
        let table = self.tracking_table();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS `{table}` (\
             `migration` VARCHAR(191) NOT NULL PRIMARY KEY, \
             `batch` INT NOT NULL, \
             `executed_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        );
        self.adapter.execute(&ddl, &[]).await?;
        Ok(())
    }

    async fn applied_names(&self) -> Result<HashSet<String>> {
        let table = self.tracking_table();
        let values = self
            .adapter
            .fetch_column(
                &format!("SELECT `migration` FROM `{table}` ORDER BY `migration`"),
                &[],
            )
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect())
    }

    async fn last_batch(&self) -> Result<Option<i64>> {
        let table = self.tracking_table();
        let value = self
            .adapter
            .fetch_scalar(&format!("SELECT MAX(`batch`) FROM `{table}`"), &[])
            .await?;
        Ok(value.and_then(|v| v.as_int()))
    }

    /// Applies all pending migrations, each in its own transaction.
    ///
    /// A failed forward operation rolls back only that migration's
    /// transaction and aborts the run; migrations already applied by this
    /// run stay committed and the run is resumable.
    ///
    /// # Errors
    /// Propagates the first migration failure, wrapped with the migration
    /// name.
    pub async fn run(&self) -> Result<MigrationReport> {
        self.ensure_tracking_table().await?;
        let applied = self.applied_names().await?;
        let batch = self.last_batch().await?.unwrap_or(0) + 1;
        let table = self.tracking_table();

        let pending: Vec<&Migration> = self
            .set
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .collect();

        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(MigrationReport {
                batch: 0,
                applied: Vec::new(),
            });
        }

        info!(count = pending.len(), batch, "applying pending migrations");
        let mut applied_now = Vec::new();

        for migration in pending {
            info!(name = %migration.name, "applying migration");
            self.adapter.begin_transaction().await?;

            if let Err(e) = self.apply_forward(migration, batch, &table).await {
                if let Err(rollback_err) = self.adapter.rollback().await {
                    warn!(
                        name = %migration.name,
                        "rollback after failed migration also failed: {rollback_err}"
                    );
                }
                return Err(e);
            }

            self.adapter.commit().await.map_err(|e| {
                DbFallbackError::migration_failed(
                    migration.name.clone(),
                    "committing migration transaction",
                    e,
                )
            })?;
            applied_now.push(migration.name.clone());
        }

        Ok(MigrationReport {
            batch,
            applied: applied_now,
        })
    }

    async fn apply_forward(&self, migration: &Migration, batch: i64, table: &str) -> Result<()> {
        for statement in &migration.up {
            self.adapter.execute(statement, &[]).await.map_err(|e| {
                DbFallbackError::migration_failed(
                    migration.name.clone(),
                    "forward operation",
                    e,
                )
            })?;
        }

        // Insert-if-absent keeps duplicate application a no-op even under
        // a racing run.
        self.adapter
            .insert_ignore(
                table,
                &[
                    ("migration", Value::from(migration.name.as_str())),
                    ("batch", Value::Int(batch)),
                ],
            )
            .await
            .map_err(|e| {
                DbFallbackError::migration_failed(
                    migration.name.clone(),
                    "recording applied migration",
                    e,
                )
            })?;
        Ok(())
    }

    /// Reverses the most recently applied migrations, newest first, each in
    /// its own transaction.
    ///
    /// A step with no registry entry or no backward operation is reported
    /// as skipped without aborting the remaining steps.
    ///
    /// # Errors
    /// Fails only when the tracking table cannot be read.
    pub async fn rollback(&self, steps: usize) -> Result<Vec<RollbackStep>> {
        self.ensure_tracking_table().await?;
        let table = self.tracking_table();

        let names = self
            .adapter
            .fetch_column(
                &format!(
                    "SELECT `migration` FROM `{table}` \
                     ORDER BY `batch` DESC, `migration` DESC LIMIT ?"
                ),
                &[Value::Int(steps as i64)],
            )
            .await?;

        let mut report = Vec::new();
        for value in names {
            let Some(name) = value.as_text().map(str::to_string) else {
                continue;
            };
            let outcome = self.rollback_one(&name, &table).await;
            report.push(RollbackStep { name, outcome });
        }
        Ok(report)
    }

    async fn rollback_one(&self, name: &str, table: &str) -> RollbackOutcome {
        let Some(migration) = self.set.get(name) else {
            warn!(name, "migration not found in registry, skipping rollback");
            return RollbackOutcome::Skipped {
                reason: "migration is not in the registry".to_string(),
            };
        };
        let Some(down) = &migration.down else {
            warn!(name, "migration has no backward operation, skipping rollback");
            return RollbackOutcome::Skipped {
                reason: "migration has no backward operation".to_string(),
            };
        };

        if let Err(e) = self.run_backward(name, down, table).await {
            warn!(name, "rollback step failed: {e}");
            if let Err(rollback_err) = self.adapter.rollback().await {
                warn!(name, "transaction rollback also failed: {rollback_err}");
            }
            return RollbackOutcome::Skipped {
                reason: e.to_string(),
            };
        }

        info!(name, "migration rolled back");
        RollbackOutcome::RolledBack
    }

    async fn run_backward(&self, name: &str, down: &[String], table: &str) -> Result<()> {
        self.adapter.begin_transaction().await?;
        for statement in down {
            self.adapter.execute(statement, &[]).await.map_err(|e| {
                DbFallbackError::migration_failed(name.to_string(), "backward operation", e)
            })?;
        }
        self.adapter
            .delete(table, &[("migration", Value::from(name))])
            .await?;
        self.adapter.commit().await
    }

    /// Counts of total/applied/pending migrations and the last batch.
    ///
    /// # Errors
    /// Fails when the tracking table cannot be read.
    pub async fn status(&self) -> Result<MigrationStatus> {
        self.ensure_tracking_table().await?;
        let applied = self.applied_names().await?;
        let last_batch = self.last_batch().await?;

        let pending = self
            .set
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .count();

        Ok(MigrationStatus {
            total: self.set.len(),
            applied: applied.len(),
            pending,
            last_batch,
        })
    }
}
