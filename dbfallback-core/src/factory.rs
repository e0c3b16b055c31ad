//! Adapter resolution with automatic fallback.
//!
//! The factory exclusively owns the decision of which concrete adapter is
//! active. Resolution happens once per factory instance and is cached; a
//! fresh factory re-evaluates configuration from scratch, which is the
//! recovery mechanism — a transient external failure self-heals on the next
//! instantiation, with no persistent circuit-breaker state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::adapters::{
    ConnectionStatus, DatabaseAdapter, EmbeddedAdapter, ExternalAdapter,
    external::validate_connection_string,
};
use crate::config::{
    AdapterConfig, BackendKind, ConfigStore, RetryPolicy, load_config, save_config,
};
use crate::error::{DbFallbackError, Result};
use crate::health::{HealthMetrics, HealthSink, HealthStatus};
use crate::migrate::{MigrationReport, MigrationRunner, MigrationSet};

/// Result of a side-effect-free connection probe, shaped for display by a
/// configuration UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Whether the probe connected successfully.
    pub success: bool,
    /// Human-readable outcome (connection strings redacted).
    pub message: String,
    /// Connection details when the probe succeeded.
    pub details: Option<ConnectionStatus>,
}

struct ResolvedState {
    adapter: Arc<dyn DatabaseAdapter>,
    backend: BackendKind,
    fallback: bool,
}

/// Factory that resolves the active [`DatabaseAdapter`] from persisted
/// configuration, falling back to the embedded database when the external
/// one is unreachable.
pub struct AdapterFactory {
    config_store: Arc<dyn ConfigStore>,
    health: Arc<dyn HealthSink>,
    resolved: Mutex<Option<ResolvedState>>,
}

impl AdapterFactory {
    /// Creates a factory over the injected configuration store and health
    /// sink.
    pub fn new(config_store: Arc<dyn ConfigStore>, health: Arc<dyn HealthSink>) -> Self {
        Self {
            config_store,
            health,
            resolved: Mutex::new(None),
        }
    }

    /// Returns the active adapter, resolving it on first call.
    ///
    /// Callers always receive a working adapter: an unreachable external
    /// database triggers fallback to the embedded one rather than an error.
    ///
    /// # Errors
    /// Fails only when configuration cannot be loaded or the embedded
    /// database itself cannot be opened.
    pub async fn get_adapter(&self) -> Result<Arc<dyn DatabaseAdapter>> {
        let mut guard = self.resolved.lock().await;
        if let Some(state) = guard.as_ref() {
            return Ok(state.adapter.clone());
        }

        let state = self.resolve().await?;
        let adapter = state.adapter.clone();
        *guard = Some(state);
        Ok(adapter)
    }

    async fn resolve(&self) -> Result<ResolvedState> {
        let config = load_config(self.config_store.as_ref())?;

        if !config.external_configured() {
            let adapter = self.open_embedded(&config).await?;
            info!("resolved embedded database adapter");
            return Ok(ResolvedState {
                adapter,
                backend: BackendKind::Embedded,
                fallback: false,
            });
        }

        // config.external_configured() guarantees the string is present.
        let connection_string = config.connection_string.clone().unwrap_or_default();
        match self.try_external(&config, &connection_string).await {
            Ok(adapter) => {
                info!("resolved external database adapter");
                Ok(ResolvedState {
                    adapter,
                    backend: BackendKind::External,
                    fallback: false,
                })
            }
            Err(reason) => {
                warn!("external database unavailable, falling back to embedded: {reason}");
                self.health.record(
                    HealthStatus::Degraded,
                    &[
                        "external database unavailable, embedded fallback active".to_string(),
                        reason,
                    ],
                );
                let adapter = self.open_embedded(&config).await?;
                Ok(ResolvedState {
                    adapter,
                    backend: BackendKind::Embedded,
                    fallback: true,
                })
            }
        }
    }

    /// Attempts to build and verify an external adapter; the error is a
    /// redacted human-readable reason suitable for the health sink.
    async fn try_external(
        &self,
        config: &AdapterConfig,
        connection_string: &str,
    ) -> std::result::Result<Arc<dyn DatabaseAdapter>, String> {
        let adapter = ExternalAdapter::from_url(
            connection_string,
            &config.table_prefix,
            config.persistent,
            config.retry,
        )
        .map_err(|e| format!("invalid connection string: {e}"))?;

        adapter
            .test_connection()
            .await
            .map_err(|e| e.to_string())?;

        Ok(Arc::new(adapter))
    }

    async fn open_embedded(&self, config: &AdapterConfig) -> Result<Arc<dyn DatabaseAdapter>> {
        let adapter = EmbeddedAdapter::new(&config.embedded_path, &config.table_prefix).await?;
        Ok(Arc::new(adapter))
    }

    /// Whether the embedded fallback replaced a configured external backend.
    ///
    /// `false` until the first `get_adapter()` call resolves.
    pub async fn is_fallback_active(&self) -> bool {
        self.resolved
            .lock()
            .await
            .as_ref()
            .is_some_and(|state| state.fallback)
    }

    /// Persists configuration and invalidates the cached adapter so the
    /// next `get_adapter()` call re-resolves.
    ///
    /// # Errors
    /// Fails when the configuration store rejects the write.
    pub async fn save_configuration(&self, config: AdapterConfig) -> Result<()> {
        save_config(self.config_store.as_ref(), config)?;
        *self.resolved.lock().await = None;
        Ok(())
    }

    /// Side-effect-free connection probe for a candidate connection string.
    ///
    /// Validates structure, attempts a single throwaway connection (no
    /// retry budget) and reports the outcome. Never touches the cached
    /// adapter or persisted configuration.
    pub async fn test_connection(connection_string: &str) -> ProbeReport {
        if let Err(e) = validate_connection_string(connection_string) {
            return ProbeReport {
                success: false,
                message: e.to_string(),
                details: None,
            };
        }

        let adapter = match ExternalAdapter::from_url(
            connection_string,
            "",
            false,
            RetryPolicy::single(),
        ) {
            Ok(adapter) => adapter,
            Err(e) => {
                return ProbeReport {
                    success: false,
                    message: e.to_string(),
                    details: None,
                };
            }
        };

        match adapter.test_connection().await {
            Ok(()) => {
                let details = adapter.connection_status().await;
                ProbeReport {
                    success: true,
                    message: "Connection successful".to_string(),
                    details: Some(details),
                }
            }
            Err(e) => ProbeReport {
                success: false,
                message: e.to_string(),
                details: None,
            },
        }
    }

    /// Runs migrations against the external database.
    ///
    /// Guarded: only proceeds when external mode is configured and
    /// reachable. Connectivity is re-verified with a fresh adapter; the
    /// cached adapter is not involved.
    ///
    /// # Errors
    /// Fails when external mode is not configured, the database is
    /// unreachable, or a migration's forward operation fails.
    pub async fn run_external_migrations(&self, set: MigrationSet) -> Result<MigrationReport> {
        let config = load_config(self.config_store.as_ref())?;
        if !config.external_configured() {
            return Err(DbFallbackError::configuration(
                "external database mode is not configured",
            ));
        }

        let connection_string = config.connection_string.clone().unwrap_or_default();
        let adapter = ExternalAdapter::from_url(
            &connection_string,
            &config.table_prefix,
            config.persistent,
            config.retry,
        )?;
        adapter.test_connection().await?;

        let runner = MigrationRunner::new(Arc::new(adapter), set);
        runner.run().await
    }

    /// Health summary for dashboard display, resolving the adapter if
    /// needed.
    ///
    /// # Errors
    /// Propagates resolution failures from [`Self::get_adapter`].
    pub async fn health_metrics(&self) -> Result<HealthMetrics> {
        let adapter = self.get_adapter().await?;
        let (backend, fallback) = {
            let guard = self.resolved.lock().await;
            guard
                .as_ref()
                .map(|state| (state.backend, state.fallback))
                .unwrap_or((BackendKind::Embedded, false))
        };

        let status = adapter.connection_status().await;
        Ok(HealthMetrics {
            adapter_type: backend.to_string(),
            fallback_active: fallback,
            connected: status.connected,
            connection_details: status,
            health_status: if fallback {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            last_check: Utc::now(),
        })
    }
}
