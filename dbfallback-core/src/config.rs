//! Adapter configuration and its persistence contract.
//!
//! The adapter layer never reaches for ambient global state: configuration
//! arrives through an injected [`ConfigStore`]. Non-sensitive settings and
//! the external connection string travel through separate channels — the
//! connection string only ever moves through the store's secret interface
//! and is never serialized alongside plain settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{DbFallbackError, Result};

/// Secret-store namespace for the external connection string.
pub const SECRET_NAMESPACE: &str = "database";
/// Secret-store key for the external connection string.
pub const SECRET_KEY: &str = "connection_string";

/// Which concrete adapter the factory should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The always-available embedded SQLite database.
    #[default]
    Embedded,
    /// An external PostgreSQL-compatible database.
    External,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedded => write!(f, "embedded"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Bounded retry policy for external connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum connection attempts before declaring failure.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no sleep, used for side-effect-free probes.
    pub fn single() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

fn default_table_prefix() -> String {
    "app_".to_string()
}

fn default_embedded_path() -> String {
    ":memory:".to_string()
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

/// Non-sensitive adapter settings, as persisted by a [`ConfigStore`].
///
/// The external connection string is deliberately absent; it lives in the
/// store's secret channel under ([`SECRET_NAMESPACE`], [`SECRET_KEY`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Configured backend.
    #[serde(default)]
    pub backend: BackendKind,
    /// Prefix applied to every table name this layer touches.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// Whether the external driver should keep connections alive between
    /// uses (mapped onto the pool's idle behavior).
    #[serde(default)]
    pub persistent: bool,
    /// Path of the embedded SQLite database (`:memory:` for transient).
    #[serde(default = "default_embedded_path")]
    pub embedded_path: String,
    /// Maximum external connection attempts.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Sleep between external connection attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Embedded,
            table_prefix: default_table_prefix(),
            persistent: false,
            embedded_path: default_embedded_path(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Fully assembled adapter configuration: plain settings plus the secret
/// connection string, after the degrade invariant has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    /// Effective backend (degraded to `Embedded` when external mode lacks
    /// a connection string).
    pub backend: BackendKind,
    /// External connection string, when external mode is usable.
    pub connection_string: Option<String>,
    /// Table name prefix.
    pub table_prefix: String,
    /// Persistent-connection hint for the external driver.
    pub persistent: bool,
    /// Embedded database path.
    pub embedded_path: String,
    /// Connection retry policy for the external adapter.
    pub retry: RetryPolicy,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::from_parts(AdapterSettings::default(), None)
    }
}

impl AdapterConfig {
    /// Assembles a configuration from persisted settings and the secret
    /// connection string.
    ///
    /// Invariant: external mode without a non-empty connection string
    /// silently degrades to the embedded backend (logged, not an error).
    pub fn from_parts(settings: AdapterSettings, connection_string: Option<String>) -> Self {
        let connection_string = connection_string.filter(|s| !s.trim().is_empty());
        let backend = match settings.backend {
            BackendKind::External if connection_string.is_none() => {
                warn!("external backend configured without a connection string; using embedded");
                BackendKind::Embedded
            }
            other => other,
        };

        Self {
            backend,
            connection_string,
            table_prefix: settings.table_prefix,
            persistent: settings.persistent,
            embedded_path: settings.embedded_path,
            retry: RetryPolicy {
                max_attempts: settings.retry_max_attempts.max(1),
                delay: Duration::from_millis(settings.retry_delay_ms),
            },
        }
    }

    /// Splits the configuration back into its persisted parts.
    pub fn into_parts(self) -> (AdapterSettings, Option<String>) {
        let settings = AdapterSettings {
            backend: self.backend,
            table_prefix: self.table_prefix,
            persistent: self.persistent,
            embedded_path: self.embedded_path,
            retry_max_attempts: self.retry.max_attempts,
            retry_delay_ms: self.retry.delay.as_millis() as u64,
        };
        (settings, self.connection_string)
    }

    /// Whether external mode is configured and usable.
    pub fn external_configured(&self) -> bool {
        self.backend == BackendKind::External && self.connection_string.is_some()
    }
}

/// Persistence collaborator for adapter configuration.
///
/// Plain settings and secrets travel through separate methods so that an
/// implementation can back them with different storage (e.g. a world-readable
/// settings file and an encrypted secret store).
pub trait ConfigStore: Send + Sync {
    /// Loads the persisted non-sensitive settings.
    fn load_settings(&self) -> Result<AdapterSettings>;

    /// Persists the non-sensitive settings.
    fn save_settings(&self, settings: &AdapterSettings) -> Result<()>;

    /// Loads a secret value, `None` if absent.
    fn load_secret(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Stores a secret value.
    fn store_secret(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Removes a secret value. Removing an absent secret is a no-op.
    fn delete_secret(&self, namespace: &str, key: &str) -> Result<()>;
}

/// Loads a full [`AdapterConfig`] through a store, applying the degrade
/// invariant.
pub fn load_config(store: &dyn ConfigStore) -> Result<AdapterConfig> {
    let settings = store.load_settings()?;
    let secret = store.load_secret(SECRET_NAMESPACE, SECRET_KEY)?;
    Ok(AdapterConfig::from_parts(settings, secret))
}

/// Persists a full [`AdapterConfig`] through a store.
pub fn save_config(store: &dyn ConfigStore, config: AdapterConfig) -> Result<()> {
    let (settings, secret) = config.into_parts();
    match secret {
        Some(secret) => store.store_secret(SECRET_NAMESPACE, SECRET_KEY, &secret)?,
        None => store.delete_secret(SECRET_NAMESPACE, SECRET_KEY)?,
    }
    store.save_settings(&settings)
}

/// In-memory configuration store for tests and embedding hosts that manage
/// persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    settings: Mutex<AdapterSettings>,
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    /// Creates a store with default settings and no secrets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with settings.
    pub fn with_settings(settings: AdapterSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            secrets: Mutex::new(HashMap::new()),
        }
    }

    fn secret_key(namespace: &str, key: &str) -> String {
        format!("{namespace}.{key}")
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_settings(&self) -> Result<AdapterSettings> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save_settings(&self, settings: &AdapterSettings) -> Result<()> {
        *self
            .settings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = settings.clone();
        Ok(())
    }

    fn load_secret(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&Self::secret_key(namespace, key))
            .cloned())
    }

    fn store_secret(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(Self::secret_key(namespace, key), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, namespace: &str, key: &str) -> Result<()> {
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&Self::secret_key(namespace, key));
        Ok(())
    }
}

/// File-backed configuration store.
///
/// Settings live in `settings.json`; secrets live in a separate
/// `secrets.json` so the two can carry different filesystem permissions.
#[derive(Debug)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            DbFallbackError::io_failed(
                format!("creating configuration directory {}", dir.display()),
                e,
            )
        })?;
        Ok(Self { dir })
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join("settings.json")
    }

    fn secrets_path(&self) -> PathBuf {
        self.dir.join("secrets.json")
    }

    fn read_secrets(&self) -> Result<HashMap<String, String>> {
        let path = self.secrets_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| DbFallbackError::io_failed(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&raw).map_err(|e| {
            DbFallbackError::serialization_failed(format!("parsing {}", path.display()), e)
        })
    }

    fn write_secrets(&self, secrets: &HashMap<String, String>) -> Result<()> {
        let path = self.secrets_path();
        let raw = serde_json::to_string_pretty(secrets)
            .map_err(|e| DbFallbackError::serialization_failed("encoding secrets", e))?;
        std::fs::write(&path, raw)
            .map_err(|e| DbFallbackError::io_failed(format!("writing {}", path.display()), e))
    }
}

impl ConfigStore for FileConfigStore {
    fn load_settings(&self) -> Result<AdapterSettings> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(AdapterSettings::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| DbFallbackError::io_failed(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&raw).map_err(|e| {
            DbFallbackError::serialization_failed(format!("parsing {}", path.display()), e)
        })
    }

    fn save_settings(&self, settings: &AdapterSettings) -> Result<()> {
        let path = self.settings_path();
        let raw = serde_json::to_string_pretty(settings)
            .map_err(|e| DbFallbackError::serialization_failed("encoding settings", e))?;
        std::fs::write(&path, raw)
            .map_err(|e| DbFallbackError::io_failed(format!("writing {}", path.display()), e))
    }

    fn load_secret(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .read_secrets()?
            .get(&format!("{namespace}.{key}"))
            .cloned())
    }

    fn store_secret(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut secrets = self.read_secrets()?;
        secrets.insert(format!("{namespace}.{key}"), value.to_string());
        self.write_secrets(&secrets)
    }

    fn delete_secret(&self, namespace: &str, key: &str) -> Result<()> {
        let mut secrets = self.read_secrets()?;
        if secrets.remove(&format!("{namespace}.{key}")).is_some() {
            self.write_secrets(&secrets)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_without_connection_string_degrades_to_embedded() {
        let settings = AdapterSettings {
            backend: BackendKind::External,
            ..Default::default()
        };

        let config = AdapterConfig::from_parts(settings.clone(), None);
        assert_eq!(config.backend, BackendKind::Embedded);
        assert!(!config.external_configured());

        // Whitespace-only strings count as absent.
        let config = AdapterConfig::from_parts(settings, Some("   ".to_string()));
        assert_eq!(config.backend, BackendKind::Embedded);
    }

    #[test]
    fn test_external_with_connection_string_stays_external() {
        let settings = AdapterSettings {
            backend: BackendKind::External,
            ..Default::default()
        };

        let config = AdapterConfig::from_parts(
            settings,
            Some("postgresql://u:p@db.example.com/app".to_string()),
        );
        assert_eq!(config.backend, BackendKind::External);
        assert!(config.external_configured());
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let settings = AdapterSettings {
            retry_max_attempts: 0,
            ..Default::default()
        };
        let config = AdapterConfig::from_parts(settings, None);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryConfigStore::new();
        let settings = AdapterSettings {
            backend: BackendKind::External,
            table_prefix: "crm_".to_string(),
            ..Default::default()
        };

        store.save_settings(&settings).unwrap();
        store
            .store_secret(SECRET_NAMESPACE, SECRET_KEY, "postgresql://u:p@h/db")
            .unwrap();

        let config = load_config(&store).unwrap();
        assert_eq!(config.backend, BackendKind::External);
        assert_eq!(config.table_prefix, "crm_");
        assert_eq!(
            config.connection_string.as_deref(),
            Some("postgresql://u:p@h/db")
        );
    }

    #[test]
    fn test_save_config_without_secret_removes_stored_secret() {
        let store = MemoryConfigStore::new();
        store
            .store_secret(SECRET_NAMESPACE, SECRET_KEY, "postgresql://u:p@h/db")
            .unwrap();

        save_config(&store, AdapterConfig::default()).unwrap();
        assert_eq!(store.load_secret(SECRET_NAMESPACE, SECRET_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("dbfallback-config-{}", std::process::id()));
        let store = FileConfigStore::new(&dir).unwrap();

        let config = AdapterConfig {
            table_prefix: "ne_".to_string(),
            ..Default::default()
        };
        save_config(&store, config).unwrap();

        let loaded = load_config(&store).unwrap();
        assert_eq!(loaded.table_prefix, "ne_");
        assert_eq!(loaded.backend, BackendKind::Embedded);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_settings_serde_defaults() {
        let settings: AdapterSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, AdapterSettings::default());

        let settings: AdapterSettings =
            serde_json::from_str(r#"{"backend":"external","table_prefix":"x_"}"#).unwrap();
        assert_eq!(settings.backend, BackendKind::External);
        assert_eq!(settings.table_prefix, "x_");
    }
}
