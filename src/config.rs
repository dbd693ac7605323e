use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::guard::GuardPolicy;
use crate::transport::Backoff;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR: &str = "asset-sync";

/// Sync client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub identity: IdentityConfig,
    pub retry: RetryConfig,
    pub reconcile: ReconcileConfig,
    pub guard: GuardConfig,
    pub cache: CacheConfig,
}

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; collections live under `{base_url}/collections/{name}`
    pub base_url: String,
    /// Sent as `x-api-key` when present
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

/// Who per-user collections belong to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable user identifier. Falls back to the hostname when unset.
    pub user_id: Option<String>,
}

/// Transport retry schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
        }
    }
}

/// Background reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Seconds between remote retries while in fallback mode
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// Bulk-deletion guard thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Collections smaller than this may be emptied freely
    pub min_items: usize,
    /// Largest share of a collection one write may remove
    pub max_removal_fraction: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        let policy = GuardPolicy::default();
        Self {
            min_items: policy.min_items,
            max_removal_fraction: policy.max_removal_fraction,
        }
    }
}

/// Local cache location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// redb file path (empty = default data dir)
    pub path: Option<String>,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Config::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Resolved cache database path
    pub fn cache_path(&self) -> Result<PathBuf> {
        if let Some(ref custom) = self.cache.path {
            return Ok(PathBuf::from(custom));
        }
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join(APP_DIR);
        fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Ok(data_dir.join("cache.redb"))
    }

    /// Configured user id, or the machine hostname
    pub fn user_id(&self) -> Option<String> {
        self.identity
            .user_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
            })
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.retry.base_delay_ms),
            cap: Duration::from_millis(self.retry.max_delay_ms),
            max_retries: self.retry.max_retries,
        }
    }

    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            min_items: self.guard.min_items,
            max_removal_fraction: self.guard.max_removal_fraction,
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs.max(1))
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.remote.base_url, "http://localhost:8787");
        assert_eq!(config.remote.timeout_secs, 10);
        assert!(config.remote.api_key.is_none());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 8000);
        assert_eq!(config.reconcile.interval_secs, 30);
        assert_eq!(config.guard.min_items, 3);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[remote]
base_url = "https://assets.example.com"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.remote.base_url, "https://assets.example.com");
        assert_eq!(config.remote.timeout_secs, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.reconcile.interval_secs, 30);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[remote]
base_url = "https://assets.example.com"
api_key = "secret"
timeout_secs = 5

[identity]
user_id = "user-42"

[retry]
max_retries = 5
base_delay_ms = 250
max_delay_ms = 4000

[reconcile]
interval_secs = 60

[guard]
min_items = 5
max_removal_fraction = 0.5

[cache]
path = "/tmp/cache.redb"
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.remote.api_key.as_deref(), Some("secret"));
        assert_eq!(config.user_id().as_deref(), Some("user-42"));

        let backoff = config.backoff();
        assert_eq!(backoff.max_retries, 5);
        assert_eq!(backoff.base, Duration::from_millis(250));
        assert_eq!(backoff.cap, Duration::from_millis(4000));

        let policy = config.guard_policy();
        assert_eq!(policy.min_items, 5);
        assert_eq!(policy.max_removal_fraction, 0.5);

        assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
        assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/cache.redb"));
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.identity.user_id = Some("designer".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.identity.user_id.as_deref(), Some("designer"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }
}
