//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use taospipe_core::{DEFAULT_MAX_BATCH_BYTES, DEFAULT_WORKERS, RetryPolicy};
use taospipe_rest::RestConfig;

/// Global configuration for taospipe
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub user: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
    pub database: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6041".to_string(),
            user: "root".to_string(),
            password: std::env::var("TAOS_PASSWORD").ok(),
            database: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Defaults to `workers` when unset
    pub queue_capacity: Option<usize>,
    pub max_batch_bytes: usize,
    pub retry_interval_ms: u64,
    pub show_sql: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            retry_interval_ms: 3000,
            show_sql: false,
        }
    }
}

/// Retry budget for `exec` and `query` (the load pipeline always retries)
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            interval_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.max_retries, Duration::from_millis(self.interval_ms))
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./taospipe.toml (current directory)
    /// 2. ~/.config/taospipe/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("taospipe.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "taospipe") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            url: self.connection.url.clone(),
            user: self.connection.user.clone(),
            password: self
                .connection
                .password
                .clone()
                .unwrap_or_else(|| "taosdata".to_string()),
            database: self.connection.database.clone(),
            timeout: Duration::from_secs(self.connection.timeout_secs),
            pool_size: self.pipeline.workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.connection.url, "http://localhost:6041");
        assert_eq!(config.pipeline.workers, 10);
        assert_eq!(config.pipeline.max_batch_bytes, 1024 * 1024);
        assert!(config.pipeline.queue_capacity.is_none());
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_TAOSPIPE_VAR_12345}"), None);
    }

    #[test]
    fn expand_env_var_present() {
        // PATH is set in any test environment
        assert_eq!(expand_env_var("${PATH}"), std::env::var("PATH").ok());
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[connection]
url = "http://td.internal:6041"
user = "writer"
password = "secret"
database = "power"

[pipeline]
workers = 4
queue_capacity = 16
max_batch_bytes = 524288
show_sql = true

[retry]
max_retries = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.user, "writer");
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.queue_capacity, Some(16));
        assert_eq!(config.pipeline.max_batch_bytes, 512 * 1024);
        assert!(config.pipeline.show_sql);
        assert_eq!(config.pipeline.retry_interval_ms, 3000);
        assert_eq!(config.retry.policy(), RetryPolicy::bounded(0, Duration::from_millis(1000)));

        let rest = config.rest_config();
        assert_eq!(rest.endpoint(), "http://td.internal:6041/rest/sql/power");
        assert_eq!(rest.pool_size, 4);
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pipeline]\nworkers = \"many\"").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }
}
