//! Configuration management for Lampstand
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{LampstandError, Result};
use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for Lampstand
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Message quota settings
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Durable store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Completion endpoint settings
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Chat behavior and entitlement settings
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Monthly message quota configuration
///
/// The limit and window are deployment constants, never per-user fields.
/// Per-user raises come from the entitlement provider instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Messages an unsubscribed user may send per window
    #[serde(default = "default_message_limit")]
    pub message_limit: u32,

    /// Length of the rolling window in days
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// How many times `increment` re-reads after losing a conditional write
    #[serde(default = "default_max_increment_attempts")]
    pub max_increment_attempts: u32,
}

fn default_message_limit() -> u32 {
    10
}

fn default_window_days() -> u32 {
    30
}

fn default_max_increment_attempts() -> u32 {
    8
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            message_limit: default_message_limit(),
            window_days: default_window_days(),
            max_increment_attempts: default_max_increment_attempts(),
        }
    }
}

impl QuotaConfig {
    /// The window as a chrono duration
    pub fn window(&self) -> Duration {
        Duration::days(i64::from(self.window_days))
    }
}

/// Which record store backend to use
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite file on disk
    #[default]
    Sqlite,
    /// In-process store, lost on exit
    Memory,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file; defaults to the platform data directory
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the database path, falling back to the user's data directory
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }

        let proj_dirs = ProjectDirs::from("org", "lampstand", "lampstand").ok_or_else(|| {
            LampstandError::Storage("Could not determine data directory".into())
        })?;
        Ok(proj_dirs.data_dir().join("lampstand.db"))
    }
}

/// OpenAI-compatible completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// API base URL (the `/chat/completions` path is appended)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_seconds: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_completion_timeout() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            timeout_seconds: default_completion_timeout(),
            temperature: default_temperature(),
        }
    }
}

/// Chat behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Characters of the first message kept in a session title
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,

    /// Book slugs whose conversations require a subscription
    #[serde(default)]
    pub premium_books: Vec<String>,

    /// User ids treated as subscribed by the static entitlement provider
    #[serde(default)]
    pub subscribers: Vec<String>,

    /// Per-user message limit overrides
    #[serde(default)]
    pub limit_overrides: HashMap<String, u32>,

    /// Interval between durable-copy polls while waiting for a remote turn
    #[serde(default = "default_reconcile_poll_interval_ms")]
    pub reconcile_poll_interval_ms: u64,

    /// Maximum polls while waiting for a remote turn
    #[serde(default = "default_reconcile_poll_attempts")]
    pub reconcile_poll_attempts: u32,
}

fn default_title_max_chars() -> usize {
    30
}

fn default_reconcile_poll_interval_ms() -> u64 {
    1_000
}

fn default_reconcile_poll_attempts() -> u32 {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_max_chars: default_title_max_chars(),
            premium_books: Vec::new(),
            subscribers: Vec::new(),
            limit_overrides: HashMap::new(),
            reconcile_poll_interval_ms: default_reconcile_poll_interval_ms(),
            reconcile_poll_attempts: default_reconcile_poll_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LampstandError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| LampstandError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(db) = std::env::var("LAMPSTAND_DB") {
            self.storage.db_path = Some(PathBuf::from(db));
        }

        if let Ok(backend) = std::env::var("LAMPSTAND_STORAGE_BACKEND") {
            self.storage.backend = match backend.to_lowercase().as_str() {
                "sqlite" => StorageBackend::Sqlite,
                "memory" => StorageBackend::Memory,
                _ => {
                    tracing::warn!("Invalid storage backend: {}, using default", backend);
                    StorageBackend::default()
                }
            };
        }

        if let Ok(api_base) = std::env::var("LAMPSTAND_API_BASE") {
            self.completion.api_base = api_base;
        }

        if let Ok(model) = std::env::var("LAMPSTAND_MODEL") {
            self.completion.model = model;
        }

        if let Ok(limit) = std::env::var("LAMPSTAND_MESSAGE_LIMIT") {
            match limit.parse::<u32>() {
                Ok(v) => {
                    self.quota.message_limit = v;
                    tracing::debug!(message_limit = v, "Env override: LAMPSTAND_MESSAGE_LIMIT");
                }
                Err(_) => tracing::warn!("Invalid LAMPSTAND_MESSAGE_LIMIT: {}", limit),
            }
        }

        if let Ok(days) = std::env::var("LAMPSTAND_WINDOW_DAYS") {
            match days.parse::<u32>() {
                Ok(v) => {
                    self.quota.window_days = v;
                    tracing::debug!(window_days = v, "Env override: LAMPSTAND_WINDOW_DAYS");
                }
                Err(_) => tracing::warn!("Invalid LAMPSTAND_WINDOW_DAYS: {}", days),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(db) = &cli.db {
            tracing::debug!("Using database override from CLI: {}", db.display());
            self.storage.db_path = Some(db.clone());
        }

        if cli.memory {
            self.storage.backend = StorageBackend::Memory;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.quota.window_days == 0 {
            return Err(
                LampstandError::Config("quota.window_days must be greater than 0".into()).into(),
            );
        }

        if self.quota.max_increment_attempts == 0 {
            return Err(LampstandError::Config(
                "quota.max_increment_attempts must be greater than 0".into(),
            )
            .into());
        }

        if self.chat.title_max_chars == 0 {
            return Err(
                LampstandError::Config("chat.title_max_chars must be greater than 0".into()).into(),
            );
        }

        if self.completion.api_base.trim().is_empty() {
            return Err(
                LampstandError::Config("completion.api_base cannot be empty".into()).into(),
            );
        }

        if self.completion.model.trim().is_empty() {
            return Err(LampstandError::Config("completion.model cannot be empty".into()).into());
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(LampstandError::Config(
                "completion.temperature must be between 0.0 and 2.0".into(),
            )
            .into());
        }

        if self.chat.reconcile_poll_attempts == 0 {
            return Err(LampstandError::Config(
                "chat.reconcile_poll_attempts must be greater than 0".into(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.quota.message_limit, 10);
        assert_eq!(config.quota.window_days, 30);
        assert_eq!(config.chat.title_max_chars, 30);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quota_window_duration() {
        let quota = QuotaConfig::default();
        assert_eq!(quota.window(), Duration::days(30));
    }

    #[test]
    fn test_config_validation_zero_window() {
        let mut config = Config::default();
        config.quota.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_title_chars() {
        let mut config = Config::default();
        config.chat.title_max_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_temperature() {
        let mut config = Config::default();
        config.completion.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_model() {
        let mut config = Config::default();
        config.completion.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limit_is_valid() {
        let mut config = Config::default();
        config.quota.message_limit = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
quota:
  message_limit: 25
storage:
  backend: memory
completion:
  model: llama3
chat:
  premium_books: ["apocalipse"]
  subscribers: ["user-1"]
  limit_overrides:
    user-2: 50
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("parse yaml");
        assert_eq!(config.quota.message_limit, 25);
        assert_eq!(config.quota.window_days, 30);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.completion.model, "llama3");
        assert_eq!(config.completion.api_base, "https://api.openai.com/v1");
        assert_eq!(config.chat.premium_books, vec!["apocalipse".to_string()]);
        assert_eq!(config.chat.limit_overrides.get("user-2"), Some(&50));
    }

    #[test]
    fn test_resolve_db_path_prefers_explicit_path() {
        let storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            db_path: Some(PathBuf::from("/tmp/lampstand-test.db")),
        };
        assert_eq!(
            storage.resolve_db_path().unwrap(),
            PathBuf::from("/tmp/lampstand-test.db")
        );
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        let cli = crate::cli::Cli::default();
        let config = Config::load("/nonexistent/lampstand.yaml", &cli).expect("load");
        assert_eq!(config.quota.message_limit, default_message_limit());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "quota:\n  window_days: 7\n").expect("write config");

        let cli = crate::cli::Cli::default();
        let config = Config::load(path.to_str().unwrap(), &cli).expect("load");
        assert_eq!(config.quota.window_days, 7);
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "quota: [not, a, map").expect("write config");

        let cli = crate::cli::Cli::default();
        let err = Config::load(path.to_str().unwrap(), &cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LampstandError>(),
            Some(LampstandError::Config(_))
        ));
    }

    #[test]
    #[serial]
    fn test_apply_env_vars_overrides_fields() {
        std::env::set_var("LAMPSTAND_MESSAGE_LIMIT", "3");
        std::env::set_var("LAMPSTAND_STORAGE_BACKEND", "memory");
        std::env::set_var("LAMPSTAND_MODEL", "test-model");

        let mut config = Config::default();
        config.apply_env_vars();

        assert_eq!(config.quota.message_limit, 3);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.completion.model, "test-model");

        std::env::remove_var("LAMPSTAND_MESSAGE_LIMIT");
        std::env::remove_var("LAMPSTAND_STORAGE_BACKEND");
        std::env::remove_var("LAMPSTAND_MODEL");
    }

    #[test]
    #[serial]
    fn test_invalid_env_limit_is_ignored() {
        std::env::set_var("LAMPSTAND_MESSAGE_LIMIT", "lots");

        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(config.quota.message_limit, 10);

        std::env::remove_var("LAMPSTAND_MESSAGE_LIMIT");
    }

    #[test]
    fn test_cli_overrides_apply() {
        let cli = crate::cli::Cli {
            db: Some(PathBuf::from("/tmp/override.db")),
            memory: true,
            ..Default::default()
        };
        let mut config = Config::default();
        config.apply_cli_overrides(&cli);
        assert_eq!(config.storage.db_path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }
}
