//! Scrumbot configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScrumError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrumbotConfig {
    /// SQLite database file. `~` is expanded.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub archival: ArchivalConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

fn default_database_path() -> String { "~/.scrumbot/scrumbot.db".into() }

impl Default for ScrumbotConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            sweep: SweepConfig::default(),
            dispatch: DispatchConfig::default(),
            archival: ArchivalConfig::default(),
            telegram: TelegramConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl ScrumbotConfig {
    /// Load config from the default path (~/.scrumbot/config.toml), or
    /// defaults plus environment overrides when there is no file.
    pub fn load() -> Result<Self> {
        Self::load_with(&Self::default_path(), env_var)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_toml_with(&read_config(path)?, env_var)
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::from_toml_with(content, env_var)
    }

    fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if path.exists() {
            return Self::from_toml_with(&read_config(path)?, lookup);
        }
        let mut config = Self::default();
        config.apply_env(lookup);
        Ok(config)
    }

    fn from_toml_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| ScrumError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env(lookup);
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ScrumError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Scrumbot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".scrumbot")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Secrets may come from the environment instead of the file.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TELEGRAM_TOKEN_VAR).filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
        }
    }
}

const TELEGRAM_TOKEN_VAR: &str = "SCRUMBOT_TELEGRAM_BOT_TOKEN";

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ScrumError::Config(format!("Failed to read config: {e}")))
}

/// Hourly sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweeps when not aligned to the hour.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Sleep until the top of the next UTC hour instead of a fixed interval.
    #[serde(default = "bool_true")]
    pub align_to_hour: bool,
}

fn bool_true() -> bool { true }
fn default_sweep_interval() -> u64 { 3600 }

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            align_to_hour: true,
        }
    }
}

/// Notification retry policy for start messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u8 { 2 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_max_backoff_ms() -> u64 { 10_000 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Monthly purge of old runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivalConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Five-field cron rule; `L` in the day-of-month field means the last day.
    #[serde(default = "default_archival_cron")]
    pub cron: String,
    #[serde(default = "default_archival_zone")]
    pub time_zone: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_archival_cron() -> String { "0 0 L * *".into() }
fn default_archival_zone() -> String { "UTC".into() }
fn default_retention_days() -> u32 { 60 }

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_archival_cron(),
            time_zone: default_archival_zone(),
            retention_days: default_retention_days(),
        }
    }
}

/// Telegram Bot API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Override for tests and self-hosted Bot API servers.
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api(),
        }
    }
}

/// Outbound webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Extra headers sent with every webhook request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 { 10 }

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout_secs: default_webhook_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = ScrumbotConfig::from_toml("").unwrap();
        assert!(config.sweep.align_to_hour);
        assert_eq!(config.sweep.interval_secs, 3600);
        assert_eq!(config.dispatch.max_retries, 2);
        assert_eq!(config.dispatch.initial_backoff_ms, 1000);
        assert_eq!(config.archival.retention_days, 60);
        assert_eq!(config.archival.cron, "0 0 L * *");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.webhook.timeout_secs, 10);
    }

    #[test]
    fn test_partial_override() {
        let config = ScrumbotConfig::from_toml(
            r#"
            database_path = "/tmp/scrum.db"

            [archival]
            retention_days = 30

            [dispatch]
            max_retries = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/scrum.db"));
        assert_eq!(config.archival.retention_days, 30);
        assert!(config.archival.enabled);
        assert_eq!(config.dispatch.max_retries, 4);
        assert_eq!(config.dispatch.max_backoff_ms, 10_000);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = ScrumbotConfig::from_toml("sweep = 3").unwrap_err();
        assert!(matches!(err, ScrumError::Config(_)));
    }

    #[test]
    fn test_save_to_and_reload() {
        let dir = std::env::temp_dir().join(format!("scrumbot-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("config.toml");
        let mut config = ScrumbotConfig::default();
        config.archival.retention_days = 90;
        config.sweep.align_to_hour = false;
        config.save_to(&path).unwrap();

        let loaded = ScrumbotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.archival.retention_days, 90);
        assert!(!loaded.sweep.align_to_hour);
        std::fs::remove_dir_all(&dir).ok();
    }

    fn token_env(key: &str) -> Option<String> {
        (key == TELEGRAM_TOKEN_VAR).then(|| "123:env-token".to_string())
    }

    #[test]
    fn test_env_token_applies_without_config_file() {
        let missing = std::env::temp_dir()
            .join(format!("scrumbot-missing-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        let config = ScrumbotConfig::load_with(&missing, token_env).unwrap();
        assert_eq!(config.telegram.bot_token, "123:env-token");
        assert_eq!(config.archival.retention_days, 60);
    }

    #[test]
    fn test_env_token_overrides_file() {
        let toml = "[telegram]\nbot_token = \"from-file\"\n";
        let config = ScrumbotConfig::from_toml_with(toml, token_env).unwrap();
        assert_eq!(config.telegram.bot_token, "123:env-token");

        let config = ScrumbotConfig::from_toml_with(toml, |_| Some(String::new())).unwrap();
        assert_eq!(config.telegram.bot_token, "from-file");
        let config = ScrumbotConfig::from_toml_with(toml, |_| None).unwrap();
        assert_eq!(config.telegram.bot_token, "from-file");
    }
}
