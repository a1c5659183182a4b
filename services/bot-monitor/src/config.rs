//! Monitor Configuration
//!
//! Defaults overlaid by `BOT_MONITOR_*` environment variables.

use config::{Config, Environment};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::registry::REGISTRY_FILE;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "BOT_MONITOR";

#[derive(Clone, Deserialize)]
pub struct MonitorConfig {
    pub control_plane_url: String,
    #[serde(default)]
    pub control_plane_username: String,
    #[serde(default)]
    pub control_plane_password: String,
    pub request_timeout_secs: u64,
    pub registry_path: PathBuf,
    pub check_interval_secs: u64,
    pub heartbeat_cooldown_secs: u64,
    pub trade_dedup_capacity: usize,
    #[serde(default)]
    pub telegram_bot_token: String,
    /// Recipient for bots admitted without an explicit one
    #[serde(default)]
    pub telegram_chat_id: String,
    pub dry_run: bool,
    pub final_pnl_enabled: bool,
    pub final_pnl_attempts: u32,
    pub final_pnl_retry_secs: u64,
    pub log_level: String,
}

fn default_registry_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("bot-monitor").join(REGISTRY_FILE))
        .unwrap_or_else(|| PathBuf::from(REGISTRY_FILE))
}

impl MonitorConfig {
    /// Load from defaults and the environment
    pub fn load() -> Result<Self> {
        Self::load_with_overrides(&[])
    }

    /// Load with explicit key overrides taking precedence over the environment
    pub fn load_with_overrides(overrides: &[(&str, &str)]) -> Result<Self> {
        let registry_path = default_registry_path();

        let mut builder = Config::builder()
            .set_default("control_plane_url", "http://localhost:8000")?
            .set_default("request_timeout_secs", 30)?
            .set_default("registry_path", registry_path.to_string_lossy().to_string())?
            .set_default("check_interval_secs", 10)?
            .set_default("heartbeat_cooldown_secs", 300)?
            .set_default("trade_dedup_capacity", 1000)?
            .set_default("dry_run", false)?
            .set_default("final_pnl_enabled", false)?
            .set_default("final_pnl_attempts", 5)?
            .set_default("final_pnl_retry_secs", 10)?
            .set_default("log_level", "info")?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check values the loop cannot run without
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.control_plane_url.is_empty() {
            errors.push("control_plane_url must be set".to_string());
        }
        if self.control_plane_username.is_empty() || self.control_plane_password.is_empty() {
            errors.push("control_plane_username and control_plane_password are required".to_string());
        }
        if self.check_interval_secs == 0 {
            errors.push("check_interval_secs must be positive".to_string());
        }
        if self.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.trade_dedup_capacity == 0 {
            errors.push("trade_dedup_capacity must be positive".to_string());
        }
        if self.final_pnl_enabled && self.final_pnl_attempts == 0 {
            errors.push("final_pnl_attempts must be positive when final_pnl_enabled".to_string());
        }
        if !self.dry_run && (self.telegram_bot_token.is_empty() || self.telegram_chat_id.is_empty()) {
            errors.push("telegram_bot_token and telegram_chat_id are required unless dry_run".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Config(errors.join("; ")))
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.heartbeat_cooldown_secs).unwrap_or(i64::MAX))
    }

    pub fn final_pnl_retry(&self) -> Duration {
        Duration::from_secs(self.final_pnl_retry_secs)
    }
}

impl fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("control_plane_url", &self.control_plane_url)
            .field("control_plane_username", &self.control_plane_username)
            .field("control_plane_password", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("registry_path", &self.registry_path)
            .field("check_interval_secs", &self.check_interval_secs)
            .field("heartbeat_cooldown_secs", &self.heartbeat_cooldown_secs)
            .field("trade_dedup_capacity", &self.trade_dedup_capacity)
            .field("telegram_bot_token", &"<redacted>")
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("dry_run", &self.dry_run)
            .field("final_pnl_enabled", &self.final_pnl_enabled)
            .field("final_pnl_attempts", &self.final_pnl_attempts)
            .field("final_pnl_retry_secs", &self.final_pnl_retry_secs)
            .field("log_level", &self.log_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREDENTIALS: [(&str, &str); 4] = [
        ("control_plane_username", "admin"),
        ("control_plane_password", "secret"),
        ("telegram_bot_token", "bot-token"),
        ("telegram_chat_id", "chat-1"),
    ];

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::load_with_overrides(&CREDENTIALS).unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_cooldown(), chrono::Duration::seconds(300));
        assert_eq!(config.trade_dedup_capacity, 1000);
        assert!(config.registry_path.ends_with(REGISTRY_FILE));
        assert!(!config.final_pnl_enabled);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_overrides_parse_typed_values() {
        let mut overrides = CREDENTIALS.to_vec();
        overrides.push(("check_interval_secs", "30"));
        overrides.push(("dry_run", "true"));
        let config = MonitorConfig::load_with_overrides(&overrides).unwrap();
        assert_eq!(config.check_interval_secs, 30);
        assert!(config.dry_run);
    }

    #[test]
    fn test_validate_rejects_missing_credentials_and_zero_interval() {
        let config = MonitorConfig::load_with_overrides(&[("check_interval_secs", "0")]).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("control_plane_username"));
        assert!(err.contains("check_interval_secs"));
        assert!(err.contains("telegram_bot_token"));
    }

    #[test]
    fn test_dry_run_does_not_need_telegram() {
        let overrides = [
            ("control_plane_username", "admin"),
            ("control_plane_password", "secret"),
            ("dry_run", "true"),
        ];
        let config = MonitorConfig::load_with_overrides(&overrides).unwrap();
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = MonitorConfig::load_with_overrides(&CREDENTIALS).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("bot-token"));
    }
}
