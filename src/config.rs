//! Immutable application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, `hunt.toml` in the
//! data directory, an explicit `--config` file, then `HUNT_*` environment
//! variables (`HUNT_SCAN__CONCURRENCY=8`). The loaded value is validated once
//! and passed by reference into every pipeline call.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HuntError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub email: EmailSettings,
    pub ai: AiConfig,
    pub scan: ScanConfig,
    pub retry: RetryConfig,
    pub preferences: Preferences,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to `hunt.db` in the XDG data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password_file: Option<PathBuf>,
    pub mailbox: String,
    pub timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            username: String::new(),
            password_file: None,
            mailbox: "INBOX".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Max jobs scored at once.
    pub concurrency: usize,
    /// Window used when no checkpoint exists yet.
    pub initial_lookback_days: u32,
    pub resume_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            initial_lookback_days: 7,
            resume_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_secs: 60,
        }
    }
}

/// What the user is looking for. Read by the filter chain and the baseline phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub locations: Vec<String>,
    pub remote_ok: bool,
    pub min_salary: Option<i64>,
    pub exclude_aggregators: bool,
    pub target_roles: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            remote_ok: true,
            min_salary: None,
            exclude_aggregators: false,
            target_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub ghosting_days: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { ghosting_days: 14 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(dir) = data_dir() {
            builder = builder.add_source(File::from(dir.join("hunt.toml")).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("HUNT")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("preferences.locations")
                .with_list_parse_key("preferences.target_roles")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| HuntError::Configuration(format!("failed to load configuration: {}", e)))?;

        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.concurrency == 0 {
            return Err(HuntError::Configuration(
                "scan.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HuntError::Configuration(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry.timeout_secs == 0 {
            return Err(HuntError::Configuration(
                "retry.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.monitor.ghosting_days <= 0 {
            return Err(HuntError::Configuration(
                "monitor.ghosting_days must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(HuntError::Configuration(format!(
                "invalid log level '{}', expected one of {:?}",
                self.logging.level, valid_levels
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(path) => path.clone(),
            None => data_dir()
                .map(|dir| dir.join("hunt.db"))
                .unwrap_or_else(|| PathBuf::from("hunt.db")),
        }
    }

    /// Resume text used by both scoring phases. Required for scans.
    pub fn resume_text(&self) -> Result<String> {
        let path = self.scan.resume_path.as_ref().ok_or_else(|| {
            HuntError::Configuration("scan.resume_path is not set".to_string())
        })?;
        let path = expand_home(path);
        std::fs::read_to_string(&path).map_err(|e| {
            HuntError::Configuration(format!("cannot read resume {}: {}", path.display(), e))
        })
    }
}

fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hunt").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
