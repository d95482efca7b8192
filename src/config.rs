//! Configuration loader and validator for the workspace sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub github: Github,
    pub tracker: Tracker,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub sync_interval_secs: u64,
    pub staleness_minutes: i64,
    pub page_size: i64,
}

/// GitHub API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Github {
    pub token: String,
    pub api_base: String,
    pub graphql_url: String,
}

/// Repository tracking (polling supervisor) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tracker {
    pub endpoint: String,
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

impl App {
    /// `data_dir` with a leading `~/` expanded against `HOME`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.sync_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_secs must be > 0"));
    }
    if cfg.app.staleness_minutes <= 0 {
        return Err(ConfigError::Invalid("app.staleness_minutes must be > 0"));
    }
    if cfg.app.page_size <= 0 {
        return Err(ConfigError::Invalid("app.page_size must be > 0"));
    }

    if cfg.github.token.trim().is_empty() {
        return Err(ConfigError::Invalid("github.token must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.github.api_base).is_err() {
        return Err(ConfigError::Invalid("github.api_base must be a valid URL"));
    }
    if reqwest::Url::parse(&cfg.github.graphql_url).is_err() {
        return Err(ConfigError::Invalid(
            "github.graphql_url must be a valid URL",
        ));
    }

    if reqwest::Url::parse(&cfg.tracker.endpoint).is_err() {
        return Err(ConfigError::Invalid("tracker.endpoint must be a valid URL"));
    }
    if cfg.tracker.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "tracker.poll_interval_secs must be > 0",
        ));
    }
    if cfg.tracker.max_attempts == 0 {
        return Err(ConfigError::Invalid("tracker.max_attempts must be > 0"));
    }

    Ok(())
}

/// Canonical example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  sync_interval_secs: 300
  staleness_minutes: 60
  page_size: 100

github:
  token: "YOUR_GITHUB_TOKEN"
  api_base: "https://api.github.com/"
  graphql_url: "https://api.github.com/graphql"

tracker:
  endpoint: "https://contributor.example/api/track-repository"
  poll_interval_secs: 2
  max_attempts: 60
"#
}
