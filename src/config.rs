use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

pub const CONFIG_ENV: &str = "GENSTUDIO_CONFIG";

/// Runtime settings shared by the AppSpec pipeline and the workflow engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelConfig {
    /// Number of executions kept by the in-memory history.
    pub history_capacity: usize,
    pub repair_max_attempts: u32,
    pub http_timeout_ms: u64,
    pub llm_timeout_ms: u64,
    pub log_level: String,
    pub generator_url: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            repair_max_attempts: 2,
            http_timeout_ms: 30_000,
            llm_timeout_ms: 60_000,
            log_level: "info".to_string(),
            generator_url: None,
        }
    }
}

impl KernelConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm_timeout_ms)
    }

    pub fn level(&self) -> Result<LogLevel> {
        self.log_level.parse()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| anyhow!("invalid kernel config: {err}"))
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    /// Load from `explicit`, `$GENSTUDIO_CONFIG`, or the user config dir, then
    /// apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_var("GENSTUDIO_HISTORY_CAPACITY") {
            self.history_capacity = parse_env("GENSTUDIO_HISTORY_CAPACITY", &value)?;
        }
        if let Some(value) = env_var("GENSTUDIO_REPAIR_ATTEMPTS") {
            self.repair_max_attempts = parse_env("GENSTUDIO_REPAIR_ATTEMPTS", &value)?;
        }
        if let Some(value) = env_var("GENSTUDIO_HTTP_TIMEOUT_MS") {
            self.http_timeout_ms = parse_env("GENSTUDIO_HTTP_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env_var("GENSTUDIO_LLM_TIMEOUT_MS") {
            self.llm_timeout_ms = parse_env("GENSTUDIO_LLM_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env_var("GENSTUDIO_LOG_LEVEL") {
            value.parse::<LogLevel>()?;
            self.log_level = value;
        }
        if let Some(value) = env_var("GENSTUDIO_GENERATOR_URL") {
            self.generator_url = Some(value);
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = env_var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("genstudio").join("kernel.toml"))
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{name} must be a number, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = KernelConfig::from_toml_str("historyCapacity = 5\nlogLevel = \"debug\"")
            .unwrap();
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.level().unwrap(), LogLevel::Debug);
        assert_eq!(config.repair_max_attempts, 2);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(KernelConfig::from_toml_str("historyCapacity = \"many\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = KernelConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config, KernelConfig::default());
    }
}
