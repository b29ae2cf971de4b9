//! Configuration loading from permctl.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// Where the permission database lives.
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database file. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceConfig {
    /// How often an unpinned edit re-reads and retries after losing a
    /// write race.
    #[serde(default)]
    pub conflict_retries: u32,
}

fn default_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the database path, falling back to the data directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => dirs_data_dir()
                .map(|dir| dir.join("permissions.db"))
                .ok_or(ConfigError::NoDataDir),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("no data directory found: set database.path in permctl.toml")]
    NoDataDir,
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/permctl"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("permctl"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("permctl"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
[database]
path = "/tmp/perms.db"

[log]
level = "debug"

[service]
conflict_retries = 3
"#;
        let config = Config::parse(toml).unwrap();

        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/perms.db"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.service.conflict_retries, 3);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();

        assert!(config.database.path.is_none());
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.service.conflict_retries, 0);
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(matches!(
            Config::parse("[service]\nconflict_retries = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
