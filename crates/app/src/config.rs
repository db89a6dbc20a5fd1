use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const CONFIG_DIR_NAME: &str = "meter-store";
const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_DATABASE_CONNECTION: &str = "sqlite://localhost/meter.sqlite";
const DEFAULT_LOG_FILTER: &str = "info";

/// Overrides `database_connection` when set and non-empty.
pub const DATABASE_CONNECTION_ENV: &str = "METER_DATABASE_CONNECTION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_connection: String,
    pub log_filter: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_connection: DEFAULT_DATABASE_CONNECTION.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn apply_env(&mut self) {
        self.apply_database_override(std::env::var(DATABASE_CONNECTION_ENV).ok());
    }

    pub fn apply_database_override(&mut self, value: Option<String>) {
        if let Some(value) = value
            && !value.trim().is_empty()
        {
            self.database_connection = value.trim().to_string();
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: StoreConfig,
    pub paths: ConfigPaths,
    pub created: bool,
}

/// Reads the config at `file`, writing the defaults there first when it
/// does not exist yet.
pub fn load_or_create(file: &Path) -> Result<ConfigLoad> {
    let paths = ConfigPaths {
        file: file.to_path_buf(),
    };

    if paths.file.exists() {
        let contents = fs::read_to_string(&paths.file)?;
        let config: StoreConfig = toml::from_str(&contents)?;
        return Ok(ConfigLoad {
            config,
            paths,
            created: false,
        });
    }

    if let Some(dir) = paths.file.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }
    let config = StoreConfig::default();
    fs::write(&paths.file, toml::to_string_pretty(&config)?)?;

    Ok(ConfigLoad {
        config,
        paths,
        created: true,
    })
}

/// `$XDG_CONFIG_HOME/meter-store/config.toml`, falling back to
/// `$HOME/.config`.
pub fn default_config_path() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| AppError::Message("resolve HOME: not set".to_string()))?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let first = load_or_create(&file).expect("create");
        assert!(first.created);
        assert_eq!(first.config, StoreConfig::default());
        assert!(file.exists());

        let second = load_or_create(&file).expect("load");
        assert!(!second.created);
        assert_eq!(second.config, first.config);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file, "log_filter = \"debug\"\n").expect("write");

        let load = load_or_create(&file).expect("load");
        assert_eq!(load.config.log_filter, "debug");
        assert_eq!(load.config.database_connection, DEFAULT_DATABASE_CONNECTION);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&file, "database_connection = [").expect("write");
        assert!(matches!(
            load_or_create(&file),
            Err(AppError::ConfigParse(_))
        ));
    }

    #[test]
    fn blank_override_is_ignored() {
        let mut config = StoreConfig::default();
        config.apply_database_override(Some("  ".to_string()));
        assert_eq!(config.database_connection, DEFAULT_DATABASE_CONNECTION);
        config.apply_database_override(Some("memory://localhost/test".to_string()));
        assert_eq!(config.database_connection, "memory://localhost/test");
    }
}
