use std::path::{Path, PathBuf};

use segmentation_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const DEFAULT_CONFIG_DIR: &str = "config";

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::with_dir(DEFAULT_CONFIG_DIR)
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load the config file and apply overrides from the process environment.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = self.load_file()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read `config.yml` (preferred) or `config.toml`, falling back to defaults.
    pub fn load_file(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlay environment values onto a loaded config. `lookup` abstracts the
/// environment so tests do not have to mutate process state.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key).filter(|v| !v.trim().is_empty()).inspect(|_| {
            debug!("config override from environment: {key}");
        })
    };

    if let Some(host) = get("HTTP_HOST") {
        config.http.host = host;
    }
    if let Some(port) = get("HTTP_PORT") {
        config.http.port = parse_env("HTTP_PORT", &port)?;
    }
    if let Some(report_host) = get("HTTP_REPORT_HOST") {
        config.http.report_host = Some(report_host);
    }
    if let Some(path) = get("DATABASE_PATH") {
        config.database.path = PathBuf::from(path);
    }
    if let Some(size) = get("DATABASE_POOL_SIZE") {
        config.database.pool_size = parse_env("DATABASE_POOL_SIZE", &size)?;
    }
    if let Some(dir) = get("REPORTS_DIR") {
        config.reports.dir = PathBuf::from(dir);
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.log_level = Some(level);
    }

    if config.database.pool_size == 0 {
        return Err(Error::Config("database.pool_size must be at least 1".into()));
    }

    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
}
