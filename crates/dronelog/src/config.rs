//! Configuration management for dronelog.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.
//!
//! Configuration describes the deployment (where the database lives, which
//! delivery policy and transport to use). User preferences such as the chosen
//! provider or destination link are [`crate::settings::Settings`] and live in
//! the local store instead.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{DeliveryPolicy, TransportMode};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "dronelog";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "logbook.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `DRONELOG_`, sections split on `__`)
/// 2. TOML config file at `~/.config/dronelog/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Defaults applied when settings leave a value unset.
    pub defaults: DefaultsConfig,
    /// Weather lookup configuration.
    pub weather: WeatherConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/dronelog/logbook.db`
    pub database_path: Option<PathBuf>,
}

/// Sync-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How the queue is handed to the destination.
    pub policy: DeliveryPolicy,
    /// Whether destination responses are read (`json`) or ignored (`opaque`).
    pub transport: TransportMode,
    /// HTTP request timeout in seconds. 0 leaves the client default in place.
    pub request_timeout_secs: u64,
    /// Base URL of the Microsoft Graph API.
    pub graph_base_url: String,
}

/// Fallback values for settings the user has not chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// IANA timezone name stamped on records.
    pub timezone: String,
    /// Excel table that receives rows on the Microsoft path.
    pub table_name: String,
}

/// Weather lookup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Base URL of the Open-Meteo compatible forecast service.
    pub base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            policy: DeliveryPolicy::PerRecord,
            transport: TransportMode::Json,
            request_timeout_secs: 30,
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Vancouver".to_string(),
            table_name: "FlightLogTable".to_string(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the TOML file at `config_path` (or
    /// [`Config::default_config_path`]) and `DRONELOG_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("DRONELOG_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sync.graph_base_url", &self.sync.graph_base_url),
            ("weather.base_url", &self.weather.base_url),
        ] {
            match reqwest::Url::parse(value) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                _ => {
                    return Err(Error::config(format!(
                        "{name} must be an http(s) URL, got {value:?}"
                    )))
                }
            }
        }

        if self.defaults.timezone.trim().is_empty() {
            return Err(Error::config("defaults.timezone must not be empty"));
        }

        if self.defaults.table_name.trim().is_empty() {
            return Err(Error::config("defaults.table_name must not be empty"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the request timeout, or `None` to keep the client default.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.sync.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sync.request_timeout_secs))
        }
    }
}
