//! Client configuration, read from `<config dir>/tolino/config.toml`.
//!
//! Every key is optional; command line flags take precedence over the
//! account defaults stored here.

use crate::error::ConfigError;
use crate::partners::Partner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Subdirectory of the platform config directory.
const APP_NAME: &str = "tolino";

const CONFIG_FILENAME: &str = "config.toml";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default account credentials.
    pub account: AccountConfig,

    /// HTTP client settings.
    pub http: HttpConfig,

    /// Enable debug logging.
    pub debug: bool,

    /// Extra partner descriptors, merged over the built-in registry.
    pub partners: Vec<Partner>,
}

/// Defaults for the `--user`, `--password` and `--partner` flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Username, usually an email address.
    pub user: Option<String>,

    pub password: Option<String>,

    /// Partner id.
    pub partner: Option<u32>,
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User agent sent to storefronts and the backend.
    pub user_agent: String,

    /// Per-request timeout in seconds.
    pub timeout_sec: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            timeout_sec: 30,
        }
    }
}

impl Config {
    /// Platform config directory joined with the application name.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Reads `path`; a missing file yields the defaults and nothing is written.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Rejects values the HTTP layer or the partner registry cannot use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http.timeout_sec".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.http.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "http.user_agent".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        for partner in &self.partners {
            partner
                .validate()
                .map_err(|e| ConfigError::InvalidValue {
                    key: format!("partners[{}]", partner.id),
                    message: e.to_string(),
                })?;
        }

        Ok(())
    }
}
