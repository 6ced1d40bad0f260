//! Configuration.
//!
//! [`ContextParams`] carries the per-context knobs every transport
//! constructor accepts. [`IioConfig`] is the file/environment configuration
//! used by applications such as `iio_info`; it is loaded with figment from:
//! 1. built-in defaults
//! 2. `iio.toml` (or another file passed to [`IioConfig::load_from`])
//! 3. environment variables prefixed with `IIO_`, nested keys separated by
//!    a double underscore
//!
//! # Example
//! ```no_run
//! use rust_iio::config::IioConfig;
//!
//! // IIO_URI=ip:192.168.2.1 IIO_LOG__LEVEL=debug
//! let config = IioConfig::load()?;
//! config.validate().map_err(rust_iio::IioError::invalid)?;
//! # Ok::<(), rust_iio::IioError>(())
//! ```

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{IioError, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "iio.toml";

/// Parameters applied when a context is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextParams {
    /// I/O timeout in milliseconds; 0 selects the transport's default
    pub timeout_ms: u32,
}

impl ContextParams {
    /// Parameters with an explicit timeout.
    pub fn with_timeout(timeout_ms: u32) -> Self {
        Self { timeout_ms }
    }

    /// The configured timeout, or `default` if none was chosen.
    pub fn timeout_or(&self, default: u32) -> u32 {
        if self.timeout_ms == 0 {
            default
        } else {
            self.timeout_ms
        }
    }
}

/// Logging section of [`IioConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IioConfig {
    /// Context URI, e.g. `ip:192.168.2.1` or `xml:/tmp/board.xml`
    #[serde(default)]
    pub uri: Option<String>,
    /// I/O timeout in milliseconds (0 = transport default)
    #[serde(default)]
    pub timeout_ms: u32,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

impl IioConfig {
    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment. A missing
    /// file is not an error.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("IIO_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> std::result::Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.log.format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.log.format,
                valid_formats.join(", ")
            ));
        }

        if let Some(uri) = &self.uri {
            if !uri.contains(':') {
                return Err(format!("Invalid URI '{uri}': expected <backend>:<address>"));
            }
        }

        Ok(())
    }

    /// Context parameters derived from this configuration.
    pub fn context_params(&self) -> ContextParams {
        ContextParams::with_timeout(self.timeout_ms)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IioError::Config {
            message: e.to_string(),
        })
    }
}
