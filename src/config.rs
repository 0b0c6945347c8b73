//! TOML configuration for the CLI and embedding applications.
//!
//! ```toml
//! log_level = "info"
//!
//! [screen]
//! extra_keywords = ["sleep", "benchmark"]
//!
//! [sqlite]
//! path = "app.db"
//! transactional = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::InjectionScreen;

/// Top-level configuration. Every section is optional.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CradleConfig {
    /// `tracing` filter directive used by [`crate::logging::init_logging`].
    pub log_level: String,
    /// Injection screen settings.
    pub screen: ScreenSection,
    /// SQLite runtime settings.
    pub sqlite: SqliteSection,
}

impl Default for CradleConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            screen: ScreenSection::default(),
            sqlite: SqliteSection::default(),
        }
    }
}

/// Injection screen settings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScreenSection {
    /// Keywords denied in addition to the built-in list.
    pub extra_keywords: Vec<String>,
}

/// SQLite runtime settings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SqliteSection {
    /// Default database file.
    pub path: Option<PathBuf>,
    /// Run every query inside a transaction.
    pub transactional: bool,
}

impl CradleConfig {
    /// Loads the configuration from `explicit`, or from
    /// [`default_config_path`] when none is given. A missing file yields the
    /// defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        match explicit.or_else(default_config_path) {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the injection screen described by the `[screen]` section.
    pub fn screen(&self) -> Result<InjectionScreen, ConfigError> {
        InjectionScreen::with_keywords(&self.screen.extra_keywords)
            .map_err(|source| ConfigError::Screen { source })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`CradleConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A configured keyword produced an invalid screen pattern.
    #[error("invalid screen keywords: {source}")]
    Screen {
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// Default config location: `<config dir>/cradle/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("cradle").join("config.toml"))
}
