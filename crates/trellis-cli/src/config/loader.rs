//! Configuration file discovery and loading
//!
//! Supports every format the kernel loader understands: YAML, TOML, JSON, INI,
//! RON, JSON5.

use super::TrellisConfig;
use crate::CliError;
use std::path::{Path, PathBuf};
use trellis_kernel::config::{detect_format, load_with_env};

/// File names searched, in order, when no path is given
const DEFAULT_FILENAMES: &[&str] = &["trellis.toml", "trellis.yaml", "trellis.yml", "trellis.json"];

/// Environment prefix for overrides (`TRELLIS_ENGINE__MAX_STEPS=50`)
pub const ENV_PREFIX: &str = "TRELLIS";

/// Configuration loader with discovery support
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directories searched for a default config file
    search_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader searching the current directory
    pub fn new() -> Self {
        Self {
            search_paths: vec![PathBuf::from(".")],
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Search these directories instead
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// First default config file found in the search paths
    pub fn discover(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .flat_map(|dir| DEFAULT_FILENAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }

    /// Load `explicit`, or a discovered default file, or defaults alone.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(&self, explicit: Option<&Path>) -> Result<TrellisConfig, CliError> {
        let path = match explicit {
            Some(path) if !path.is_file() => {
                return Err(CliError::ConfigError(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            Some(path) => Some(path.to_path_buf()),
            None => self.discover(),
        };

        let path_str = match &path {
            Some(path) => {
                let s = path.to_str().ok_or_else(|| {
                    CliError::ConfigError(format!("config path {} is not UTF-8", path.display()))
                })?;
                detect_format(s).map_err(|e| CliError::ConfigError(e.to_string()))?;
                Some(s)
            }
            None => None,
        };

        tracing::debug!(path = ?path, prefix = %self.env_prefix, "loading configuration");
        load_with_env(path_str, &self.env_prefix).map_err(|e| {
            CliError::ConfigError(format!("Failed to load configuration: {}", e))
        })
    }
}
