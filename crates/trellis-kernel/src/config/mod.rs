//! Configuration loading
//!
//! Loads typed configuration from YAML, TOML, JSON, INI, RON or JSON5 files.
//!
//! ## Features
//!
//! - Auto-detection of format from file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Layered merging of several sources, later ones winning
//! - `PREFIX__NESTED__KEY` environment overrides

use config::{Config as Cfg, ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME` syntax. References to unset
/// variables are left as written.
///
/// # Example
///
/// ```rust,ignore
/// let result = substitute_env_vars("api_key_env = \"${KEY_VAR}\"")?;
/// ```
pub fn substitute_env_vars(content: &str) -> ConfigResult<String> {
    let re_braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let result = re_braced
        .replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    let re_simple = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b")
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    let result = re_simple
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string();

    Ok(result)
}

fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &str,
) -> ConfigResult<ConfigBuilder<DefaultState>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content)?;
    Ok(builder.add_source(File::from_str(&substituted, format)))
}

fn finish<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> ConfigResult<T> {
    let config = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a file
///
/// # Example
///
/// ```rust,ignore
/// let engine: GraphConfig = load_config("engine.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    finish(add_file(Cfg::builder(), path)?)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted = substitute_env_vars(content)?;
    finish(Cfg::builder().add_source(File::from_str(&substituted, format)))
}

/// Merge multiple configuration sources; later sources override earlier ones
pub fn merge_configs<T>(sources: &[(&str, FileFormat)]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        let substituted = substitute_env_vars(content)?;
        builder = builder.add_source(File::from_str(&substituted, *format));
    }
    finish(builder)
}

/// Load configuration from multiple files with later files overriding earlier ones
pub fn load_merged<T>(paths: &[&str]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for path in paths {
        builder = add_file(builder, path)?;
    }
    finish(builder)
}

/// Load configuration with environment variable overrides
///
/// Environment variables are prefixed with `env_prefix` and use double
/// underscores for nesting: `TRELLIS_ENGINE__MAX_STEPS=50` overrides
/// `engine.max_steps`. A missing `path` yields a config built from the
/// environment alone, so serde defaults fill the rest.
pub fn load_with_env<T>(path: Option<&str>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    if let Some(path) = path {
        builder = add_file(builder, path)?;
    }
    finish(
        builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        ),
    )
}
