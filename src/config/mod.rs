//! Configuration module for the compressor
//!
//! Two layers of configuration exist:
//!
//! - [`Config`]: an optional YAML file describing how to reach the object
//!   store plus a map of transfer variables. Supports `${VAR}` and
//!   `${VAR:-default}` environment expansion.
//! - [`TransferConfig`]: the per-invocation transfer settings, resolved once
//!   from a [`ConfigSource`]. Resolution never fails; bad values fall back to
//!   defaults and out-of-range values are clamped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

mod loader;
mod transfer;

pub use loader::ConfigLoader;
pub use transfer::{
    ConfigSource, EnvSource, LayeredSource, TransferConfig, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_FILE_PART_READ_SIZE_MB, DEFAULT_MINIMUM_UPLOAD_SIZE_MB, MAX_COMPRESSION_LEVEL,
    MAX_FILE_PART_READ_SIZE_MB, MAX_MINIMUM_UPLOAD_SIZE_MB, MB, MIN_FILE_PART_READ_SIZE_MB,
    MIN_MINIMUM_UPLOAD_SIZE_MB,
};

/// Substitute `${NAME}` and `${NAME:-fallback}` references from the
/// process environment. Unset names without a fallback stay verbatim.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let Ok(pattern) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
        return s.to_string();
    };

    pattern
        .replace_all(s, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                caps.get(2)
                    .or_else(|| caps.get(0))
                    .map_or_else(String::new, |m| m.as_str().to_string())
            })
        })
        .into_owned()
}

fn is_http_endpoint(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed configuration: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Configuration rejected: {0}")]
    ValidationError(String),
}

/// Configuration file structure
///
/// ```yaml
/// store:
///   region: "us-east-1"
///   endpoint: "${S3_ENDPOINT:-http://localhost:9000}"
///   force_path_style: true
/// variables:
///   MinimumUploadSizeMB: "64"
///   OutputFolderPath: "compressed"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    /// Transfer variables, overridden by the process environment.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref endpoint) = self.store.endpoint {
            if !is_http_endpoint(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid store endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        match (&self.store.access_key, &self.store.secret_key) {
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::ValidationError(
                "access_key and secret_key must be configured together".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Object store connection settings
///
/// Anything left unset falls back to the AWS default provider chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default, deserialize_with = "deserialize_optional_nonempty")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nonempty")]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nonempty")]
    pub access_key: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nonempty")]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

/// Deserialize an optional string, treating blank values as unset.
///
/// Expansion already happened over the whole document in [`ConfigLoader`],
/// so `${VAR:-}` arrives here as an empty string.
fn deserialize_optional_nonempty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
