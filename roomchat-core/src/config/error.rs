//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot encode config as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A value that could not be parsed, from the environment or a flag
    #[error("bad value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid [{section}] settings: {reason}")]
    Validation {
        section: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            section,
            reason: reason.into(),
        }
    }
}
