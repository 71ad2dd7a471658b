use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while turning a configuration file into a
/// validated [`crate::model::Config`]. Parsing and validation are both
/// fatal-on-first-error: no partial config is ever handed back to a caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("failed to read {path_or_url}: {cause}")]
    Resource {
        path_or_url: String,
        cause: String,
    },

    #[error("request to {url} failed: {detail}")]
    Network { url: String, detail: String },
}

impl ConfigError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        ConfigError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ConfigError::Validation {
            message: message.into(),
        }
    }

    pub fn resource(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        ConfigError::Resource {
            path_or_url: path.into().display().to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn network(url: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        ConfigError::Network {
            url: url.into(),
            detail: detail.to_string(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
