use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while producing or parsing connection parameters.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("connection configuration is not valid JSON: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("connection configuration must be a JSON object")]
    NotAnObject,
    #[error("connection configuration is missing '{0}'")]
    MissingField(&'static str),
    #[error("connection configuration field '{0}' is empty")]
    EmptyField(&'static str),
    #[error("connection configuration field '{field}' is not an absolute URL: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("failed to read configuration file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("discovery service request failed: {0}")]
    Discovery(#[from] reqwest::Error),
    #[error("discovery service returned {status}")]
    DiscoveryStatus { status: reqwest::StatusCode },
    #[error("provider '{0}' asked for input again after receiving it")]
    InputLoop(&'static str),
    #[error("no configuration provider produced valid connection parameters")]
    NoProviderSucceeded,
}
