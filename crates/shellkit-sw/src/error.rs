//! Error types.

use shellkit_net::NetError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by cache stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Quota exceeded: storing {needed} bytes would pass the {quota} byte quota")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Invalid generation name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Corrupt(error.to_string())
    }
}

/// Errors raised by the offline cache controller.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Seeding {url} failed: {reason}")]
    SeedFailed { url: String, reason: String },

    #[error("State error: {0}")]
    StateError(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
