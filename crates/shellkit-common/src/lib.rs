//! # shellkit Common
//!
//! Shared error type and logging setup for the shellkit offline cache
//! controller and its tooling.
//!
//! ## Features
//!
//! - Unified application-level error with categories and backtraces
//! - Logging configuration and subscriber installation
//! - `ResultExt::context` for turning foreign errors into internal errors

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for shellkit hosts and tools.
///
/// Library crates keep their own narrow error enums; this type is what a host
/// converts them into at the application boundary.
#[derive(Error, Debug)]
pub enum ShellKitError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Controller lifecycle errors (seeding, activation, interception).
    #[error("Controller error: {message}")]
    Controller {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl ShellKitError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a controller error.
    pub fn controller(message: impl Into<String>) -> Self {
        Self::Controller {
            message: message.into(),
            source: None,
        }
    }

    /// Create a controller error with source.
    pub fn controller_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Controller {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for logs and exit reporting.
    pub fn category(&self) -> &'static str {
        match self {
            ShellKitError::Network { .. } => "network",
            ShellKitError::Cache { .. } => "cache",
            ShellKitError::Controller { .. } => "controller",
            ShellKitError::Config { .. } => "config",
            ShellKitError::InvalidArgument(_) => "invalid_argument",
            ShellKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for shellkit operations.
pub type Result<T> = std::result::Result<T, ShellKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ShellKitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}
