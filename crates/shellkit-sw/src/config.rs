//! Controller configuration.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::classify::RequestClassifier;

/// Version tag of the cache generation shipped with the site.
pub const DEFAULT_GENERATION: &str = "we-luxembourg-v1";

/// Path prefix of the serverless function endpoints.
pub const DEFAULT_API_PREFIX: &str = "/.netlify/functions/";

/// Origin used when none is configured (the local functions dev server).
pub const DEFAULT_ORIGIN: &str = "http://localhost:8888/";

/// Application shell resources that must be cached before the controller is
/// ready.
pub const DEFAULT_SEED_URLS: [&str; 4] = ["/", "/index.html", "/manifest.webmanifest", "/favicon.ico"];

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Identifier of one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GenerationId {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Offline cache controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Origin of the site the controller serves. Anything else is
    /// cross-origin and bypassed.
    pub origin: Url,

    /// Current cache generation.
    pub generation: GenerationId,

    /// Paths (relative to `origin`) seeded on initialization.
    pub seed_urls: Vec<String>,

    /// Path prefix that marks a request as a dynamic API call.
    pub api_prefix: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            generation: GenerationId::new(DEFAULT_GENERATION),
            seed_urls: DEFAULT_SEED_URLS.iter().map(|s| s.to_string()).collect(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Default configuration for the given origin.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "origin must be an http(s) URL with a host, got {}",
                self.origin
            )));
        }
        if self.generation.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("generation tag is empty".to_string()));
        }
        if !self.api_prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "api prefix must start with '/', got {:?}",
                self.api_prefix
            )));
        }
        self.seed_requests().map(|_| ())
    }

    /// Resolve the seed list against the origin.
    pub fn seed_requests(&self) -> Result<Vec<Url>, ConfigError> {
        self.seed_urls
            .iter()
            .map(|path| {
                let url = self
                    .origin
                    .join(path)
                    .map_err(|e| ConfigError::Invalid(format!("seed {path:?}: {e}")))?;
                if url.origin() != self.origin.origin() {
                    return Err(ConfigError::Invalid(format!(
                        "seed {path:?} resolves outside {}",
                        self.origin
                    )));
                }
                Ok(url)
            })
            .collect()
    }

    /// Classifier for this origin and API prefix.
    pub fn classifier(&self) -> RequestClassifier {
        RequestClassifier::new(&self.origin, &self.api_prefix)
    }
}
