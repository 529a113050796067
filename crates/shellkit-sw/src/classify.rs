//! Request classification.

use serde::Serialize;
use url::{Origin, Url};

/// Which caching policy a request falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Different origin than the site. Never intercepted.
    CrossOrigin,
    /// Same origin, under the serverless function prefix. Network-first.
    DynamicApi,
    /// Any other same-origin request. Stale-while-revalidate.
    StaticAsset,
}

/// Stateless classifier bound to one origin and API prefix.
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    origin: Origin,
    api_prefix: String,
}

impl RequestClassifier {
    pub fn new(origin: &Url, api_prefix: &str) -> Self {
        Self {
            origin: origin.origin(),
            api_prefix: api_prefix.to_string(),
        }
    }

    /// Classify a request URL.
    ///
    /// Opaque origins (`data:`, `blob:`) never equal a tuple origin, so they
    /// come out cross-origin.
    pub fn classify(&self, url: &Url) -> RequestClass {
        if url.origin() != self.origin {
            RequestClass::CrossOrigin
        } else if url.path().starts_with(&self.api_prefix) {
            RequestClass::DynamicApi
        } else {
            RequestClass::StaticAsset
        }
    }
}
