//! # shellkit Net
//!
//! Request/response model and the network seam used by the offline cache
//! controller.
//!
//! ## Design Goals
//!
//! 1. **One seam**: everything that touches the network goes through [`Fetcher`]
//! 2. **Network errors only**: an HTTP 404 is a response, not an error
//! 3. **Cheap clones**: bodies are [`Bytes`] so a response can be handed to the
//!    caller and written to the cache at the same time

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod http_fetcher;

pub use http_fetcher::{HttpFetcher, LoaderConfig};

/// Errors that can occur while fetching.
///
/// These are network-level failures; a completed exchange with a non-2xx
/// status is an `Ok(Response)`.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unavailable")]
    Offline,

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// An outgoing request as seen by the controller.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            url,
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse_get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The key this request is stored under in a cache.
    ///
    /// Fragments never reach the server, so `/a#x` and `/a` share an entry.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// A live network exchange.
    Network,
    /// Replayed from a cache generation.
    Cache,
    /// Built locally without any network exchange.
    Synthesized,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url,
            status,
            headers,
            body,
            source: ResponseSource::Network,
        }
    }

    /// Build a local response carrying a JSON document.
    pub fn synthesized_json(url: Url, status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            url,
            status,
            headers,
            body: Bytes::from(value.to_string()),
            source: ResponseSource::Synthesized,
        }
    }

    /// Check if the exchange was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type`, if present and valid.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Something that can perform a network exchange.
///
/// The returned future owns everything it needs so callers can move it onto
/// a detached task.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, NetError>>;
}

/// A fetcher with no connectivity. Every request fails with
/// [`NetError::Offline`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response, NetError>> {
        tracing::trace!(url = %request.url, "Offline fetcher refusing request");
        futures::future::ready(Err(NetError::Offline)).boxed()
    }
}
