//! Cached request/response pairs and the per-generation cache.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use shellkit_net::{Response, ResponseSource};
use url::Url;

use crate::error::CacheError;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL, fragment stripped. This is the lookup key.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers. Repeated headers are joined with ", ".
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response for storage under `key`.
    pub fn from_response(key: &str, method: &Method, response: &Response) -> Self {
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers.iter() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        Self {
            url: key.to_string(),
            method: method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response served from the cache.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url).map_err(|e| CacheError::Corrupt(e.to_string()))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| CacheError::Corrupt(format!("header {name:?}: {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| CacheError::Corrupt(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
            source: ResponseSource::Cache,
        })
    }

    /// Approximate storage footprint in bytes.
    pub fn size(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.url.len() + self.method.len() + headers + self.body.len()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// One cache generation's entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Generation tag.
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store an entry, returning the one it replaced.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.url.clone(), entry)
    }

    /// All entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Sum of entry sizes.
    pub fn total_size(&self) -> usize {
        self.entries.values().map(CacheEntry::size).sum()
    }
}
