//! Cache storage: the [`CacheStore`] seam and its in-memory implementation.

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::config::GenerationId;
use crate::entry::{Cache, CacheEntry};
use crate::error::CacheError;

/// Storage for cache generations.
///
/// A store is keyed by generation and, inside a generation, by request key.
/// The controller is its only reader and writer.
pub trait CacheStore: Send + Sync {
    /// All generations currently stored.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<GenerationId>, CacheError>>;

    /// Whether a generation exists.
    fn has<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Look up one entry. A missing generation is a miss, not an error.
    fn match_request<'a>(
        &'a self,
        generation: &'a GenerationId,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>>;

    /// Store one entry, creating the generation if needed and replacing any
    /// entry with the same key.
    fn put<'a>(
        &'a self,
        generation: &'a GenerationId,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Store several entries at once. Either all of them become visible or
    /// none do.
    fn put_all<'a>(
        &'a self,
        generation: &'a GenerationId,
        entries: Vec<CacheEntry>,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Delete a whole generation. Returns whether it existed.
    fn delete<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>>;

    /// Every entry of a generation.
    fn entries<'a>(
        &'a self,
        generation: &'a GenerationId,
    ) -> BoxFuture<'a, Result<Vec<CacheEntry>, CacheError>>;
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: RwLock<HashMap<GenerationId, Cache>>,
    quota: Option<usize>,
}

impl MemoryCacheStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that refuses writes once `bytes` are in use.
    ///
    /// Nothing is evicted to make room; the write fails instead.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    /// Bytes in use across every generation.
    pub async fn usage(&self) -> usize {
        self.caches.read().await.values().map(Cache::total_size).sum()
    }

    fn check_quota(
        &self,
        caches: &HashMap<GenerationId, Cache>,
        generation: &GenerationId,
        incoming: &[CacheEntry],
    ) -> Result<(), CacheError> {
        let Some(quota) = self.quota else {
            return Ok(());
        };

        let in_use: usize = caches.values().map(Cache::total_size).sum();
        let replaced: usize = caches
            .get(generation)
            .map(|cache| {
                incoming
                    .iter()
                    .filter_map(|e| cache.match_request(&e.url))
                    .map(CacheEntry::size)
                    .sum()
            })
            .unwrap_or(0);
        let added: usize = incoming.iter().map(CacheEntry::size).sum();

        let needed = in_use.saturating_sub(replaced) + added;
        if needed > quota {
            return Err(CacheError::QuotaExceeded { needed, quota });
        }
        Ok(())
    }
}

impl CacheStore for MemoryCacheStore {
    fn keys(&self) -> BoxFuture<'_, Result<Vec<GenerationId>, CacheError>> {
        async move {
            let mut keys: Vec<GenerationId> = self.caches.read().await.keys().cloned().collect();
            keys.sort();
            Ok(keys)
        }
        .boxed()
    }

    fn has<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move { Ok(self.caches.read().await.contains_key(generation)) }.boxed()
    }

    fn match_request<'a>(
        &'a self,
        generation: &'a GenerationId,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        async move {
            let caches = self.caches.read().await;
            Ok(caches
                .get(generation)
                .and_then(|cache| cache.match_request(key))
                .cloned())
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        generation: &'a GenerationId,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            let mut caches = self.caches.write().await;
            self.check_quota(&caches, generation, std::slice::from_ref(&entry))?;
            trace!(%generation, url = %entry.url, "Storing entry");
            caches
                .entry(generation.clone())
                .or_insert_with(|| Cache::new(generation.as_str()))
                .put(entry);
            Ok(())
        }
        .boxed()
    }

    fn put_all<'a>(
        &'a self,
        generation: &'a GenerationId,
        entries: Vec<CacheEntry>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            let mut caches = self.caches.write().await;
            self.check_quota(&caches, generation, &entries)?;
            let cache = caches
                .entry(generation.clone())
                .or_insert_with(|| Cache::new(generation.as_str()));
            for entry in entries {
                cache.put(entry);
            }
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move { Ok(self.caches.write().await.remove(generation).is_some()) }.boxed()
    }

    fn entries<'a>(
        &'a self,
        generation: &'a GenerationId,
    ) -> BoxFuture<'a, Result<Vec<CacheEntry>, CacheError>> {
        async move {
            let caches = self.caches.read().await;
            let cache = caches
                .get(generation)
                .ok_or_else(|| CacheError::NotFound(generation.to_string()))?;
            Ok(cache.entries().cloned().collect())
        }
        .boxed()
    }
}
