//! On-disk cache store.
//!
//! Each generation is one JSON document, `<root>/<generation>.json`, holding
//! the serialized [`Cache`]. Writes go to a hidden temp file first and are
//! renamed into place, so a reader never sees a half-written generation.

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::GenerationId;
use crate::entry::{Cache, CacheEntry};
use crate::error::CacheError;
use crate::store::CacheStore;

const EXTENSION: &str = "json";

/// Cache store persisted under a directory.
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on generation files.
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, generation: &GenerationId) -> Result<PathBuf, CacheError> {
        let tag = generation.as_str();
        let valid = !tag.is_empty()
            && !tag.starts_with('.')
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::InvalidName(tag.to_string()));
        }
        Ok(self.root.join(format!("{tag}.{EXTENSION}")))
    }

    async fn load(&self, generation: &GenerationId) -> Result<Option<Cache>, CacheError> {
        let path = self.path_for(generation)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, generation: &GenerationId, cache: &Cache) -> Result<(), CacheError> {
        let path = self.path_for(generation)?;
        let tmp = self.root.join(format!(".{generation}.{EXTENSION}.tmp"));

        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec(cache)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        trace!(%generation, path = %path.display(), bytes = bytes.len(), "Generation saved");
        Ok(())
    }

    async fn update(
        &self,
        generation: &GenerationId,
        entries: Vec<CacheEntry>,
    ) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        let mut cache = self
            .load(generation)
            .await?
            .unwrap_or_else(|| Cache::new(generation.as_str()));
        for entry in entries {
            cache.put(entry);
        }
        self.save(generation, &cache).await
    }
}

impl CacheStore for FileCacheStore {
    fn keys(&self) -> BoxFuture<'_, Result<Vec<GenerationId>, CacheError>> {
        async move {
            let mut dir = match tokio::fs::read_dir(&self.root).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut keys = Vec::new();
            while let Some(item) = dir.next_entry().await? {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let generation = GenerationId::new(stem);
                if self.path_for(&generation).is_ok() {
                    keys.push(generation);
                }
            }
            keys.sort();
            Ok(keys)
        }
        .boxed()
    }

    fn has<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let path = self.path_for(generation)?;
            Ok(tokio::fs::try_exists(&path).await?)
        }
        .boxed()
    }

    fn match_request<'a>(
        &'a self,
        generation: &'a GenerationId,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, CacheError>> {
        async move {
            Ok(self
                .load(generation)
                .await?
                .and_then(|cache| cache.match_request(key).cloned()))
        }
        .boxed()
    }

    fn put<'a>(
        &'a self,
        generation: &'a GenerationId,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.update(generation, vec![entry]).boxed()
    }

    fn put_all<'a>(
        &'a self,
        generation: &'a GenerationId,
        entries: Vec<CacheEntry>,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        self.update(generation, entries).boxed()
    }

    fn delete<'a>(&'a self, generation: &'a GenerationId) -> BoxFuture<'a, Result<bool, CacheError>> {
        async move {
            let path = self.path_for(generation)?;
            let _guard = self.write_lock.lock().await;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(%generation, "Generation file removed");
                    Ok(true)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn entries<'a>(
        &'a self,
        generation: &'a GenerationId,
    ) -> BoxFuture<'a, Result<Vec<CacheEntry>, CacheError>> {
        async move {
            let cache = self
                .load(generation)
                .await?
                .ok_or_else(|| CacheError::NotFound(generation.to_string()))?;
            Ok(cache.entries().cloned().collect())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::entry;

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = GenerationId::new("we-luxembourg-v1");

        let store = FileCacheStore::new(dir.path());
        store.put(&v1, entry("https://a.lu/", b"<html>")).await.unwrap();

        // A fresh store over the same directory sees the entry.
        let reopened = FileCacheStore::new(dir.path());
        let hit = reopened.match_request(&v1, "https://a.lu/").await.unwrap();
        assert_eq!(hit.unwrap().body, b"<html>");
        assert!(dir.path().join("we-luxembourg-v1.json").exists());
    }

    #[tokio::test]
    async fn test_missing_root_has_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("not-yet"));
        assert!(store.keys().await.unwrap().is_empty());
        assert!(store
            .match_request(&GenerationId::new("v1"), "https://a.lu/")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        let (v1, v2) = (GenerationId::new("v1"), GenerationId::new("v2"));
        store.put(&v1, entry("https://a.lu/", b"1")).await.unwrap();
        store.put(&v2, entry("https://a.lu/", b"2")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec![v1.clone(), v2.clone()]);
        assert!(store.delete(&v1).await.unwrap());
        assert!(!store.delete(&v1).await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec![v2]);
    }

    #[tokio::test]
    async fn test_put_all_merges_into_existing_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        let v1 = GenerationId::new("v1");
        store.put(&v1, entry("https://a.lu/a", b"a")).await.unwrap();
        store
            .put_all(&v1, vec![entry("https://a.lu/b", b"b"), entry("https://a.lu/a", b"A")])
            .await
            .unwrap();

        let mut urls: Vec<(String, Vec<u8>)> = store
            .entries(&v1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.url, e.body))
            .collect();
        urls.sort();
        assert_eq!(
            urls,
            vec![
                ("https://a.lu/a".to_string(), b"A".to_vec()),
                ("https://a.lu/b".to_string(), b"b".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejects_path_like_generation_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        for bad in ["../escape", ".hidden", "", "a/b"] {
            let result = store.put(&GenerationId::new(bad), entry("https://a.lu/", b"")).await;
            assert!(matches!(result, Err(CacheError::InvalidName(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.json"), "{ half").unwrap();
        let store = FileCacheStore::new(dir.path());

        let result = store.match_request(&GenerationId::new("v1"), "https://a.lu/").await;
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }
}
