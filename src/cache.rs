//! Per-article frequency cache and its advisory locks.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::counts::WordCounts;
use crate::error::Result;
use crate::storage::{self, LockMarker, StorageLayout};

/// A URL together with its content-addressed cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleKey {
    pub url: String,
    pub url_hash: String,
}

impl ArticleKey {
    pub fn from_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            url_hash: hash_url(url),
        }
    }
}

/// Lowercase hex SHA-256 of the URL bytes.
pub fn hash_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

pub struct ArticleCache {
    layout: StorageLayout,
    /// Hashes whose lock marker existed before this run touched them.
    stale: Mutex<HashSet<String>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ArticleCache {
    /// Opens the cache and records every lock marker already on disk as
    /// stale.
    pub async fn open(layout: StorageLayout) -> Result<Self> {
        let stale = scan_stale_locks(&layout.articles_dir()).await?;
        if !stale.is_empty() {
            warn!(count = stale.len(), "Found lock markers left by an earlier run");
        }

        Ok(Self {
            layout,
            stale: Mutex::new(stale),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn entry_path(&self, key: &ArticleKey) -> PathBuf {
        self.layout.article_path(&key.url_hash)
    }

    /// Takes the per-article lock, or returns `None` when it is already held
    /// during this run.
    ///
    /// A marker recorded as stale at startup is taken over once; the
    /// returned lock then reports [`ArticleLock::was_stale`].
    pub async fn try_lock(&self, key: &ArticleKey) -> Result<Option<ArticleLock>> {
        if !self.in_flight.lock().insert(key.url_hash.clone()) {
            return Ok(None);
        }

        let path = self.entry_path(key);
        let taken_over = self.stale.lock().remove(&key.url_hash);

        let marker = if taken_over {
            info!(url_hash = %key.url_hash, "Taking over stale lock");
            Some(LockMarker::adopt(&path).await)
        } else {
            LockMarker::try_acquire(&path).await.transpose()
        };

        match marker {
            Some(Ok(marker)) => Ok(Some(ArticleLock {
                marker: Some(marker),
                url_hash: key.url_hash.clone(),
                in_flight: self.in_flight.clone(),
                stale: taken_over,
            })),
            Some(Err(e)) => {
                self.in_flight.lock().remove(&key.url_hash);
                Err(e)
            }
            None => {
                self.in_flight.lock().remove(&key.url_hash);
                Ok(None)
            }
        }
    }

    /// Reads a cached map. Absent, empty or corrupt entries read as `None`.
    pub async fn read(&self, key: &ArticleKey) -> Result<Option<WordCounts>> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<WordCounts>(&raw) {
            Ok(counts) if !counts.is_empty() => Ok(Some(counts)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(url_hash = %key.url_hash, "Ignoring unreadable cache entry: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn write(&self, key: &ArticleKey, counts: &WordCounts) -> Result<()> {
        let body = serde_json::to_vec(counts)?;
        storage::write_atomic(&self.entry_path(key), &body).await?;
        debug!(url_hash = %key.url_hash, words = counts.len(), "Cached article counts");
        Ok(())
    }

    pub async fn remove(&self, key: &ArticleKey) -> Result<()> {
        storage::remove_if_exists(&self.entry_path(key)).await
    }

    /// Deletes stale markers, and any leftover entries, of articles that are
    /// already in cumulative state. Those URLs are never scheduled again, so
    /// nothing else would clean them up. Returns how many were swept.
    pub async fn sweep_stale<'a, I>(&self, folded_urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a String>,
    {
        if self.stale.lock().is_empty() {
            return Ok(0);
        }

        let swept: Vec<ArticleKey> = folded_urls
            .into_iter()
            .map(|url| ArticleKey::from_url(url))
            .filter(|key| self.stale.lock().remove(&key.url_hash))
            .collect();

        for key in &swept {
            let entry = self.entry_path(key);
            storage::remove_if_exists(&entry).await?;
            storage::remove_if_exists(&storage::lock_path(&entry)).await?;
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "Swept stale locks of already counted articles");
        }
        Ok(swept.len())
    }
}

async fn scan_stale_locks(dir: &Path) -> Result<HashSet<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stale = HashSet::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !storage::is_lock_path(&path) {
            continue;
        }
        // <hash>.json.lock
        let hash = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(".json.lock"));
        if let Some(hash) = hash {
            stale.insert(hash.to_string());
        }
    }
    Ok(stale)
}

/// Held while one task produces an article's cache entry. Dropping it
/// removes the marker and frees the key.
pub struct ArticleLock {
    marker: Option<LockMarker>,
    url_hash: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
    stale: bool,
}

impl ArticleLock {
    pub fn was_stale(&self) -> bool {
        self.stale
    }

    pub async fn release(mut self) -> Result<()> {
        match self.marker.take() {
            Some(marker) => marker.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for ArticleLock {
    fn drop(&mut self) {
        // marker file goes first so a freed key is never still on disk
        drop(self.marker.take());
        self.in_flight.lock().remove(&self.url_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_counts() -> WordCounts {
        [("the".to_string(), 2), ("fox".to_string(), 1)].into_iter().collect()
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_url("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let cache = ArticleCache::open(StorageLayout::new(dir.path())).await.unwrap();
        let key = ArticleKey::from_url("https://a.test/1");

        assert!(cache.read(&key).await.unwrap().is_none());
        cache.write(&key, &sample_counts()).await.unwrap();

        let path = dir.path().join("jsons").join(format!("{}.json", key.url_hash));
        assert!(path.exists());
        assert_eq!(cache.read(&key).await.unwrap(), Some(sample_counts()));

        cache.remove(&key).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_or_corrupt_entry_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let cache = ArticleCache::open(StorageLayout::new(dir.path())).await.unwrap();
        let key = ArticleKey::from_url("https://a.test/2");
        let path = cache.entry_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        std::fs::write(&path, "{}").unwrap();
        assert!(cache.read(&key).await.unwrap().is_none());

        std::fs::write(&path, "{\"the\": 1").unwrap();
        assert!(cache.read(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_within_run() {
        let dir = TempDir::new().unwrap();
        let cache = ArticleCache::open(StorageLayout::new(dir.path())).await.unwrap();
        let key = ArticleKey::from_url("https://a.test/3");

        let lock = cache.try_lock(&key).await.unwrap().expect("first lock");
        assert!(!lock.was_stale());
        assert!(cache.try_lock(&key).await.unwrap().is_none());

        lock.release().await.unwrap();
        assert!(!storage::lock_path(&cache.entry_path(&key)).exists());
        assert!(cache.try_lock(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_marker_created_during_run_blocks() {
        let dir = TempDir::new().unwrap();
        let cache = ArticleCache::open(StorageLayout::new(dir.path())).await.unwrap();
        let key = ArticleKey::from_url("https://a.test/4");

        let marker = storage::lock_path(&cache.entry_path(&key));
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, "").unwrap();

        assert!(cache.try_lock(&key).await.unwrap().is_none());
        assert!(marker.exists(), "someone else's marker is left alone");
    }

    #[tokio::test]
    async fn test_stale_marker_is_taken_over_once() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        let key = ArticleKey::from_url("https://a.test/5");
        let marker = storage::lock_path(&layout.article_path(&key.url_hash));
        std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
        std::fs::write(&marker, "").unwrap();

        let cache = ArticleCache::open(layout).await.unwrap();
        let lock = cache.try_lock(&key).await.unwrap().expect("stale lock taken over");
        assert!(lock.was_stale());
        drop(lock);
        assert!(!marker.exists());

        let lock = cache.try_lock(&key).await.unwrap().expect("fresh lock");
        assert!(!lock.was_stale());
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_locks_of_counted_articles() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path());
        let counted = ArticleKey::from_url("https://a.test/6");
        let pending = ArticleKey::from_url("https://a.test/7");

        let counted_entry = layout.article_path(&counted.url_hash);
        let pending_marker = storage::lock_path(&layout.article_path(&pending.url_hash));
        std::fs::create_dir_all(counted_entry.parent().unwrap()).unwrap();
        std::fs::write(&counted_entry, r#"{"fox":1}"#).unwrap();
        std::fs::write(storage::lock_path(&counted_entry), "").unwrap();
        std::fs::write(&pending_marker, "").unwrap();

        let cache = ArticleCache::open(layout).await.unwrap();
        let swept = cache.sweep_stale(&[counted.url.clone()]).await.unwrap();

        assert_eq!(swept, 1);
        assert!(!counted_entry.exists());
        assert!(!storage::lock_path(&counted_entry).exists());
        assert!(pending_marker.exists(), "unfinished article keeps its marker");

        // the pending article's marker is still taken over as stale
        let lock = cache.try_lock(&pending).await.unwrap().expect("stale lock");
        assert!(lock.was_stale());
    }
}
