//! On-disk layout and file primitives shared by the article cache and the
//! cumulative state.
//!
//! ```text
//! <root>/
//!   valid_words.txt
//!   processed.json        cumulative word counts
//!   processed.json.lock   cumulative lock marker
//!   processed.txt         cumulative processed urls
//!   jsons/<sha256>.json   per-article frequency map
//!   jsons/<sha256>.json.lock
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.root.join("jsons")
    }

    pub fn article_path(&self, url_hash: &str) -> PathBuf {
        self.articles_dir().join(format!("{}.json", url_hash))
    }

    pub fn word_counts_path(&self) -> PathBuf {
        self.root.join("processed.json")
    }

    pub fn processed_urls_path(&self) -> PathBuf {
        self.root.join("processed.txt")
    }

    pub fn valid_words_path(&self) -> PathBuf {
        self.root.join("valid_words.txt")
    }
}

/// Path of the sentinel guarding `path`.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(LOCK_SUFFIX);
    PathBuf::from(raw)
}

pub fn is_lock_path(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.ends_with(LOCK_SUFFIX))
}

/// A zero-byte lock marker owned by this process.
///
/// The marker is created with create-exclusive semantics so two racing
/// acquirers cannot both succeed. Dropping the marker removes the file; call
/// [`LockMarker::release`] to observe removal errors.
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
    released: bool,
}

impl LockMarker {
    /// Returns `Ok(None)` when the marker already exists.
    pub async fn try_acquire(guarded: &Path) -> Result<Option<Self>> {
        let path = lock_path(guarded);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(_) => Ok(Some(Self { path, released: false })),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Adopts a marker left behind by an earlier run so that this run
    /// removes it when done.
    pub async fn adopt(guarded: &Path) -> Result<Self> {
        let path = lock_path(guarded);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(Self { path, released: false })
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_exists(&self.path).await
    }
}

/// Whether a lock marker for `guarded` is on disk right now.
pub async fn lock_exists(guarded: &Path) -> Result<bool> {
    Ok(fs::try_exists(lock_path(guarded)).await?)
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove lock marker {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Reads a newline-delimited list, dropping blank lines. A missing file is
/// an empty list.
pub async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found. Returning empty list", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub async fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut body = String::new();
    for line in lines {
        body.push_str(line.as_ref());
        body.push('\n');
    }
    write_atomic(path, body.as_bytes()).await
}

/// Writes through a sibling temp file and a rename so readers never see a
/// half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
