//! Persistence backends for the content cache.
//!
//! [`CacheStore`] is synchronous: lookups are local and fast,
//! and the cache is never treated as a suspension point.

use super::{CacheEntry, Fingerprint};
use crate::error::Result;
use crate::PipelineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Durable key-value storage for cache entries.
///
/// Implementations must be safe for concurrent use from many requests.
pub trait CacheStore: Send + Sync {
    fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>>;

    /// Write `entry`, replacing any entry with the same fingerprint.
    fn save(&self, entry: &CacheEntry) -> Result<()>;

    fn remove(&self, key: &Fingerprint) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> Result<usize>;
}

/// In-process store. Entries are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> PipelineError {
    PipelineError::Cache("memory store lock poisoned".into())
}

impl CacheStore for MemoryStore {
    fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &Fingerprint) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}

/// One JSON file per entry, named `<fingerprint>.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// concurrent reader never sees a half-written entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| PipelineError::Cache(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let read = std::fs::read_dir(&self.dir)
            .map_err(|e| PipelineError::Cache(format!("{}: {}", self.dir.display(), e)))?;
        Ok(read
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
            .collect())
    }
}

impl CacheStore for FileStore {
    fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::Cache(format!("{}: {}", path.display(), e))),
        };
        let entry = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Cache(format!("corrupt entry {}: {}", path.display(), e)))?;
        Ok(Some(entry))
    }

    fn save(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.fingerprint);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", entry.fingerprint, fastrand::u32(..)));
        let text = serde_json::to_string_pretty(entry)?;
        let written = std::fs::write(&tmp, text).and_then(|_| std::fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(PipelineError::Cache(format!("{}: {}", path.display(), e)));
        }
        Ok(())
    }

    fn remove(&self, key: &Fingerprint) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Cache(e.to_string())),
        }
    }

    fn clear(&self) -> Result<()> {
        for path in self.entry_files()? {
            std::fs::remove_file(&path)
                .map_err(|e| PipelineError::Cache(format!("{}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entry_files()?.len())
    }
}
