//! Content-addressable cache for generation results.
//!
//! Both the structuring call and every per-section image call look here
//! before reaching a provider. Keys are [`Fingerprint`]s over exactly the
//! inputs the call depends on, so editing one section only invalidates that
//! section's image.
//!
//! The cache is an optimization, never a correctness dependency: store
//! failures are logged and behave as misses.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{normalize, Fingerprint, FingerprintParams};
pub use store::{CacheStore, FileStore, MemoryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a cache entry points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CachedArtifact {
    /// A file path or URL.
    Location(String),
    /// The result itself, stored inline.
    Inline(serde_json::Value),
}

/// One persisted fingerprint → artifact mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub artifact: CachedArtifact,
    /// Parameters the artifact was generated with.
    pub params: FingerprintParams,
    pub created_at: DateTime<Utc>,
}

/// A write produced during a run, stored once the run ends uncancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub key: Fingerprint,
    pub artifact: CachedArtifact,
    pub params: FingerprintParams,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// TTL-aware cache in front of a [`CacheStore`].
///
/// # Example
///
/// ```
/// use doc_pipeline::cache::{CachedArtifact, ContentCache, Fingerprint, FingerprintParams};
///
/// let cache = ContentCache::in_memory();
/// let params = FingerprintParams::new().with("model", "m");
/// let key = Fingerprint::compute("some text", &params);
///
/// assert!(cache.get(&key).is_none());
/// cache.put(&key, CachedArtifact::Location("out.png".into()), params);
/// assert!(cache.get(&key).is_some());
/// ```
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    clock: Clock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentCache")
            .field("ttl", &self.ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl: Duration::from_secs(crate::config::DEFAULT_CACHE_TTL_SECONDS),
            clock: Arc::new(Utc::now),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Entries older than `ttl` are treated as misses.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replace the wall clock used for TTL checks.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        let age = (self.clock)().signed_duration_since(entry.created_at);
        match age.to_std() {
            Ok(age) => age > self.ttl,
            // created in the future: clock skew, keep it
            Err(_) => false,
        }
    }

    fn miss(&self) -> Option<CacheEntry> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Look up `key`. Expired entries are removed and reported as misses.
    pub fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        match self.store.load(key) {
            Ok(Some(entry)) if self.is_expired(&entry) => {
                tracing::debug!(fingerprint = %key.short(), "cache entry expired");
                if let Err(e) = self.store.remove(key) {
                    tracing::warn!(fingerprint = %key.short(), error = %e, "failed to evict expired cache entry");
                }
                self.miss()
            }
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Ok(None) => self.miss(),
            Err(e) => {
                tracing::warn!(fingerprint = %key.short(), error = %e, "cache lookup failed, treating as miss");
                self.miss()
            }
        }
    }

    /// Store `artifact` under `key`. The last writer wins.
    pub fn put(&self, key: &Fingerprint, artifact: CachedArtifact, params: FingerprintParams) {
        let entry = CacheEntry {
            fingerprint: key.clone(),
            artifact,
            params,
            created_at: (self.clock)(),
        };
        if let Err(e) = self.store.save(&entry) {
            tracing::warn!(fingerprint = %key.short(), error = %e, "cache write failed");
        }
    }

    /// Store a run's buffered writes, oldest first.
    pub fn commit(&self, writes: Vec<PendingWrite>) {
        for write in writes {
            self.put(&write.key, write.artifact, write.params);
        }
    }

    pub fn invalidate(&self, key: &Fingerprint) {
        if let Err(e) = self.store.remove(key) {
            tracing::warn!(fingerprint = %key.short(), error = %e, "cache invalidate failed");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "cache clear failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len().unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
