//! Cache requests and results.

use serde::Serialize;
use stash_core::{CacheKey, PathSet, ResolvedMatch};

/// Request to look up or restore a cache entry.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Path patterns the entry was saved with.
    pub paths: PathSet,
    /// Primary cache key.
    pub key: CacheKey,
    /// Prefixes tried in order when the primary key misses.
    pub restore_keys: Vec<String>,
    /// Treat a miss as an error.
    pub fail_on_cache_miss: bool,
}

impl RestoreRequest {
    pub fn new(paths: PathSet, key: CacheKey) -> Self {
        Self {
            paths,
            key,
            restore_keys: Vec::new(),
            fail_on_cache_miss: false,
        }
    }

    pub fn with_restore_keys(mut self, restore_keys: Vec<String>) -> Self {
        self.restore_keys = restore_keys;
        self
    }

    pub fn with_fail_on_cache_miss(mut self, fail: bool) -> Self {
        self.fail_on_cache_miss = fail;
        self
    }
}

/// Request to save a cache entry.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Path patterns to archive.
    pub paths: PathSet,
    /// Cache key.
    pub key: CacheKey,
}

impl SaveRequest {
    pub fn new(paths: PathSet, key: CacheKey) -> Self {
        Self { paths, key }
    }
}

/// Result of a lookup or restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    /// Which key, if any, matched.
    pub matched: ResolvedMatch,
    /// Archive bytes downloaded; zero for lookups and misses.
    pub bytes_transferred: u64,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
    /// Restore prefixes whose listing was cut short.
    pub truncated_prefixes: Vec<String>,
}

impl RestoreResult {
    pub fn matched_key(&self) -> Option<&str> {
        self.matched.matched_key()
    }

    /// Whether the requested key itself matched.
    pub fn cache_hit(&self) -> bool {
        self.matched.is_exact_hit()
    }
}

/// Result of a save.
#[derive(Debug, Clone, Serialize)]
pub struct SaveResult {
    /// Whether an archive was uploaded.
    pub saved: bool,
    /// Object key written or found.
    pub storage_key: String,
    pub bytes_uploaded: u64,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
}
