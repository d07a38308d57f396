//! Lookup, restore and save.

use crate::resolver::KeyResolver;
use crate::types::{RestoreRequest, RestoreResult, SaveRequest, SaveResult};
use stash_archive::{ArchiveCodec, BandwidthTracker, expand_paths};
use stash_core::{
    ArtifactName, Compression, Error, ObjectStore, PathSet, ResolvedMatch, Result, StorageKey,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs cache operations against one object store and working directory.
///
/// Operations keep no state between calls and may run concurrently for
/// different keys. Running `save` and `restore` over overlapping paths at the
/// same time is the caller's problem.
pub struct CacheOrchestrator {
    store: Arc<dyn ObjectStore>,
    resolver: KeyResolver,
    working_dir: PathBuf,
    compression: Compression,
}

impl CacheOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver: KeyResolver::new(Arc::clone(&store)),
            store,
            working_dir: working_dir.into(),
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn artifact(&self, paths: &PathSet) -> Result<ArtifactName> {
        if paths.is_empty() {
            return Err(Error::MissingInput("path".to_string()));
        }
        Ok(ArtifactName::for_paths(paths, self.compression))
    }

    fn codec(&self) -> ArchiveCodec {
        ArchiveCodec::new(self.working_dir.clone(), self.compression)
    }

    fn finish_restore(
        &self,
        request: &RestoreRequest,
        matched: ResolvedMatch,
        bytes_transferred: u64,
        start: Instant,
        truncated_prefixes: Vec<String>,
    ) -> Result<RestoreResult> {
        if matched.is_miss() && request.fail_on_cache_miss {
            return Err(Error::CacheMiss {
                key: request.key.to_string(),
                restore_keys: request.restore_keys.clone(),
            });
        }
        Ok(RestoreResult {
            matched,
            bytes_transferred,
            duration_ms: start.elapsed().as_millis() as u64,
            truncated_prefixes,
        })
    }

    /// Find the matching entry without downloading it.
    pub async fn lookup(&self, request: &RestoreRequest) -> Result<RestoreResult> {
        let start = Instant::now();
        let artifact = self.artifact(&request.paths)?;

        let resolved = self
            .resolver
            .resolve(&request.key, &request.restore_keys, &artifact)
            .await?;
        match &resolved.matched {
            ResolvedMatch::Hit { key } => info!("Cache found with key {}.", key),
            ResolvedMatch::PartialHit { key, restore_key } => {
                info!("Cache found with key {}, restore key {}.", key, restore_key)
            }
            ResolvedMatch::Miss => {}
        }

        self.finish_restore(request, resolved.matched, 0, start, resolved.truncated_prefixes)
    }

    /// Find the matching entry and unpack it into the working directory.
    ///
    /// A miss leaves the working directory untouched. A corrupt archive is an
    /// error, never a miss.
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreResult> {
        let start = Instant::now();
        let artifact = self.artifact(&request.paths)?;

        let store = Arc::clone(&self.store);
        let resolved = self
            .resolver
            .resolve_with(&request.key, &request.restore_keys, &artifact, move |candidate| {
                let store = Arc::clone(&store);
                async move { store.fetch(&candidate).await }
            })
            .await?;

        let Some(body) = resolved.payload else {
            return self.finish_restore(
                request,
                ResolvedMatch::Miss,
                0,
                start,
                resolved.truncated_prefixes,
            );
        };

        let tracker = BandwidthTracker::new();
        self.codec().extract(tracker.track(body)).await?;
        let bytes = tracker.total_bytes();
        if let Some(key) = resolved.matched.matched_key() {
            info!("Cache restored with key {}, {} bytes.", key, bytes);
        }

        self.finish_restore(
            request,
            resolved.matched,
            bytes,
            start,
            resolved.truncated_prefixes,
        )
    }

    /// Archive and upload the paths unless the key already exists.
    ///
    /// Existence of the key is enough to skip; contents are not compared.
    pub async fn save(&self, request: &SaveRequest) -> Result<SaveResult> {
        let start = Instant::now();
        let artifact = self.artifact(&request.paths)?;
        let storage_key = StorageKey::new(request.key.as_str(), &artifact);
        let skipped = |storage_key: &StorageKey| SaveResult {
            saved: false,
            storage_key: storage_key.to_string(),
            bytes_uploaded: 0,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if self.store.exists(&storage_key).await? {
            info!("Cache found with key {}, not saving cache.", request.key);
            return Ok(skipped(&storage_key));
        }

        let paths = request.paths.clone();
        let base_dir = self.working_dir.clone();
        let expanded = tokio::task::spawn_blocking(move || expand_paths(&paths, &base_dir))
            .await
            .map_err(|e| Error::Internal(format!("Path expansion task failed: {}", e)))??;
        if expanded.is_empty() {
            warn!(
                "No files were found with the provided path: {}. No cache will be saved.",
                request.paths.patterns().join(", ")
            );
            return Ok(skipped(&storage_key));
        }
        debug!(entries = expanded.len(), "Expanded paths: [{}]", display_paths(&expanded));

        let tracker = BandwidthTracker::new();
        let (body, handle) = self.codec().create(expanded);
        let uploaded = self.store.store(&storage_key, tracker.track(body)).await;
        // The pipeline's own failure explains an upload that died mid-stream.
        handle.join().await?;
        let stored = uploaded?;

        let bytes = tracker.total_bytes();
        debug!(key = %storage_key, stored, store = self.store.name(), "Uploaded archive");
        info!("Cache saved with key {}, {} bytes.", request.key, bytes);

        Ok(SaveResult {
            saved: true,
            storage_key: storage_key.to_string(),
            bytes_uploaded: bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_core::CacheKey;
    use stash_store::MemoryStore;

    #[tokio::test]
    async fn test_empty_paths_fail_before_any_store_call() {
        let store = Arc::new(MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = CacheOrchestrator::new(store.clone(), dir.path());
        let key = CacheKey::new("k").unwrap();

        let err = orchestrator
            .save(&SaveRequest::new(PathSet::parse("# only a comment\n"), key.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput(ref name) if name == "path"));

        let err = orchestrator
            .restore(&RestoreRequest::new(PathSet::default(), key))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_archive_is_not_saved() {
        let store = Arc::new(MemoryStore::new());
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = CacheOrchestrator::new(store.clone(), dir.path());

        let result = orchestrator
            .save(&SaveRequest::new(
                PathSet::parse("missing/**/*.o"),
                CacheKey::new("k").unwrap(),
            ))
            .await
            .unwrap();
        assert!(!result.saved);
        assert_eq!(store.upload_count(), 0);
    }

    #[test]
    fn test_storage_key_uses_compression_extension() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = CacheOrchestrator::new(store, "/work").with_compression(Compression::Zstd);
        let artifact = orchestrator.artifact(&PathSet::parse("tests")).unwrap();
        assert_eq!(artifact.as_str(), "b61a6d542f9036550ba9c401c80f00ef.tar.zst");
    }
}
