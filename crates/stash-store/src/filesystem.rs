//! Object store kept in a local directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use stash_core::{
    BodyStream, Error, ObjectListing, ObjectStore, ObjectSummary, Result, StorageKey,
};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

const PARTIAL_SUFFIX: &str = ".partial";

/// Filesystem-based object store for local runs.
///
/// Object keys map to relative paths under the root, so `k/abc.tar.gz`
/// lives at `<root>/k/abc.tar.gz`.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let plain = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain || key.ends_with(PARTIAL_SUFFIX) {
            return Err(Error::InvalidStorageKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl Default for FilesystemStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("stash-cache"))
    }
}

fn list_blocking(root: &Path, prefix: &str) -> Result<Vec<ObjectSummary>> {
    let mut objects = Vec::new();
    if !root.exists() {
        return Ok(objects);
    }
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !key.starts_with(prefix) || key.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| Error::Io(io::Error::other(e)))?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::UNIX_EPOCH);
        objects.push(ObjectSummary {
            key,
            last_modified,
            size_bytes: metadata.len(),
        });
    }
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        let path = self.object_path(key.as_str())?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn fetch(&self, key: &StorageKey) -> Result<Option<BodyStream>> {
        let path = self.object_path(key.as_str())?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(ReaderStream::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn store(&self, key: &StorageKey, mut body: BodyStream) -> Result<u64> {
        let path = self.object_path(key.as_str())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(format!(".{}{}", std::process::id(), PARTIAL_SUFFIX));
        let partial = PathBuf::from(partial);

        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.sync_all().await?;
            Ok::<_, io::Error>(written)
        }
        .await;

        let written = match written {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(Error::Io(e));
            }
        };
        tokio::fs::rename(&partial, &path).await?;
        tracing::debug!(key = %key, bytes = written, path = %path.display(), "Stored object");
        Ok(written)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<ObjectListing> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let objects = tokio::task::spawn_blocking(move || list_blocking(&root, &prefix))
            .await
            .map_err(|e| Error::Internal(format!("Listing task failed: {}", e)))??;
        Ok(ObjectListing {
            objects,
            truncated: false,
        })
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
