//! State hand-off between the restore and save steps of a job.

use crate::ports::StateStore;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Normalized, newline-joined path list used by the restore step.
pub const CACHE_PATH: &str = "CACHE_PATH";
/// Key requested by the restore step.
pub const CACHE_KEY: &str = "CACHE_KEY";
/// Key that actually matched during restore, if any.
pub const CACHE_MATCHED_KEY: &str = "CACHE_MATCHED_KEY";
/// Whether the match was exact.
pub const CACHE_HIT: &str = "CACHE_HIT";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process state store.
#[derive(Debug, Default)]
pub struct MemoryState {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryState {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// State store persisted as a JSON object on disk.
///
/// Each write rewrites the whole file through a temporary sibling and a
/// rename, so a reader never sees a half-written file.
#[derive(Debug)]
pub struct FileState {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStore for FileState {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = lock(&self.guard);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.write(&values)?;
        tracing::debug!(key, path = %self.path.display(), "Saved state");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.write(&values)?;
            tracing::debug!(key, path = %self.path.display(), "Cleared state");
        }
        Ok(())
    }
}
