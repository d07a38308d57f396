//! Upload progress reporting.

use stash_core::StorageKey;

/// Receives incremental upload progress.
///
/// Called inline from the upload loop, so implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, key: &StorageKey, loaded: u64, total: Option<u64>);
}

/// Logs progress at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, key: &StorageKey, loaded: u64, total: Option<u64>) {
        match total {
            Some(total) => tracing::debug!(key = %key, "Uploaded {} of {} bytes", loaded, total),
            None => tracing::debug!(key = %key, "Uploaded {} bytes", loaded),
        }
    }
}
