//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the cache logic and external adapters.

use crate::keys::StorageKey;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

/// Stream of body bytes moving to or from the object store.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A stored object as reported by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full object key.
    pub key: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Result of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub objects: Vec<ObjectSummary>,
    /// The store stopped before returning every matching object.
    pub truncated: bool,
}

/// Typed access to a remote object store. No cache semantics.
///
/// Absence is an outcome, not a fault: `exists` returns `false` and `fetch`
/// returns `None` when the object is not there. Every other failure is an
/// error. Implementations do not retry; that belongs to their transport.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether an object exists.
    async fn exists(&self, key: &StorageKey) -> Result<bool>;

    /// Open an object for streaming, positioned at offset 0.
    async fn fetch(&self, key: &StorageKey) -> Result<Option<BodyStream>>;

    /// Upload a body of unknown length, consuming it to completion.
    /// Returns the number of bytes stored.
    async fn store(&self, key: &StorageKey, body: BodyStream) -> Result<u64>;

    /// List objects whose key starts with `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<ObjectListing>;

    /// Store name for logging.
    fn name(&self) -> &str;
}

/// Key-value state carried between the restore and save steps of one job.
pub trait StateStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Drop a value; removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}
