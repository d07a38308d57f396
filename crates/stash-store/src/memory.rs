//! In-process object store.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use stash_core::{
    BodyStream, Error, ObjectListing, ObjectStore, ObjectSummary, Result, StorageKey,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

const FETCH_CHUNK: usize = 16 * 1024;

/// One call made against a [`MemoryStore`], with the key or prefix it used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Exists(String),
    Fetch(String),
    Store(String),
    List(String),
}

#[derive(Debug)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    /// Listed but gone by the time they are read.
    ghosts: BTreeMap<String, DateTime<Utc>>,
    calls: Vec<StoreCall>,
    truncated: bool,
    fail_uploads: bool,
}

/// Object store kept in memory, recording every call made against it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put an object directly, bypassing the call log.
    pub fn insert(&self, key: &str, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                last_modified,
            },
        );
    }

    /// Add a listing entry whose object cannot be read, as if it was
    /// deleted between listing and fetch.
    pub fn insert_ghost(&self, key: &str, last_modified: DateTime<Utc>) {
        self.lock().ghosts.insert(key.to_string(), last_modified);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Mark every listing as truncated.
    pub fn set_truncated(&self, truncated: bool) {
        self.lock().truncated = truncated;
    }

    /// Make `store` fail with a transient error.
    pub fn fail_uploads(&self, fail: bool) {
        self.lock().fail_uploads = fail;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Number of `store` calls so far.
    pub fn upload_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Store(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Exists(key.to_string()));
        Ok(state.objects.contains_key(key.as_str()))
    }

    async fn fetch(&self, key: &StorageKey) -> Result<Option<BodyStream>> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Fetch(key.to_string()));
        let Some(object) = state.objects.get(key.as_str()) else {
            return Ok(None);
        };

        let data = object.data.clone();
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(FETCH_CHUNK)
            .map(|start| Ok(data.slice(start..(start + FETCH_CHUNK).min(data.len()))))
            .collect();
        Ok(Some(Box::pin(futures::stream::iter(chunks))))
    }

    async fn store(&self, key: &StorageKey, mut body: BodyStream) -> Result<u64> {
        let fail = {
            let mut state = self.lock();
            state.calls.push(StoreCall::Store(key.to_string()));
            state.fail_uploads
        };
        if fail {
            return Err(Error::Transient("simulated upload failure".to_string()));
        }

        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        let len = data.len() as u64;
        self.insert(key.as_str(), data.freeze(), Utc::now());
        Ok(len)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<ObjectListing> {
        let mut state = self.lock();
        state.calls.push(StoreCall::List(prefix.to_string()));

        let mut objects: Vec<ObjectSummary> = state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                last_modified: object.last_modified,
                size_bytes: object.data.len() as u64,
            })
            .collect();
        objects.extend(
            state
                .ghosts
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, last_modified)| ObjectSummary {
                    key: key.clone(),
                    last_modified: *last_modified,
                    size_bytes: 0,
                }),
        );
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(ObjectListing {
            objects,
            truncated: state.truncated,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}
