//! Key resolution against the object store.

use stash_core::{ArtifactName, CacheKey, ObjectStore, ResolvedMatch, Result, StorageKey};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a resolution, with whatever the probe produced for the match.
#[derive(Debug)]
pub struct Resolved<T> {
    pub matched: ResolvedMatch,
    /// Probe output for the matched candidate.
    pub payload: Option<T>,
    /// Restore prefixes whose listing was cut short; a newer match may exist past the cut.
    pub truncated_prefixes: Vec<String>,
}

/// Picks the stored object that best matches a requested key.
///
/// The exact key wins outright. Otherwise restore prefixes are tried in the
/// order given, and within one prefix the newest candidate is tried first.
/// Prefix order outranks recency: an older object under the first prefix
/// beats a newer one under the second.
#[derive(Clone)]
pub struct KeyResolver {
    store: Arc<dyn ObjectStore>,
}

impl KeyResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Objects under `prefix` carrying `artifact`, newest first.
    ///
    /// Also returns whether the listing was truncated.
    pub async fn candidates(
        &self,
        prefix: &str,
        artifact: &ArtifactName,
    ) -> Result<(Vec<StorageKey>, bool)> {
        let listing = self.store.list_by_prefix(prefix).await?;
        if listing.truncated {
            warn!(
                "Too many objects with prefix {}, only {} objects will be checked.",
                prefix,
                listing.objects.len()
            );
        }

        let mut matching: Vec<_> = listing
            .objects
            .into_iter()
            .filter_map(|object| match StorageKey::parse(&object.key) {
                Ok(key) if key.artifact_name() == artifact.as_str() => {
                    Some((key, object.last_modified))
                }
                Ok(_) => None,
                Err(err) => {
                    debug!(error = %err, "Ignoring listed object");
                    None
                }
            })
            .collect();
        // Stable, so equal timestamps keep listing order.
        matching.sort_by(|a, b| b.1.cmp(&a.1));

        Ok((
            matching.into_iter().map(|(key, _)| key).collect(),
            listing.truncated,
        ))
    }

    /// Resolve using `probe` to test each candidate in turn.
    ///
    /// `probe` returns `Ok(None)` when the candidate is gone, which moves on
    /// to the next candidate; an error aborts resolution.
    pub async fn resolve_with<T, F, Fut>(
        &self,
        key: &CacheKey,
        restore_keys: &[String],
        artifact: &ArtifactName,
        mut probe: F,
    ) -> Result<Resolved<T>>
    where
        F: FnMut(StorageKey) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(payload) = probe(StorageKey::new(key.as_str(), artifact)).await? {
            return Ok(Resolved {
                matched: ResolvedMatch::Hit {
                    key: key.to_string(),
                },
                payload: Some(payload),
                truncated_prefixes: Vec::new(),
            });
        }
        info!("Cache not found with key {}.", key);

        let mut truncated_prefixes = Vec::new();
        for restore_key in restore_keys {
            let (candidates, truncated) = self.candidates(restore_key, artifact).await?;
            if truncated {
                truncated_prefixes.push(restore_key.clone());
            }

            for candidate in candidates {
                match probe(candidate.clone()).await? {
                    Some(payload) => {
                        return Ok(Resolved {
                            matched: ResolvedMatch::from_candidate(
                                key.as_str(),
                                candidate.cache_key(),
                                restore_key,
                            ),
                            payload: Some(payload),
                            truncated_prefixes,
                        });
                    }
                    None => debug!(candidate = %candidate, "Candidate vanished, trying the next one"),
                }
            }
            info!("Cache not found with restore key {}.", restore_key);
        }

        Ok(Resolved {
            matched: ResolvedMatch::Miss,
            payload: None,
            truncated_prefixes,
        })
    }

    /// Resolve by existence checks only.
    pub async fn resolve(
        &self,
        key: &CacheKey,
        restore_keys: &[String],
        artifact: &ArtifactName,
    ) -> Result<Resolved<()>> {
        let store = Arc::clone(&self.store);
        self.resolve_with(key, restore_keys, artifact, move |candidate| {
            let store = Arc::clone(&store);
            async move { Ok(store.exists(&candidate).await?.then_some(())) }
        })
        .await
    }
}
