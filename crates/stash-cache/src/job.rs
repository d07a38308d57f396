//! Restore and save steps of a CI job.
//!
//! The restore step runs first and records what it did in a [`StateStore`];
//! the save step, run at the end of the same job, reads that state back so
//! both steps agree on paths and key, and so an exact hit is not uploaded again.

use crate::orchestrator::CacheOrchestrator;
use crate::types::{RestoreRequest, RestoreResult, SaveRequest, SaveResult};
use stash_core::input::split_input;
use stash_core::state::{CACHE_HIT, CACHE_KEY, CACHE_MATCHED_KEY, CACHE_PATH};
use stash_core::{CacheKey, Error, PathSet, Result, StateStore};
use tracing::{debug, info};

/// Raw inputs of the restore step, as supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RestoreInputs {
    /// Newline-separated path patterns.
    pub path: String,
    pub key: String,
    /// Newline-separated restore prefixes.
    pub restore_keys: String,
    /// Only check for a match; download nothing.
    pub lookup_only: bool,
    pub fail_on_cache_miss: bool,
}

/// What the restore step reports back.
#[derive(Debug, Clone)]
pub struct RestoreOutputs {
    /// Whether the requested key matched exactly; `None` on a miss.
    pub cache_hit: Option<bool>,
    pub matched_key: Option<String>,
    pub result: RestoreResult,
}

/// Raw inputs of the save step. State recorded by the restore step wins over these.
#[derive(Debug, Clone, Default)]
pub struct SaveInputs {
    pub path: Option<String>,
    pub key: Option<String>,
}

fn required_paths(raw: &str) -> Result<PathSet> {
    let paths = PathSet::parse(raw);
    if paths.is_empty() {
        return Err(Error::MissingInput("path".to_string()));
    }
    Ok(paths)
}

/// Run the restore step.
pub async fn run_restore(
    orchestrator: &CacheOrchestrator,
    state: &dyn StateStore,
    inputs: &RestoreInputs,
) -> Result<RestoreOutputs> {
    let paths = required_paths(&inputs.path)?;
    let key = CacheKey::new(inputs.key.as_str())?;
    let restore_keys = split_input(&inputs.restore_keys);
    debug!(
        paths = ?paths.patterns(),
        key = %key,
        restore_keys = ?restore_keys,
        lookup_only = inputs.lookup_only,
        fail_on_cache_miss = inputs.fail_on_cache_miss,
        "Restore inputs"
    );

    // A miss must not leave an earlier step's match behind for `run_save`.
    state.remove(CACHE_MATCHED_KEY)?;
    state.remove(CACHE_HIT)?;
    state.set(CACHE_PATH, &paths.joined())?;
    state.set(CACHE_KEY, key.as_str())?;

    let request = RestoreRequest::new(paths, key)
        .with_restore_keys(restore_keys)
        .with_fail_on_cache_miss(inputs.fail_on_cache_miss);
    let result = if inputs.lookup_only {
        orchestrator.lookup(&request).await?
    } else {
        orchestrator.restore(&request).await?
    };

    let matched_key = result.matched_key().map(str::to_string);
    let cache_hit = match &matched_key {
        Some(matched) => {
            state.set(CACHE_MATCHED_KEY, matched)?;
            state.set(CACHE_HIT, &result.cache_hit().to_string())?;
            Some(result.cache_hit())
        }
        None => None,
    };

    Ok(RestoreOutputs {
        cache_hit,
        matched_key,
        result,
    })
}

/// Run the save step. Returns `None` when the restore step already
/// matched the key exactly.
pub async fn run_save(
    orchestrator: &CacheOrchestrator,
    state: &dyn StateStore,
    inputs: &SaveInputs,
) -> Result<Option<SaveResult>> {
    let path = state
        .get(CACHE_PATH)?
        .filter(|p| !p.trim().is_empty())
        .or_else(|| inputs.path.clone())
        .unwrap_or_default();
    let paths = required_paths(&path)?;

    let key = state
        .get(CACHE_KEY)?
        .filter(|k| !k.trim().is_empty())
        .or_else(|| inputs.key.clone())
        .unwrap_or_default();
    let key = CacheKey::new(key)?;
    debug!(paths = ?paths.patterns(), key = %key, "Save inputs");

    if state.get(CACHE_MATCHED_KEY)?.as_deref() == Some(key.as_str()) {
        info!("Cache restored with key {}, not saving cache.", key);
        return Ok(None);
    }

    let result = orchestrator.save(&SaveRequest::new(paths, key)).await?;
    Ok(Some(result))
}
