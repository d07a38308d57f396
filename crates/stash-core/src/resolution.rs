//! Outcome of resolving a requested key against the store.

use serde::{Deserialize, Serialize};

/// Which stored key, if any, was selected for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolvedMatch {
    /// The requested key itself.
    Hit { key: String },
    /// A different key found through a restore prefix.
    PartialHit { key: String, restore_key: String },
    /// Nothing resolved.
    Miss,
}

impl ResolvedMatch {
    /// Build the match for a candidate found under `restore_key`.
    ///
    /// A candidate equal to the requested key is an exact hit.
    pub fn from_candidate(requested: &str, candidate: &str, restore_key: &str) -> Self {
        if candidate == requested {
            ResolvedMatch::Hit {
                key: candidate.to_string(),
            }
        } else {
            ResolvedMatch::PartialHit {
                key: candidate.to_string(),
                restore_key: restore_key.to_string(),
            }
        }
    }

    /// The matched key string.
    pub fn matched_key(&self) -> Option<&str> {
        match self {
            ResolvedMatch::Hit { key } | ResolvedMatch::PartialHit { key, .. } => Some(key),
            ResolvedMatch::Miss => None,
        }
    }

    pub fn is_exact_hit(&self) -> bool {
        matches!(self, ResolvedMatch::Hit { .. })
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, ResolvedMatch::Miss)
    }
}
