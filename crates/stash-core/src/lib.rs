//! Stash Core
//!
//! Core domain types, traits, and error handling for the stash build cache.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod error;
pub mod input;
pub mod keys;
pub mod ports;
pub mod resolution;
pub mod state;

pub use error::{Error, Result};
pub use keys::{ArtifactName, CacheKey, Compression, PathSet, StorageKey};
pub use ports::{BodyStream, ObjectListing, ObjectStore, ObjectSummary, StateStore};
pub use resolution::ResolvedMatch;
