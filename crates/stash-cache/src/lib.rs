//! Cache resolution and orchestration for stash.
//!
//! [`CacheOrchestrator`] exposes the three cache operations (lookup, restore,
//! save) on top of an [`ObjectStore`](stash_core::ObjectStore) and the
//! streaming archive codec. The [`job`] module wraps them into the restore and
//! save steps of a CI job, handing state from one to the other.

pub mod job;
pub mod orchestrator;
pub mod resolver;
pub mod types;

pub use job::{RestoreInputs, RestoreOutputs, SaveInputs, run_restore, run_save};
pub use orchestrator::CacheOrchestrator;
pub use resolver::{KeyResolver, Resolved};
pub use types::{RestoreRequest, RestoreResult, SaveRequest, SaveResult};
