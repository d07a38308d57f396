//! Object store adapters for stash.
//!
//! Every adapter implements [`stash_core::ObjectStore`]: S3 (and S3-compatible
//! services) for real use, a local directory for offline runs, and an
//! in-process store for tests.

pub mod config;
pub mod filesystem;
pub mod memory;
pub mod progress;
pub mod s3;

pub use config::S3Config;
pub use filesystem::FilesystemStore;
pub use memory::{MemoryStore, StoreCall};
pub use progress::{LogProgress, ProgressSink};
pub use s3::S3Store;
