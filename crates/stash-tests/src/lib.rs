//! Integration test infrastructure for stash.
//!
//! Starts a MinIO container and hands out [`S3Store`](stash_store::S3Store)s
//! pointing at a fresh bucket, so the S3 adapter and the cache operations can
//! be exercised against a real S3 API.
//!
//! # Usage
//!
//! ```ignore
//! use stash_tests::MinioContainer;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let minio = MinioContainer::start().await.unwrap();
//!     let store = minio.store("my-bucket").await.unwrap();
//! }
//! ```

pub mod containers;
pub mod fixtures;

pub use containers::MinioContainer;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,stash_cache=debug,stash_store=debug")),
        )
        .with_test_writer()
        .try_init();
}
