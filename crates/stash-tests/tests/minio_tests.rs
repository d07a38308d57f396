//! S3 adapter and cache operations against MinIO.
//!
//! Run with `cargo test -p stash-tests --features integration` (needs docker).

#![cfg(feature = "integration")]

use stash_cache::{CacheOrchestrator, RestoreRequest, SaveRequest};
use stash_core::{
    ArtifactName, CacheKey, Compression, Error, ObjectStore, PathSet, ResolvedMatch, StorageKey,
};
use stash_store::config::MIN_PART_SIZE;
use stash_store::{S3Config, S3Store};
use stash_tests::{MinioContainer, body, collect, init_test_logging, noise, write_tree};
use std::sync::Arc;

fn storage_key(key: &str) -> StorageKey {
    let artifact = ArtifactName::for_paths(&PathSet::parse("tests"), Compression::Gzip);
    StorageKey::new(key, &artifact)
}

#[tokio::test]
async fn test_object_operations() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store = minio.store("objects").await.unwrap();
    let key = storage_key("k");

    assert!(!store.exists(&key).await.unwrap());
    assert!(store.fetch(&key).await.unwrap().is_none());

    let data = noise(100_000, 1);
    let stored = store.store(&key, body(data.clone(), 16 * 1024)).await.unwrap();
    assert_eq!(stored, data.len() as u64);

    assert!(store.exists(&key).await.unwrap());
    let fetched = store.fetch(&key).await.unwrap().unwrap();
    assert_eq!(collect(fetched).await.unwrap(), data);
}

#[tokio::test]
async fn test_listing_by_prefix() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store = minio.store("listing").await.unwrap();

    for name in ["deps-1", "deps-2", "other-1"] {
        store
            .store(&storage_key(name), body(b"x".to_vec(), 1))
            .await
            .unwrap();
    }

    let listing = store.list_by_prefix("deps-").await.unwrap();
    assert!(!listing.truncated);
    let mut keys: Vec<_> = listing.objects.iter().map(|o| o.key.clone()).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            storage_key("deps-1").to_string(),
            storage_key("deps-2").to_string()
        ]
    );
    assert!(store.list_by_prefix("none-").await.unwrap().objects.is_empty());
}

#[tokio::test]
async fn test_multipart_upload() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store = minio
        .store_with(minio.config("multipart").with_part_size(MIN_PART_SIZE))
        .await
        .unwrap();
    let key = storage_key("big");

    let data = noise(MIN_PART_SIZE + MIN_PART_SIZE / 5, 42);
    let stored = store.store(&key, body(data.clone(), 64 * 1024)).await.unwrap();
    assert_eq!(stored, data.len() as u64);

    let fetched = store.fetch(&key).await.unwrap().unwrap();
    assert_eq!(collect(fetched).await.unwrap(), data);
}

#[tokio::test]
async fn test_failed_stream_leaves_no_object() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store = minio
        .store_with(minio.config("aborted").with_part_size(MIN_PART_SIZE))
        .await
        .unwrap();
    let key = storage_key("broken");

    let good = noise(MIN_PART_SIZE + 1024, 3);
    let mut pieces: Vec<std::io::Result<bytes::Bytes>> = vec![Ok(good.into())];
    pieces.push(Err(std::io::Error::other("archiver died")));
    let broken: stash_core::BodyStream = Box::pin(futures::stream::iter(pieces));

    assert!(store.store(&key, broken).await.is_err());
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_missing_bucket_is_a_fault_not_a_miss() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store = S3Store::connect(minio.config("never-created")).await.unwrap();

    let err = store.list_by_prefix("k").await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_wrong_credentials_are_rejected() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    minio.store("secured").await.unwrap();
    let config = S3Config::new("secured")
        .with_region("us-east-1")
        .with_credentials("minioadmin", "wrong-secret")
        .with_endpoint(minio.endpoint())
        .with_path_style(true);
    let store = S3Store::connect(config).await.unwrap();

    let err = store.list_by_prefix("k").await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)), "got {err:?}");
}

#[tokio::test]
async fn test_cache_round_trip_through_s3() {
    init_test_logging();
    let minio = MinioContainer::start().await.unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(minio.store("cache").await.unwrap());
    let paths = PathSet::parse("target\n# build output\nCargo.lock");

    let src = tempfile::tempdir().unwrap();
    let app = noise(200_000, 9);
    write_tree(
        src.path(),
        &[
            ("target/debug/app", app.as_slice()),
            ("target/debug/.fingerprint/app", b"fp".as_slice()),
            ("Cargo.lock", b"# lock".as_slice()),
        ],
    )
    .unwrap();

    let cache = CacheOrchestrator::new(Arc::clone(&store), src.path());
    let key = CacheKey::new("cargo-linux-abc").unwrap();
    let saved = cache
        .save(&SaveRequest::new(paths.clone(), key.clone()))
        .await
        .unwrap();
    assert!(saved.saved);
    assert!(!cache.save(&SaveRequest::new(paths.clone(), key)).await.unwrap().saved);

    let dst = tempfile::tempdir().unwrap();
    let restored = CacheOrchestrator::new(store, dst.path())
        .restore(
            &RestoreRequest::new(paths, CacheKey::new("cargo-linux-def").unwrap())
                .with_restore_keys(vec!["cargo-linux-".into(), "cargo-".into()]),
        )
        .await
        .unwrap();

    assert_eq!(
        restored.matched,
        ResolvedMatch::PartialHit {
            key: "cargo-linux-abc".into(),
            restore_key: "cargo-linux-".into()
        }
    );
    assert_eq!(restored.bytes_transferred, saved.bytes_uploaded);
    assert_eq!(
        std::fs::read(dst.path().join("target/debug/app")).unwrap(),
        app
    );
    assert_eq!(
        std::fs::read_to_string(dst.path().join("Cargo.lock")).unwrap(),
        "# lock"
    );
}
