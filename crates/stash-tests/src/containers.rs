//! Testcontainer configurations for integration tests.

use stash_store::{S3Config, S3Store};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::minio::MinIO;

const MINIO_USER: &str = "minioadmin";
const MINIO_PASSWORD: &str = "minioadmin";

/// MinIO container standing in for S3.
pub struct MinioContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<MinIO>,
    endpoint: String,
}

impl MinioContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = MinIO::default().with_tag("latest").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(9000).await?;
        let endpoint = format!("http://{}:{}", host, port);

        Ok(Self {
            container,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Store config for a bucket on this container.
    pub fn config(&self, bucket: &str) -> S3Config {
        S3Config::new(bucket)
            .with_region("us-east-1")
            .with_credentials(MINIO_USER, MINIO_PASSWORD)
            .with_endpoint(self.endpoint.clone())
            .with_path_style(true)
    }

    /// Connect to a bucket, creating it first.
    pub async fn store(&self, bucket: &str) -> anyhow::Result<S3Store> {
        self.store_with(self.config(bucket)).await
    }

    /// Connect with a custom config, creating its bucket first.
    pub async fn store_with(&self, config: S3Config) -> anyhow::Result<S3Store> {
        let store = S3Store::connect(config).await?;
        store
            .client()
            .create_bucket()
            .bucket(store.bucket())
            .send()
            .await?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_minio_container_starts() {
        let minio = MinioContainer::start().await.unwrap();
        assert!(minio.endpoint().contains("http://"));
    }
}
