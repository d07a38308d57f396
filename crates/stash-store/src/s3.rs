//! S3 object store.

use crate::config::S3Config;
use crate::progress::{LogProgress, ProgressSink};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::BytesMut;
use chrono::DateTime;
use futures::StreamExt;
use stash_core::{
    BodyStream, Error, ObjectListing, ObjectStore, ObjectSummary, Result, StorageKey,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Object store backed by an S3 bucket.
pub struct S3Store {
    client: Client,
    config: S3Config,
    progress: Arc<dyn ProgressSink>,
}

impl S3Store {
    /// Build a client from the resolved config.
    ///
    /// Unset region and credentials fall back to the AWS default provider chain.
    pub async fn connect(config: S3Config) -> Result<Self> {
        config.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                config.session_token.clone(),
                None,
                "stash",
            ));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        debug!(bucket = %config.bucket, endpoint = ?config.endpoint_url, "Connected to S3");
        Ok(Self::from_client(Client::from_conf(builder.build()), config))
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, config: S3Config) -> Self {
        Self {
            client,
            config,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn put_single(&self, key: &StorageKey, data: BytesMut) -> Result<u64> {
        let len = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .body(ByteStream::from(data.freeze()))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        self.progress.on_progress(key, len, Some(len));
        Ok(len)
    }

    async fn upload_parts(
        &self,
        key: &StorageKey,
        upload_id: &str,
        body: &mut BodyStream,
        buffer: &mut BytesMut,
    ) -> Result<(Vec<CompletedPart>, u64)> {
        let part_size = self.config.part_size;
        let mut parts = Vec::new();
        let mut uploaded = 0u64;

        loop {
            let ended = fill(body, buffer, part_size).await?;
            while buffer.len() >= part_size || (ended && !buffer.is_empty()) {
                let data = buffer.split_to(part_size.min(buffer.len())).freeze();
                let len = data.len() as u64;
                let part_number = parts.len() as i32 + 1;

                let output = self
                    .client
                    .upload_part()
                    .bucket(&self.config.bucket)
                    .key(key.as_str())
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(data))
                    .send()
                    .await
                    .map_err(classify_sdk_error)?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .part_number(part_number)
                        .build(),
                );
                uploaded += len;
                self.progress.on_progress(key, uploaded, None);
            }
            if ended {
                return Ok((parts, uploaded));
            }
        }
    }

    async fn abort_upload(&self, key: &StorageKey, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(err) = aborted {
            warn!(key = %key, "Failed to abort multipart upload: {}", DisplayErrorContext(&err));
        }
    }
}

/// Read from `body` until `buffer` holds at least `target` bytes.
/// Returns whether the body ended.
async fn fill(body: &mut BodyStream, buffer: &mut BytesMut, target: usize) -> Result<bool> {
    while buffer.len() < target {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(classify_sdk_error(err)),
        }
    }

    async fn fetch(&self, key: &StorageKey) -> Result<Option<BodyStream>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None);
            }
            Err(err) => return Err(classify_sdk_error(err)),
        };

        let body = futures::stream::unfold(output.body, |mut body| async move {
            body.next()
                .await
                .map(|chunk| (chunk.map_err(std::io::Error::other), body))
        });
        Ok(Some(Box::pin(body)))
    }

    async fn store(&self, key: &StorageKey, mut body: BodyStream) -> Result<u64> {
        let part_size = self.config.part_size;
        let mut buffer = BytesMut::with_capacity(part_size);
        if fill(&mut body, &mut buffer, part_size).await? {
            return self.put_single(key, buffer).await;
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(classify_sdk_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::Malformed("multipart upload created without an id".to_string()))?
            .to_string();
        debug!(key = %key, upload_id, "Started multipart upload");

        let (parts, uploaded) = match self
            .upload_parts(key, &upload_id, &mut body, &mut buffer)
            .await
        {
            Ok(done) => done,
            Err(err) => {
                self.abort_upload(key, &upload_id).await;
                return Err(err);
            }
        };

        let part_count = parts.len();
        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key.as_str())
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;
        if let Err(err) = completed {
            self.abort_upload(key, &upload_id).await;
            return Err(classify_sdk_error(err));
        }

        debug!(key = %key, parts = part_count, bytes = uploaded, "Completed multipart upload");
        Ok(uploaded)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<ObjectListing> {
        let mut listing = ObjectListing::default();
        let mut token: Option<String> = None;
        let mut pages = 0;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(classify_sdk_error)?;
            pages += 1;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or(DateTime::UNIX_EPOCH);
                listing.objects.push(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            let more = output.is_truncated().unwrap_or(false);
            match output.next_continuation_token() {
                Some(next) if more => {
                    if pages >= self.config.max_list_pages {
                        listing.truncated = true;
                        break;
                    }
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix, pages, objects = listing.objects.len(), truncated = listing.truncated, "Listed objects");
        Ok(listing)
    }

    fn name(&self) -> &str {
        "s3"
    }
}

/// Map an SDK failure onto the store error taxonomy.
fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ConstructionFailure(_) => Error::Malformed(message),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            Error::Transient(message)
        }
        SdkError::ServiceError(service) => classify_service_error(
            service.raw().status().as_u16(),
            service.err().code().unwrap_or_default(),
            message,
        ),
        _ => Error::Transient(message),
    }
}

fn classify_service_error(status: u16, code: &str, message: String) -> Error {
    match (status, code) {
        (401 | 403, _)
        | (
            _,
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
            | "InvalidToken",
        ) => Error::Unauthorized(message),
        (400, _) | (_, "InvalidBucketName" | "InvalidArgument" | "NoSuchBucket") => {
            Error::Malformed(message)
        }
        _ => Error::Transient(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::head_object::HeadObjectError;

    #[test]
    fn test_service_error_classification() {
        assert!(matches!(
            classify_service_error(403, "", "denied".into()),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            classify_service_error(400, "ExpiredToken", "expired".into()),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            classify_service_error(400, "InvalidRequest", "bad".into()),
            Error::Malformed(_)
        ));
        assert!(matches!(
            classify_service_error(404, "NoSuchBucket", "no bucket".into()),
            Error::Malformed(_)
        ));
        assert!(classify_service_error(503, "SlowDown", "slow".into()).is_transient());
        assert!(classify_service_error(500, "InternalError", "oops".into()).is_transient());
    }

    #[test]
    fn test_transport_errors_are_transient() {
        let err: SdkError<HeadObjectError, HttpResponse> =
            SdkError::timeout_error("operation timed out");
        assert!(classify_sdk_error(err).is_transient());
    }

    #[test]
    fn test_construction_failure_is_malformed() {
        let err: SdkError<HeadObjectError, HttpResponse> =
            SdkError::construction_failure("missing bucket");
        assert!(matches!(classify_sdk_error(err), Error::Malformed(_)));
    }
}
