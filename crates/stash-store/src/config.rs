//! Configuration for the S3 object store.

use stash_core::{Error, Result};

/// Smallest part S3 accepts in a multipart upload, except the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Resolved S3 settings.
///
/// Built once from flags, environment and config file before the store is
/// created; the store itself never reads the environment.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding cache objects.
    pub bucket: String,
    /// Region; the AWS default chain decides when unset.
    pub region: Option<String>,
    /// Static access key id, paired with `secret_access_key`.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint_url: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    pub force_path_style: bool,
    /// Listing pages fetched per prefix before the result is marked truncated.
    pub max_list_pages: usize,
    /// Multipart upload part size.
    pub part_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            endpoint_url: None,
            force_path_style: false,
            max_list_pages: 1,
            part_size: 8 * 1024 * 1024,
        }
    }
}

impl S3Config {
    /// Create a config for a bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Use static credentials instead of the default provider chain.
    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Point at an S3-compatible endpoint such as MinIO.
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_path_style(mut self, enabled: bool) -> Self {
        self.force_path_style = enabled;
        self
    }

    pub fn with_max_list_pages(mut self, pages: usize) -> Self {
        self.max_list_pages = pages;
        self
    }

    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes;
        self
    }

    /// Reject settings the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::MissingInput("bucket".to_string()));
        }
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "access key id supplied without a secret access key".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::Config(
                    "secret access key supplied without an access key id".to_string(),
                ));
            }
            _ => {}
        }
        if self.session_token.is_some() && self.access_key_id.is_none() {
            return Err(Error::Config(
                "session token requires static credentials".to_string(),
            ));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(Error::Config(format!(
                "part size {} is below the {} byte minimum",
                self.part_size, MIN_PART_SIZE
            )));
        }
        if self.max_list_pages == 0 {
            return Err(Error::Config("max list pages must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = S3Config::new("ci-cache");
        assert_eq!(config.max_list_pages, 1);
        assert_eq!(config.part_size, 8 * 1024 * 1024);
        assert!(!config.force_path_style);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_bucket() {
        let err = S3Config::default().validate().unwrap_err();
        assert!(matches!(err, Error::MissingInput(ref name) if name == "bucket"));
    }

    #[test]
    fn test_half_supplied_credentials() {
        let mut config = S3Config::new("b").with_credentials("AKIA", "secret");
        config.validate().unwrap();

        config.secret_access_key = None;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let token_only = S3Config::new("b").with_session_token("token");
        assert!(matches!(token_only.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_part_size_minimum() {
        let config = S3Config::new("b").with_part_size(1024);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        S3Config::new("b").with_part_size(MIN_PART_SIZE).validate().unwrap();
    }
}
