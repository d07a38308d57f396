//! Cache keys, path sets, and object store addressing.
//!
//! Every stored object lives at `<cache-key>/<artifact-name>`, where the
//! artifact name fingerprints the requested path patterns (not the archived
//! bytes) and carries the archive extension of the compression in use.

use crate::input::split_input;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen identifier for one cache generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key. The key is trimmed and must not be empty.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(Error::MissingInput("key".to_string()));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = Error;

    fn try_from(key: String) -> Result<Self> {
        Self::new(key)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Compression algorithm applied to the archive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Zstd,
    Lz4,
}

impl Compression {
    /// File extension of an archive compressed with this algorithm.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
            Compression::Zstd => "tar.zst",
            Compression::Lz4 => "tar.lz4",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::Lz4 => "lz4",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            "lz4" => Ok(Compression::Lz4),
            other => Err(Error::InvalidInput(format!(
                "Unknown compression: {}",
                other
            ))),
        }
    }
}

/// Ordered list of path patterns to cache.
///
/// Patterns are normalized on construction: trimmed, with blank lines and
/// `#` comments removed. Order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSet {
    patterns: Vec<String>,
}

impl PathSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .flat_map(|p| split_input(p.as_ref()))
            .collect();
        Self { patterns }
    }

    /// Parse a newline-separated pattern list.
    pub fn parse(input: &str) -> Self {
        Self {
            patterns: split_input(input),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The normalized patterns joined with newlines.
    pub fn joined(&self) -> String {
        self.patterns.join("\n")
    }
}

/// Deterministic fingerprint of a path set, used as the stored filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn for_paths(paths: &PathSet, compression: Compression) -> Self {
        let digest = md5::compute(paths.joined().as_bytes());
        Self(format!("{:x}.{}", digest, compression.extension()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full object store address: `<cache-key>/<artifact-name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    full: String,
    split: usize,
}

impl StorageKey {
    pub fn new(key: &str, artifact: &ArtifactName) -> Self {
        Self {
            full: format!("{}/{}", key, artifact),
            split: key.len(),
        }
    }

    /// Split a stored object key on its last `/`.
    pub fn parse(object_key: &str) -> Result<Self> {
        let split = object_key
            .rfind('/')
            .ok_or_else(|| Error::InvalidStorageKey(object_key.to_string()))?;
        if split + 1 == object_key.len() {
            return Err(Error::InvalidStorageKey(object_key.to_string()));
        }
        Ok(Self {
            full: object_key.to_string(),
            split,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The logical cache key part.
    pub fn cache_key(&self) -> &str {
        &self.full[..self.split]
    }

    /// The artifact name part.
    pub fn artifact_name(&self) -> &str {
        &self.full[self.split + 1..]
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_name_matches_historical_layout() {
        let name = ArtifactName::for_paths(&PathSet::new(["tests"]), Compression::Gzip);
        assert_eq!(name.as_str(), "b61a6d542f9036550ba9c401c80f00ef.tar.gz");

        let name = ArtifactName::for_paths(&PathSet::new(["tests/test.txt"]), Compression::Gzip);
        assert_eq!(name.as_str(), "5ae889e6d39b6deb7b3b9ba1bb15a5f6.tar.gz");

        let name = ArtifactName::for_paths(&PathSet::new(["*.json"]), Compression::Gzip);
        assert_eq!(name.as_str(), "b31ec5f19793e2b7103acd7336754a1c.tar.gz");
    }

    #[test]
    fn test_artifact_name_ignores_formatting() {
        let a = PathSet::parse("target\nnode_modules");
        let b = PathSet::parse("  target  \n# deps\n\nnode_modules\n");
        assert_eq!(
            ArtifactName::for_paths(&a, Compression::Zstd),
            ArtifactName::for_paths(&b, Compression::Zstd)
        );
    }

    #[test]
    fn test_artifact_name_depends_on_order_and_compression() {
        let a = PathSet::new(["a", "b"]);
        let b = PathSet::new(["b", "a"]);
        assert_ne!(
            ArtifactName::for_paths(&a, Compression::Gzip),
            ArtifactName::for_paths(&b, Compression::Gzip)
        );
        assert_ne!(
            ArtifactName::for_paths(&a, Compression::Gzip),
            ArtifactName::for_paths(&a, Compression::Zstd)
        );
    }

    #[test]
    fn test_storage_key_round_trip() {
        let artifact = ArtifactName::for_paths(&PathSet::new(["tests"]), Compression::Gzip);
        let key = StorageKey::new("linux/cargo-abc", &artifact);
        assert_eq!(
            key.as_str(),
            "linux/cargo-abc/b61a6d542f9036550ba9c401c80f00ef.tar.gz"
        );

        let parsed = StorageKey::parse(key.as_str()).unwrap();
        assert_eq!(parsed.cache_key(), "linux/cargo-abc");
        assert_eq!(parsed.artifact_name(), artifact.as_str());
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_storage_key_rejects_unsplittable_keys() {
        assert!(StorageKey::parse("no-separator").is_err());
        assert!(StorageKey::parse("trailing/").is_err());
    }

    #[test]
    fn test_cache_key_requires_value() {
        assert!(matches!(CacheKey::new("   "), Err(Error::MissingInput(_))));
        assert_eq!(CacheKey::new(" k ").unwrap().as_str(), "k");
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert_eq!("GZ".parse::<Compression>().unwrap(), Compression::Gzip);
        assert!("brotli".parse::<Compression>().is_err());
    }
}
