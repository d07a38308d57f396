//! Error types for stash.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Input errors
    #[error("Input required and not supplied: {0}")]
    MissingInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Cache errors
    #[error("Cache not found with key: {key}, restore keys: [{}]", .restore_keys.join(", "))]
    CacheMiss {
        key: String,
        restore_keys: Vec<String>,
    },

    #[error("Corrupt cache archive: {0}")]
    CorruptArchive(String),

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    // Object store errors
    #[error("Object store access denied: {0}")]
    Unauthorized(String),

    #[error("Object store request failed: {0}")]
    Transient(String),

    #[error("Malformed object store request: {0}")]
    Malformed(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure came from the transport and may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Whether stored archive bytes failed to decode.
    pub fn is_corrupt_archive(&self) -> bool {
        matches!(self, Error::CorruptArchive(_))
    }

    /// The underlying I/O error kind, if this is an I/O failure.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Error::Io(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
