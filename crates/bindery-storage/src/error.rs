//! Error types for the storage adapters.

use std::path::PathBuf;

use bindery_core::Exception;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur while reading or writing a store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A typed lookup found no stored value.
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// A value could not be converted to or from JSON.
    #[error("failed to convert value for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing file could not be read or written.
    #[error("failed to access store file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file does not contain a JSON object.
    #[error("store file '{path}' is not a valid JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Create a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a serialization error.
    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }

    /// Create an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The key this error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::KeyNotFound { key } | Self::Serialization { key, .. } => Some(key),
            Self::Io { .. } | Self::Corrupt { .. } => None,
        }
    }
}

impl From<StorageError> for Exception {
    fn from(err: StorageError) -> Self {
        Exception::wrap(err)
    }
}
