//! Error types for the blob store.

use thiserror::Error;

use crate::BlobId;

/// Result type alias for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Error variants for blob operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// No blob has been written under the name.
    #[error("no blob named '{name}'")]
    NameNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// No blob exists with the identifier.
    #[error("blob {id} not found")]
    NotFound {
        /// The missing blob.
        id: BlobId,
    },

    /// A blob was already committed under the name; blobs are write-once.
    #[error("blob '{name}' already exists")]
    AlreadyExists {
        /// The contested name.
        name: String,
    },

    /// The name is empty or too long.
    #[error("invalid blob name: {reason}")]
    InvalidName {
        /// Why the name was rejected.
        reason: String,
    },

    /// The identifier is not in the store's format.
    #[error("malformed blob identifier '{0}'")]
    InvalidId(String),

    /// Stored bytes or metadata don't match what was recorded.
    #[error("blob {id} is corrupt: {reason}")]
    Corrupt {
        /// The damaged blob.
        id: BlobId,
        /// Description of the damage.
        reason: String,
    },

    /// Sidecar metadata could not be encoded or decoded.
    #[error("metadata codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
