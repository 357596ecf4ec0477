//! Error types for the CreditShare service

use std::time::Duration;

use creditshare_blob::BlobError;
use creditshare_meta::{FileId, MetaError, UserId};
use thiserror::Error;

/// Coarse classification handed to the API layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// User or file missing.
    NotFound,
    /// A charge exceeds the balance.
    InsufficientCredits,
    /// The user may not act on the file.
    Forbidden,
    /// Malformed identifier or rejected argument.
    InvalidInput,
    /// Storage, lock or blob failure.
    Internal,
}

impl ErrorKind {
    /// True for policy outcomes that must not be retried as-is.
    pub fn is_policy(self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }
}

/// Errors returned by the service operations.
#[derive(Error, Debug)]
pub enum ShareError {
    /// The user does not exist.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The file does not exist.
    #[error("file {0} not found")]
    FileNotFound(FileId),

    /// The user's balance can't cover the charge.
    #[error("insufficient credits: {available} available, {required} required")]
    InsufficientCredits {
        /// Credits the operation needs
        required: u64,
        /// Credits the user holds
        available: u64,
    },

    /// The user has not downloaded the file.
    #[error("user {user} has not downloaded file {file}")]
    Forbidden {
        /// Acting user
        user: UserId,
        /// Target file
        file: FileId,
    },

    /// A caller-supplied argument was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The metadata store failed; nothing was committed.
    #[error("storage failure: {0}")]
    Storage(#[source] MetaError),

    /// The blob store failed.
    #[error("blob store failure: {0}")]
    Blob(#[source] BlobError),

    /// A blob operation did not finish in time.
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// The operation that stalled
        op: &'static str,
        /// The configured limit
        after: Duration,
    },

    /// Ownership was committed but the content could not be opened.
    /// The charge stands; retrying the download is free.
    #[error("file {file} is owned but could not be delivered: {reason}")]
    Delivery {
        /// The granted file
        file: FileId,
        /// What went wrong opening the stream
        reason: String,
    },
}

impl ShareError {
    /// Maps the error into the API-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShareError::UserNotFound(_) | ShareError::FileNotFound(_) => ErrorKind::NotFound,
            ShareError::InsufficientCredits { .. } => ErrorKind::InsufficientCredits,
            ShareError::Forbidden { .. } => ErrorKind::Forbidden,
            ShareError::InvalidInput(_) => ErrorKind::InvalidInput,
            ShareError::Storage(_)
            | ShareError::Blob(_)
            | ShareError::Timeout { .. }
            | ShareError::Delivery { .. } => ErrorKind::Internal,
        }
    }
}

impl From<MetaError> for ShareError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::UserNotFound(id) => ShareError::UserNotFound(id),
            MetaError::FileNotFound(id) => ShareError::FileNotFound(id),
            MetaError::InsufficientCredits {
                required,
                available,
                ..
            } => ShareError::InsufficientCredits {
                required,
                available,
            },
            MetaError::NotDownloaded { user, file } => ShareError::Forbidden { user, file },
            MetaError::InvalidId(s) => ShareError::InvalidInput(format!("malformed identifier '{}'", s)),
            MetaError::InvalidInput(s) => ShareError::InvalidInput(s),
            other => ShareError::Storage(other),
        }
    }
}

impl From<BlobError> for ShareError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::InvalidName { reason } => ShareError::InvalidInput(reason),
            other => ShareError::Blob(other),
        }
    }
}

/// Result alias for service operations.
pub type Result<T> = std::result::Result<T, ShareError>;
