use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by a [`KeyValueStorage`](crate::storage::KeyValueStorage) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An upload rejected before it reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select an image file")]
    MissingFile,

    #[error("Please upload a valid image file (JPEG, JPG, or PNG)")]
    UnsupportedType(String),

    #[error("File size must be less than 10MB")]
    TooLarge(usize),
}

#[derive(Error, Debug)]
pub enum AuthError {
    /// The auth service refused the request; carries the message to show the user.
    #[error("{0}")]
    Rejected(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
