use thiserror::Error;

use crate::RecordKey;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordKey),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("invalid blob path: {0}")]
    InvalidPath(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        // Database internals wrap our own errors in anyhow; unwrap them again
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(other) => StoreError::Backend(format!("{:#}", other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
