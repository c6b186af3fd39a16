//! Object store error types.

use thiserror::Error;

/// Errors that can occur during filesystem object-store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk full: insufficient storage space")]
    DiskFull,

    #[error("storage error: {0}")]
    Other(String),
}
