use crate::protocol::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HoldError {
    #[error("holder not found: {0}")]
    NotFound(String),

    #[error("holder already exists: {0}")]
    AlreadyExists(String),

    #[error("content hash mismatch: expected {expected}, actual {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("multipart part {part_number} too small: {size} bytes, minimum {minimum}")]
    PartTooSmall {
        part_number: usize,
        size: usize,
        minimum: usize,
    },

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HoldError {
    /// Caller-facing classification. Everything that is not a caller mistake
    /// collapses into `Internal`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HoldError::NotFound(_) => StatusCode::NotFound,
            HoldError::AlreadyExists(_) => StatusCode::AlreadyExists,
            HoldError::HashMismatch { .. } => StatusCode::HashMismatch,
            HoldError::InvalidArgument(_) => StatusCode::InvalidArgument,
            HoldError::PartTooSmall { .. }
            | HoldError::ObjectNotFound(_)
            | HoldError::Config(_)
            | HoldError::Io(_)
            | HoldError::Database(_)
            | HoldError::ObjectStore(_)
            | HoldError::Internal(_) => StatusCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, HoldError>;
