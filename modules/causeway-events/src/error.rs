//! Typed errors for store operations.

use thiserror::Error;

use crate::concurrency::ConcurrencyError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend I/O failure. Not retried by the store.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Expected vs. actual stream sequence mismatch.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// `payload`/`meta` could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event id was already present (in-memory backend constraint).
    #[error("duplicate event id: {0}")]
    DuplicateId(String),

    #[error("replay cursor {0} does not match any stored event")]
    UnknownCursor(String),

    #[error("page size must be at least 1")]
    InvalidPageSize,

    #[error("event {0} asserts an expected sequence but has no identifier")]
    MissingStreamKey(String),
}

impl StoreError {
    /// Only concurrency conflicts are worth retrying after a re-read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Concurrency(_))
    }

    pub fn as_concurrency(&self) -> Option<&ConcurrencyError> {
        match self {
            StoreError::Concurrency(err) => Some(err),
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
