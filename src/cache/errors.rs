//! Cache error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or refused the connection
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// A cached value could not be encoded or decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Command failed on a reachable backend
    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
