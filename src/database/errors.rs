//! Record store errors shared by the post and media stores.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store could not be reached; raised by in-memory stores under failure
    /// injection
    #[error("Record store unavailable: {message}")]
    Unavailable { message: String },

    /// A stored row could not be mapped to a domain type
    #[error("Corrupt {entity} record: {message}")]
    Corrupt { entity: String, message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn corrupt(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Unavailable stores and pool errors may succeed on retry; corrupt data
    /// will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Unavailable { .. } => true,
            Self::Corrupt { .. } => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transience() {
        assert!(StoreError::unavailable("down").is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!StoreError::corrupt("post", "bad").is_transient());
    }
}
