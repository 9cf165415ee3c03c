//! Media service and object store errors.

use thiserror::Error;

use crate::database::StoreError;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Key would escape the store root or is otherwise unusable
    #[error("Invalid object id '{public_id}': {reason}")]
    InvalidId { public_id: String, reason: String },

    #[error("Object store I/O error for '{public_id}': {source}")]
    Io {
        public_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store unavailable: {message}")]
    Unavailable { message: String },
}

impl ObjectStoreError {
    pub fn invalid_id(public_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            public_id: public_id.into(),
            reason: reason.into(),
        }
    }

    pub fn io(public_id: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            public_id: public_id.into(),
            source,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

pub type MediaResult<T> = Result<T, MediaError>;
