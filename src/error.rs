//! Crate-level error aggregating the per-module errors.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::database::StoreError;
use crate::media::{MediaError, ObjectStoreError};
use crate::messaging::MessagingError;
use crate::posts::PostError;

/// Coarse classification used for logging and for mapping to responses at
/// the service edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker, cache or store unreachable; retrying may succeed
    Transport,
    NotFound,
    /// Input rejected before any side effect
    Validation,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoherenceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Post(#[from] PostError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

impl CoherenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Validation,
            Self::Messaging(e) if e.is_transient() => ErrorKind::Transport,
            Self::Messaging(_) => ErrorKind::Internal,
            Self::Cache(_) => ErrorKind::Transport,
            Self::Store(e) => store_kind(e),
            Self::Post(PostError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Post(PostError::Store(e)) => store_kind(e),
            Self::Media(MediaError::Store(e)) => store_kind(e),
            Self::Media(MediaError::ObjectStore(e)) | Self::ObjectStore(e) => object_store_kind(e),
        }
    }
}

fn store_kind(error: &StoreError) -> ErrorKind {
    if error.is_transient() {
        ErrorKind::Transport
    } else {
        ErrorKind::Internal
    }
}

fn object_store_kind(error: &ObjectStoreError) -> ErrorKind {
    match error {
        ObjectStoreError::InvalidId { .. } => ErrorKind::Validation,
        ObjectStoreError::Io { .. } | ObjectStoreError::Unavailable { .. } => ErrorKind::Transport,
    }
}

pub type Result<T> = std::result::Result<T, CoherenceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PostId;
    use crate::messaging::ConnectionState;

    #[test]
    fn classifies_module_errors() {
        let not_found: CoherenceError = PostError::not_found(&PostId::new()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let broker: CoherenceError = MessagingError::not_connected(ConnectionState::Connecting).into();
        assert_eq!(broker.kind(), ErrorKind::Transport);

        let store: CoherenceError = PostError::from(StoreError::unavailable("down")).into();
        assert_eq!(store.kind(), ErrorKind::Transport);

        let invalid: CoherenceError = ObjectStoreError::invalid_id("../x", "escapes root").into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);

        let config: CoherenceError =
            ConfigurationError::missing_required_field("url", "broker").into();
        assert_eq!(config.kind(), ErrorKind::Validation);
    }
}
