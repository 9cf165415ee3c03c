//! Post service errors.

use thiserror::Error;

use crate::database::StoreError;
use crate::ids::PostId;

#[derive(Debug, Error)]
pub enum PostError {
    /// Absent, or not owned by the caller; the two are indistinguishable to
    /// callers
    #[error("Post {post_id} not found or not owned by caller")]
    NotFound { post_id: PostId },

    #[error("Post store error: {0}")]
    Store(#[from] StoreError),
}

impl PostError {
    pub fn not_found(post_id: &PostId) -> Self {
        Self::NotFound {
            post_id: post_id.clone(),
        }
    }
}

pub type PostResult<T> = Result<T, PostError>;
