//! Media record keeping: registration of uploaded media and listing.

use std::sync::Arc;

use tracing::info;

use super::errors::MediaResult;
use super::model::{Media, MediaListQuery, MediaPage, NewMedia};
use super::object_store::ObjectStore;
use super::store::MediaStore;
use crate::ids::CallerIdentity;
use crate::pagination::Pagination;

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn MediaStore>,
    objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for MediaService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaService")
            .field("object_store", &self.objects.name())
            .finish()
    }
}

impl MediaService {
    pub fn new(store: Arc<dyn MediaStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Store `bytes` under the upload's `public_id`, then record it as owned
    /// by the caller.
    pub async fn register(
        &self,
        caller: &CallerIdentity,
        upload: NewMedia,
        bytes: Vec<u8>,
    ) -> MediaResult<Media> {
        self.objects.put(&upload.public_id, bytes).await?;
        let media = self.store.insert(upload.into_media(caller.user_id.clone())).await?;
        info!(
            media_id = %media.id,
            public_id = %media.public_id,
            user_id = %caller.user_id,
            "Media registered"
        );
        Ok(media)
    }

    /// All media, newest first.
    pub async fn list(&self, query: MediaListQuery) -> MediaResult<MediaPage> {
        let query = query.normalized();
        let (media, total) = self.store.list(query).await?;
        Ok(MediaPage {
            media,
            pagination: Pagination::new(query.page, query.limit, total),
        })
    }
}
