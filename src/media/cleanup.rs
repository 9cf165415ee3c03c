//! Idempotent reclamation of the media of a deleted post.
//!
//! For each referenced id: resolve the record, delete the remote object
//! (absent counts as deleted), then delete the record. An item whose remote
//! delete fails is left in place and reported; the rest of the batch still
//! runs. Running the same batch twice is harmless: the second run finds
//! nothing to resolve.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::model::Media;
use super::object_store::{ObjectStore, RemoteDeletion};
use super::store::MediaStore;
use crate::database::StoreResult;
use crate::ids::{MediaId, PostId};

/// Where a failed item stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStage {
    /// Object store delete failed; record kept so a later run can retry.
    Remote,
    /// Remote object gone, record delete failed.
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub media_id: MediaId,
    pub public_id: String,
    pub stage: CleanupStage,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<MediaId>,
    /// Ids with no record; a previous delivery or another worker got there first
    pub already_absent: Vec<MediaId>,
    pub failed: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.deleted.len() + self.already_absent.len() + self.failed.len()
    }
}

#[derive(Clone)]
pub struct MediaCleanup {
    store: Arc<dyn MediaStore>,
    objects: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for MediaCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCleanup")
            .field("object_store", &self.objects.name())
            .finish()
    }
}

impl MediaCleanup {
    pub fn new(store: Arc<dyn MediaStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Reclaim every media item of `post_id`. Fails only if the records could
    /// not be looked up at all; per-item failures land in the report.
    pub async fn reclaim(
        &self,
        post_id: &PostId,
        media_ids: &[MediaId],
    ) -> StoreResult<CleanupReport> {
        let ids = dedupe(media_ids);
        let mut report = CleanupReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        let resolved = self.store.find_by_ids(&ids).await?;
        let found: HashSet<&MediaId> = resolved.iter().map(|m| &m.id).collect();
        report.already_absent = ids.into_iter().filter(|id| !found.contains(id)).collect();

        for media in resolved {
            match self.reclaim_one(&media).await {
                Ok(()) => {
                    info!(
                        post_id = %post_id,
                        media_id = %media.id,
                        public_id = %media.public_id,
                        "Deleted media of deleted post"
                    );
                    report.deleted.push(media.id.clone());
                }
                Err(failure) => {
                    error!(
                        post_id = %post_id,
                        media_id = %failure.media_id,
                        public_id = %failure.public_id,
                        stage = ?failure.stage,
                        error = %failure.error,
                        "Media cleanup failed; item left orphaned"
                    );
                    report.failed.push(failure);
                }
            }
        }

        if !report.already_absent.is_empty() {
            warn!(
                post_id = %post_id,
                count = report.already_absent.len(),
                "Some media were already gone"
            );
        }
        Ok(report)
    }

    async fn reclaim_one(&self, media: &Media) -> Result<(), CleanupFailure> {
        let failure = |stage, error: String| CleanupFailure {
            media_id: media.id.clone(),
            public_id: media.public_id.clone(),
            stage,
            error,
        };

        match self.objects.delete(&media.public_id).await {
            Ok(RemoteDeletion::Deleted) => {}
            Ok(RemoteDeletion::NotFound) => {
                warn!(public_id = %media.public_id, "Remote object already absent");
            }
            Err(e) => return Err(failure(CleanupStage::Remote, e.to_string())),
        }

        self.store
            .delete_by_id(&media.id)
            .await
            .map(|_| ())
            .map_err(|e| failure(CleanupStage::Record, e.to_string()))
    }
}

/// Drop repeated ids, keeping first occurrence order.
fn dedupe(ids: &[MediaId]) -> Vec<MediaId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::media::model::NewMedia;
    use crate::media::object_store::InMemoryObjectStore;
    use crate::media::store::InMemoryMediaStore;

    struct Fixture {
        cleanup: MediaCleanup,
        store: InMemoryMediaStore,
        objects: InMemoryObjectStore,
    }

    fn fixture() -> Fixture {
        let store = InMemoryMediaStore::new();
        let objects = InMemoryObjectStore::new();
        Fixture {
            cleanup: MediaCleanup::new(Arc::new(store.clone()), Arc::new(objects.clone())),
            store,
            objects,
        }
    }

    async fn upload(f: &Fixture, public_id: &str) -> Media {
        f.objects.put(public_id, b"bytes".to_vec()).await.unwrap();
        f.store
            .insert(
                NewMedia {
                    public_id: public_id.to_string(),
                    original_name: public_id.to_string(),
                    mime_type: "png".to_string(),
                    url: format!("memory://{public_id}"),
                }
                .into_media(UserId::new()),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let f = fixture();
        let a = upload(&f, "a").await;
        let b = upload(&f, "b").await;
        let ids = [a.id.clone(), b.id.clone()];

        let first = f.cleanup.reclaim(&PostId::new(), &ids).await.unwrap();
        assert_eq!(first.deleted, ids);
        assert!(f.objects.is_empty());
        assert!(f.store.is_empty());

        let calls = f.objects.delete_calls();
        let second = f.cleanup.reclaim(&PostId::new(), &ids).await.unwrap();
        assert!(second.deleted.is_empty());
        assert_eq!(second.already_absent, ids);
        assert!(second.is_complete());
        assert_eq!(f.objects.delete_calls(), calls);
    }

    #[tokio::test]
    async fn remote_failure_isolates_one_item() {
        let f = fixture();
        let a = upload(&f, "a").await;
        let b = upload(&f, "b").await;
        let c = upload(&f, "c").await;
        f.objects.fail_deletes_for("b");

        let report = f
            .cleanup
            .reclaim(&PostId::new(), &[a.id.clone(), b.id.clone(), c.id.clone()])
            .await
            .unwrap();
        assert_eq!(report.deleted, vec![a.id, c.id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].media_id, b.id);
        assert_eq!(report.failed[0].stage, CleanupStage::Remote);
        assert!(f.store.contains(&b.id));
        assert!(f.objects.contains("b"));
        assert_eq!(report.attempted(), 3);
    }

    #[tokio::test]
    async fn missing_remote_object_still_deletes_record() {
        let f = fixture();
        let a = upload(&f, "a").await;
        f.objects.delete("a").await.unwrap();

        let report = f.cleanup.reclaim(&PostId::new(), &[a.id.clone()]).await.unwrap();
        assert_eq!(report.deleted, vec![a.id.clone()]);
        assert!(!f.store.contains(&a.id));
    }

    #[tokio::test]
    async fn record_failure_is_reported_at_record_stage() {
        let f = fixture();
        let a = upload(&f, "a").await;
        f.store.set_failing_deletes(true);

        let report = f.cleanup.reclaim(&PostId::new(), &[a.id]).await.unwrap();
        assert_eq!(report.failed[0].stage, CleanupStage::Record);
        assert!(!f.objects.contains("a"));
    }

    #[tokio::test]
    async fn lookup_failure_is_an_error() {
        let f = fixture();
        let a = upload(&f, "a").await;
        f.store.set_failing_lookups(true);
        assert!(f.cleanup.reclaim(&PostId::new(), &[a.id]).await.is_err());
        assert!(f.objects.contains("a"));
    }

    #[tokio::test]
    async fn duplicate_and_empty_id_lists() {
        let f = fixture();
        let a = upload(&f, "a").await;
        let report = f
            .cleanup
            .reclaim(&PostId::new(), &[a.id.clone(), a.id.clone()])
            .await
            .unwrap();
        assert_eq!(report.deleted, vec![a.id]);
        assert_eq!(report.attempted(), 1);

        let empty = f.cleanup.reclaim(&PostId::new(), &[]).await.unwrap();
        assert_eq!(empty, CleanupReport::default());
    }
}
