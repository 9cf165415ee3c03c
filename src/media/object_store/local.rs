//! Filesystem object store: one file per object under a root directory.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectStore, RemoteDeletion};
use crate::media::errors::{ObjectStoreError, ObjectStoreResult};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `public_id` under the root. Only plain relative segments are
    /// accepted, so no id can address a file outside the root.
    fn path_for(&self, public_id: &str) -> ObjectStoreResult<PathBuf> {
        if public_id.is_empty() {
            return Err(ObjectStoreError::invalid_id(public_id, "empty id"));
        }
        let relative = Path::new(public_id);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ObjectStoreError::invalid_id(
                public_id,
                "only relative path segments are allowed",
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, public_id: &str, bytes: Vec<u8>) -> ObjectStoreResult<()> {
        let path = self.path_for(public_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStoreError::io(public_id, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ObjectStoreError::io(public_id, e))?;
        debug!(public_id, path = %path.display(), "Stored object");
        Ok(())
    }

    async fn delete(&self, public_id: &str) -> ObjectStoreResult<RemoteDeletion> {
        let path = self.path_for(public_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(public_id, "Deleted object");
                Ok(RemoteDeletion::Deleted)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoteDeletion::NotFound),
            Err(e) => Err(ObjectStoreError::io(public_id, e)),
        }
    }

    async fn exists(&self, public_id: &str) -> ObjectStoreResult<bool> {
        let path = self.path_for(public_id)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ObjectStoreError::io(public_id, e))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
