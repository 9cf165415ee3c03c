//! Media records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MediaId, UserId};
use crate::pagination::{Pagination, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: MediaId,
    /// Object store key of the uploaded bytes
    pub public_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub url: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Metadata of an upload that already reached the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedia {
    pub public_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub url: String,
}

impl NewMedia {
    pub fn into_media(self, owner: UserId) -> Media {
        Media {
            id: MediaId::new(),
            public_id: self.public_id,
            original_name: self.original_name,
            mime_type: self.mime_type,
            url: self.url,
            user_id: owner,
            created_at: Utc::now(),
        }
    }
}

/// Media listings are always newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaListQuery {
    pub page: u32,
    pub limit: u32,
}

impl Default for MediaListQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl MediaListQuery {
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_LIMIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPage {
    pub media: Vec<Media>,
    pub pagination: Pagination,
}
