//! PostgreSQL media store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::model::{Media, MediaListQuery};
use super::store::MediaStore;
use crate::database::StoreResult;
use crate::ids::{MediaId, UserId};
use crate::pagination::offset;

const COLUMNS: &str = "id, public_id, original_name, mime_type, url, user_id, created_at";

#[derive(Debug, FromRow)]
struct MediaRow {
    id: String,
    public_id: String,
    original_name: String,
    mime_type: String,
    url: String,
    user_id: String,
    created_at: DateTime<Utc>,
}

impl From<MediaRow> for Media {
    fn from(row: MediaRow) -> Self {
        Media {
            id: MediaId::from(row.id),
            public_id: row.public_id,
            original_name: row.original_name,
            mime_type: row.mime_type,
            url: row.url,
            user_id: UserId::from(row.user_id),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgMediaStore {
    pool: PgPool,
}

impl PgMediaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn insert(&self, media: Media) -> StoreResult<Media> {
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "INSERT INTO media ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
        ))
        .bind(media.id.as_str())
        .bind(&media.public_id)
        .bind(&media.original_name)
        .bind(&media.mime_type)
        .bind(&media.url)
        .bind(media.user_id.as_str())
        .bind(media.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_by_ids(&self, ids: &[MediaId]) -> StoreResult<Vec<Media>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<&str> = ids.iter().map(MediaId::as_str).collect();
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {COLUMNS} FROM media WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Media::from).collect())
    }

    async fn delete_by_id(&self, id: &MediaId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM media WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: MediaListQuery) -> StoreResult<(Vec<Media>, u64)> {
        let query = query.normalized();
        let rows = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {COLUMNS} FROM media ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(query.limit))
        .bind(i64::try_from(offset(query.page, query.limit)).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media")
            .fetch_one(&self.pool)
            .await?;

        Ok((
            rows.into_iter().map(Media::from).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }
}
