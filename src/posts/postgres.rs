//! PostgreSQL post store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::model::{Post, PostFilter, PostListQuery};
use super::store::PostStore;
use crate::database::StoreResult;
use crate::ids::{MediaId, PostId, UserId};
use crate::pagination::offset;

const COLUMNS: &str = "id, post_title, post_content, media_ids, user_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PostRow {
    id: String,
    post_title: String,
    post_content: String,
    media_ids: Vec<String>,
    user_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: PostId::from(row.id),
            title: row.post_title,
            content: row.post_content,
            media_ids: row.media_ids.into_iter().map(MediaId::from).collect(),
            user_id: UserId::from(row.user_id),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `ORDER BY` clause built only from whitelisted column and direction
/// literals; `id` breaks ties so pages are stable.
fn order_clause(query: &PostListQuery) -> String {
    format!(
        "ORDER BY {} {}, id {}",
        query.sort_by.column(),
        query.sort_order.sql(),
        query.sort_order.sql()
    )
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn insert(&self, post: Post) -> StoreResult<Post> {
        let media_ids: Vec<&str> = post.media_ids.iter().map(MediaId::as_str).collect();
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "INSERT INTO posts ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COLUMNS}"
        ))
        .bind(post.id.as_str())
        .bind(&post.title)
        .bind(&post.content)
        .bind(&media_ids)
        .bind(post.user_id.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_by_id(&self, id: &PostId) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    async fn delete_by_id(&self, id: &PostId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(
        &self,
        filter: PostFilter,
        query: PostListQuery,
    ) -> StoreResult<(Vec<Post>, u64)> {
        let query = query.normalized();
        let owner = filter.user_id.as_ref().map(UserId::as_str);

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {COLUMNS} FROM posts WHERE ($1::text IS NULL OR user_id = $1) {} LIMIT $2 OFFSET $3",
            order_clause(&query)
        ))
        .bind(owner)
        .bind(i64::from(query.limit))
        .bind(i64::try_from(offset(query.page, query.limit)).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM posts WHERE ($1::text IS NULL OR user_id = $1)",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            rows.into_iter().map(Post::from).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::model::{PostSortField, SortOrder};

    #[test]
    fn order_clause_uses_whitelisted_columns() {
        let query = PostListQuery {
            sort_by: PostSortField::Title,
            sort_order: SortOrder::Asc,
            ..PostListQuery::default()
        };
        assert_eq!(order_clause(&query), "ORDER BY post_title ASC, id ASC");
        assert_eq!(
            order_clause(&PostListQuery::default()),
            "ORDER BY created_at DESC, id DESC"
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL running"]
    async fn round_trips_through_postgres() {
        use crate::config::DatabaseConfig;
        use crate::database::DatabaseConnection;
        use crate::posts::model::NewPost;

        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/coherence_test".to_string()),
            ..DatabaseConfig::default()
        };
        let db = DatabaseConnection::connect(&config).await.unwrap();
        let store = PgPostStore::new(db.pool().clone());

        let owner = UserId::new();
        let post = NewPost {
            title: "hello".to_string(),
            content: "world".to_string(),
            media_ids: vec![MediaId::new()],
        }
        .into_post(owner.clone());
        let stored = store.insert(post.clone()).await.unwrap();
        assert_eq!(stored.media_ids, post.media_ids);

        let (page, total) = store
            .find(PostFilter::owned_by(owner), PostListQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, post.id);

        assert!(store.delete_by_id(&post.id).await.unwrap());
        assert!(!store.delete_by_id(&post.id).await.unwrap());
    }
}
