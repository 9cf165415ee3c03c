//! Post records and listing parameters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MediaId, PostId, UserId};
use crate::pagination::{Pagination, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    #[serde(rename = "postTitle")]
    pub title: String,
    #[serde(rename = "postContent")]
    pub content: String,
    #[serde(rename = "mediaIds")]
    pub media_ids: Vec<MediaId>,
    /// Owner
    #[serde(rename = "user")]
    pub user_id: UserId,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Validated body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    #[serde(rename = "postTitle")]
    pub title: String,
    #[serde(rename = "postContent")]
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<MediaId>,
}

impl NewPost {
    pub fn into_post(self, owner: UserId) -> Post {
        let now = Utc::now();
        Post {
            id: PostId::new(),
            title: self.title,
            content: self.content,
            media_ids: self.media_ids,
            user_id: owner,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostSortField {
    #[default]
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "updatedAt")]
    UpdatedAt,
    #[serde(rename = "postTitle")]
    Title,
}

impl PostSortField {
    /// Name used in cache keys and query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Title => "postTitle",
        }
    }

    /// SQL column. Only these literals are ever interpolated into queries.
    pub fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Title => "post_title",
        }
    }
}

impl fmt::Display for PostSortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostSortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createdAt" => Ok(Self::CreatedAt),
            "updatedAt" => Ok(Self::UpdatedAt),
            "postTitle" => Ok(Self::Title),
            other => Err(format!("unsupported sort field '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    /// Anything other than `asc` sorts descending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PostListQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_by: PostSortField,
    pub sort_order: SortOrder,
}

impl Default for PostListQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort_by: PostSortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl PostListQuery {
    /// Clamp page to at least 1 and limit to `1..=MAX_LIMIT`, so equivalent
    /// requests share one cache key.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_LIMIT),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
    pub user_id: Option<UserId>,
}

impl PostFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owned_by(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn matches(&self, post: &Post) -> bool {
        self.user_id.as_ref().map_or(true, |user| &post.user_id == user)
    }
}

/// One page of a post listing; this is also the cached list value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_serializes_with_wire_names() {
        let post = NewPost {
            title: "t".to_string(),
            content: "c".to_string(),
            media_ids: vec![MediaId::new()],
        }
        .into_post(UserId::new());
        let json = serde_json::to_value(&post).unwrap();
        for field in ["id", "postTitle", "postContent", "mediaIds", "user", "createdAt", "updatedAt"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        let back: Post = serde_json::from_value(json).unwrap();
        assert_eq!(back, post);
    }

    #[test]
    fn query_defaults_match_listing_defaults() {
        let query: PostListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query, PostListQuery::default());
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 10);
        assert_eq!(query.sort_by.to_string(), "createdAt");
        assert_eq!(query.sort_order.to_string(), "desc");
    }

    #[test]
    fn normalization_clamps_bounds() {
        let query = PostListQuery {
            page: 0,
            limit: 5000,
            ..PostListQuery::default()
        }
        .normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_LIMIT);
    }

    #[test]
    fn sort_fields_parse_only_whitelisted_names() {
        assert_eq!("postTitle".parse::<PostSortField>().unwrap(), PostSortField::Title);
        assert!("password".parse::<PostSortField>().is_err());
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("sideways".parse::<SortOrder>().unwrap(), SortOrder::Desc);
    }
}
