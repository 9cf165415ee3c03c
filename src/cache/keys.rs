//! Cache key scheme.
//!
//! - detail: `{resource}:{id}`, e.g. `post:3f2a…`
//! - list: `{resource}s:{page}:{limit}:{sortBy}:{sortOrder}`, e.g.
//!   `posts:1:10:createdAt:desc`
//!
//! Every list key of a resource shares the prefix returned by
//! [`list_prefix`], which is what prefix invalidation deletes. Detail keys
//! never carry that prefix.

use std::fmt::Display;

pub fn detail_key(resource: &str, id: impl Display) -> String {
    format!("{resource}:{id}")
}

pub fn list_key(
    resource: &str,
    page: u32,
    limit: u32,
    sort_by: impl Display,
    sort_order: impl Display,
) -> String {
    format!("{resource}s:{page}:{limit}:{sort_by}:{sort_order}")
}

pub fn list_prefix(resource: &str) -> String {
    format!("{resource}s:")
}
