//! # Domain Events
//!
//! Events the post service publishes on its topic exchange. Routing keys
//! follow `<entity>.<action>`; bodies are camelCase JSON.
//!
//! Decoding is forward compatible: unknown body fields are ignored, but every
//! field a consumer relies on is required.

use serde::{Deserialize, Serialize};

use crate::ids::{MediaId, PostId, UserId};
use crate::messaging::{Delivery, MessagingError, MessagingResult, QueueMessage};

pub const POST_DELETED_ROUTING_KEY: &str = "post.deleted";

/// A post was deleted; its media are now orphaned and must be reclaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeletedEvent {
    pub post_id: PostId,
    pub user_id: UserId,
    /// Captured from the post before it was deleted.
    pub media_ids: Vec<MediaId>,
}

/// Every event the post service emits, tagged by routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostEvent {
    Deleted(PostDeletedEvent),
}

impl PostEvent {
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Deleted(_) => POST_DELETED_ROUTING_KEY,
        }
    }

    pub fn post_id(&self) -> &PostId {
        match self {
            Self::Deleted(e) => &e.post_id,
        }
    }

    /// Decode a body received under `routing_key`.
    pub fn decode(routing_key: &str, payload: &[u8]) -> MessagingResult<Self> {
        match routing_key {
            POST_DELETED_ROUTING_KEY => PostDeletedEvent::from_bytes(payload).map(Self::Deleted),
            other => Err(MessagingError::message_deserialization(format!(
                "no post event is published under routing key '{other}'"
            ))),
        }
    }

    pub fn from_delivery(delivery: &Delivery) -> MessagingResult<Self> {
        Self::decode(&delivery.routing_key, &delivery.payload)
    }

    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        match self {
            Self::Deleted(e) => e.to_bytes(),
        }
    }
}

impl From<PostDeletedEvent> for PostEvent {
    fn from(event: PostDeletedEvent) -> Self {
        Self::Deleted(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> PostDeletedEvent {
        PostDeletedEvent {
            post_id: PostId::new(),
            user_id: UserId::new(),
            media_ids: vec![MediaId::new(), MediaId::new()],
        }
    }

    #[test]
    fn body_uses_camel_case_names() {
        let event = sample();
        let value: serde_json::Value =
            serde_json::from_slice(&PostEvent::from(event.clone()).to_bytes().unwrap()).unwrap();
        assert_eq!(value["postId"], json!(event.post_id.to_string()));
        assert_eq!(value["userId"], json!(event.user_id.to_string()));
        assert_eq!(value["mediaIds"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let event = sample();
        let body = json!({
            "postId": event.post_id,
            "userId": event.user_id,
            "mediaIds": event.media_ids,
            "reason": "moderation",
        });
        let decoded =
            PostEvent::decode(POST_DELETED_ROUTING_KEY, body.to_string().as_bytes()).unwrap();
        assert_eq!(decoded, PostEvent::Deleted(event));
    }

    #[test]
    fn missing_fields_fail_to_decode() {
        let body = json!({ "postId": PostId::new(), "userId": UserId::new() });
        let err = PostEvent::decode(POST_DELETED_ROUTING_KEY, body.to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, MessagingError::MessageDeserialization { .. }));
    }

    #[test]
    fn decodes_ids_as_opaque_strings() {
        let body = br#"{"postId":"P","userId":"u1","mediaIds":["m1","m2"]}"#;
        let PostEvent::Deleted(event) = PostEvent::decode(POST_DELETED_ROUTING_KEY, body).unwrap();
        assert_eq!(event.post_id.as_str(), "P");
        assert_eq!(event.user_id.as_str(), "u1");
        assert_eq!(event.media_ids, vec![MediaId::from("m1"), MediaId::from("m2")]);

        // Document-store style ids
        let body = json!({
            "postId": "65f1c0ffee0123456789abcd",
            "userId": "65f1c0ffee0123456789abce",
            "mediaIds": ["65f1c0ffee0123456789abcf"],
        });
        let decoded =
            PostEvent::decode(POST_DELETED_ROUTING_KEY, body.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.post_id().as_str(), "65f1c0ffee0123456789abcd");
    }

    #[test]
    fn non_string_ids_fail_to_decode() {
        let body = json!({ "postId": 7, "userId": "u1", "mediaIds": ["m1"] });
        assert!(PostEvent::decode(POST_DELETED_ROUTING_KEY, body.to_string().as_bytes()).is_err());
    }

    #[test]
    fn unknown_routing_keys_are_rejected() {
        let body = serde_json::to_vec(&sample()).unwrap();
        assert!(PostEvent::decode("post.archived", &body).is_err());
    }

    #[test]
    fn empty_media_list_is_valid() {
        let body = json!({ "postId": PostId::new(), "userId": UserId::new(), "mediaIds": [] });
        let decoded =
            PostEvent::decode(POST_DELETED_ROUTING_KEY, body.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.routing_key(), POST_DELETED_ROUTING_KEY);
    }
}
