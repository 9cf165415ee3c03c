//! `post.deleted` consumer.
//!
//! | Situation                                   | Outcome   |
//! |---------------------------------------------|-----------|
//! | body does not decode                        | `Reject`  |
//! | batch attempted (even with failed items)    | `Ack`     |
//! | record lookup failed, first delivery        | `Requeue` |
//! | record lookup failed, already redelivered   | `Reject`  |

use async_trait::async_trait;
use tracing::{error, warn};

use super::cleanup::MediaCleanup;
use crate::events::PostEvent;
use crate::logging::log_event_operation;
use crate::messaging::{Delivery, HandlerOutcome, MessageHandler};

#[derive(Debug, Clone)]
pub struct PostDeletedHandler {
    cleanup: MediaCleanup,
}

impl PostDeletedHandler {
    pub fn new(cleanup: MediaCleanup) -> Self {
        Self { cleanup }
    }
}

#[async_trait]
impl MessageHandler for PostDeletedHandler {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        let event = match PostEvent::from_delivery(delivery) {
            Ok(PostEvent::Deleted(event)) => event,
            Err(e) => {
                warn!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Rejecting undecodable post event"
                );
                log_event_operation(
                    "consume",
                    &delivery.routing_key,
                    None,
                    "REJECTED",
                    Some(&e.to_string()),
                );
                return HandlerOutcome::Reject;
            }
        };
        let post_id = event.post_id.to_string();

        match self.cleanup.reclaim(&event.post_id, &event.media_ids).await {
            Ok(report) => {
                let details = format!(
                    "deleted={} already_absent={} failed={}",
                    report.deleted.len(),
                    report.already_absent.len(),
                    report.failed.len()
                );
                let status = if report.is_complete() { "SUCCESS" } else { "PARTIAL" };
                log_event_operation(
                    "consume",
                    &delivery.routing_key,
                    Some(&post_id),
                    status,
                    Some(&details),
                );
                HandlerOutcome::Ack
            }
            Err(e) if !delivery.redelivered => {
                warn!(post_id = %post_id, error = %e, "Media lookup failed; requeueing once");
                log_event_operation(
                    "consume",
                    &delivery.routing_key,
                    Some(&post_id),
                    "REQUEUED",
                    Some(&e.to_string()),
                );
                HandlerOutcome::Requeue
            }
            Err(e) => {
                error!(
                    post_id = %post_id,
                    media_ids = ?event.media_ids,
                    error = %e,
                    "Media lookup failed on redelivery; dropping event, media left orphaned"
                );
                log_event_operation(
                    "consume",
                    &delivery.routing_key,
                    Some(&post_id),
                    "REJECTED",
                    Some(&e.to_string()),
                );
                HandlerOutcome::Reject
            }
        }
    }
}
