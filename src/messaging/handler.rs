//! Message handler contract and panic-safe dispatch.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use super::types::{Delivery, HandlerOutcome};

/// Invoked once per delivered message. Handlers for one subscription run
/// sequentially; the message is settled only after `handle` returns.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome;
}

/// Run a handler, converting a panic into [`HandlerOutcome::Reject`] so the
/// prefetch slot is always released.
pub async fn dispatch(handler: &dyn MessageHandler, delivery: &Delivery) -> HandlerOutcome {
    match AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                delivery_tag = delivery.delivery_tag,
                panic = %reason,
                "Message handler panicked; rejecting message"
            );
            HandlerOutcome::Reject
        }
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F, Fut> {
    handler: F,
    _future: PhantomData<fn() -> Fut>,
}

pub fn handler_fn<F, Fut>(handler: F) -> FnHandler<F, Fut>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    FnHandler {
        handler,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        (self.handler)(delivery.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> Delivery {
        Delivery {
            exchange: "post-service".to_string(),
            routing_key: "post.deleted".to_string(),
            queue: "q".to_string(),
            payload: b"{}".to_vec(),
            redelivered: false,
            delivery_tag: 1,
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        async fn handle(&self, _delivery: &Delivery) -> HandlerOutcome {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn outcome_passes_through() {
        let handler = handler_fn(|_| async { HandlerOutcome::Requeue });
        assert_eq!(dispatch(&handler, &delivery()).await, HandlerOutcome::Requeue);
    }

    #[tokio::test]
    async fn panic_becomes_reject() {
        assert_eq!(dispatch(&Panicking, &delivery()).await, HandlerOutcome::Reject);
    }
}
