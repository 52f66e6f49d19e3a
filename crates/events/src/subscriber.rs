//! Subscriber port invoked by the outbox dispatcher.

use async_trait::async_trait;
use thiserror::Error;

use crate::EventEnvelope;

/// Failure reported by a subscriber. The dispatcher leaves the row undelivered
/// and retries it on the next poll.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("subscriber {subscriber} failed: {message}")]
pub struct SubscriberError {
    pub subscriber: String,
    pub message: String,
}

impl SubscriberError {
    pub fn new(subscriber: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            message: message.into(),
        }
    }
}

/// In-process or external consumer of delivered events.
///
/// Delivery is at-least-once: the same envelope (same `outbox_id`) can arrive
/// again after a crash between publish and mark-sent, so `handle` must be
/// idempotent or tolerate duplicates.
#[async_trait]
pub trait EventSubscriber<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    /// Stable name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, envelope: &EventEnvelope<E>) -> Result<(), SubscriberError>;
}
