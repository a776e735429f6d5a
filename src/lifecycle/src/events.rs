//! Post-commit invalidation events.
//!
//! Events are only published once the owning transaction has committed.
//! Enqueueing is retried with exponential backoff; when every attempt fails
//! the caller gets a [`PublishFault`] next to its otherwise successful
//! result.

use std::time::Duration;

use async_trait::async_trait;
use common::config::EventsConfig;
use common::model::{ProjectKey, SessionKey};
use common::queue::{Message, Queue, QueueError};
use serde::{Deserialize, Serialize};

/// What a committed mutation removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// The project and everything under it is gone.
    ProjectDeleted { project_key: ProjectKey },

    /// Traces were removed from a project that still exists.
    ProjectCleared {
        project_key: ProjectKey,
        /// Sessions that lost at least one trace.
        affected_session_keys: Vec<SessionKey>,
    },
}

impl InvalidationEvent {
    /// Queue subtype the event is published under.
    pub fn subtype(&self) -> &'static str {
        match self {
            InvalidationEvent::ProjectDeleted { .. } => "project_deleted",
            InvalidationEvent::ProjectCleared { .. } => "project_cleared",
        }
    }

    pub fn project_key(&self) -> ProjectKey {
        match self {
            InvalidationEvent::ProjectDeleted { project_key }
            | InvalidationEvent::ProjectCleared { project_key, .. } => *project_key,
        }
    }
}

/// Outbound event channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvalidationPublisher: Send + Sync + 'static {
    /// Enqueue one event. Success means the channel accepted it, not that
    /// any consumer processed it.
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), QueueError>;
}

/// Publishes events as invalidation messages on a [`Queue`].
#[derive(Debug)]
pub struct QueuePublisher<Q: Queue> {
    queue: Q,
}

impl<Q: Queue> QueuePublisher<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<Q: Queue> InvalidationPublisher for QueuePublisher<Q> {
    async fn publish(&self, event: &InvalidationEvent) -> Result<(), QueueError> {
        let message = Message::new_invalidation(event.subtype(), event.clone())
            .with_metadata("project_key", event.project_key().to_string());
        self.queue.publish(message).await
    }
}

/// An event that never reached the channel.
#[derive(Debug, thiserror::Error)]
pub enum PublishFault {
    #[error(
        "{} event for project {} was not enqueued after {attempts} attempts: {source}",
        .event.subtype(),
        .event.project_key()
    )]
    Exhausted {
        event: InvalidationEvent,
        attempts: u32,
        #[source]
        source: QueueError,
    },

    #[error(
        "{} event for project {} was abandoned: {reason}",
        .event.subtype(),
        .event.project_key()
    )]
    Aborted {
        event: InvalidationEvent,
        reason: String,
    },
}

impl PublishFault {
    /// The event consumers did not receive.
    pub fn event(&self) -> &InvalidationEvent {
        match self {
            PublishFault::Exhausted { event, .. } | PublishFault::Aborted { event, .. } => event,
        }
    }
}

/// How often and how patiently to enqueue an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EventsConfig::default())
    }
}

impl From<&EventsConfig> for RetryPolicy {
    fn from(config: &EventsConfig) -> Self {
        Self {
            attempts: config.publish_attempts,
            backoff: config.publish_backoff,
        }
    }
}

/// Enqueue `event`, retrying per `policy`.
///
/// At least one attempt is made even when `policy.attempts` is zero.
pub async fn publish_with_retry<P>(
    publisher: &P,
    event: InvalidationEvent,
    policy: RetryPolicy,
) -> Result<(), PublishFault>
where
    P: InvalidationPublisher + ?Sized,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match publisher.publish(&event).await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(
                        subtype = event.subtype(),
                        project = %event.project_key(),
                        attempt,
                        "Invalidation event enqueued after retry"
                    );
                }
                return Ok(());
            }
            Err(source) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    subtype = event.subtype(),
                    project = %event.project_key(),
                    attempt,
                    attempts,
                    ?delay,
                    error = %source,
                    "Failed to enqueue invalidation event, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(PublishFault::Exhausted {
                    event,
                    attempts,
                    source,
                });
            }
        }
    }
}
