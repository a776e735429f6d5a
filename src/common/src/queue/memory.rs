use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use super::{Message, MessageType, Queue, QueueConfig, QueueError, QueueResult};

/// In-memory queue implementation using tokio's broadcast channel.
///
/// Serves the invalidation channel in single-process deployments. Every
/// clone shares the same channel, so a publisher and a consumer can hold
/// separate handles.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    /// Sender for the broadcast channel
    sender: Option<broadcast::Sender<Vec<u8>>>,
    /// Receiver for the broadcast channel
    receiver: Arc<Mutex<Option<broadcast::Receiver<Vec<u8>>>>>,
    /// Subscribed message types
    subscriptions: Arc<Mutex<HashMap<MessageType, HashSet<String>>>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self {
            sender: None,
            receiver: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl InMemoryQueue {
    /// Build a queue and connect it in one step.
    pub async fn connected(config: QueueConfig) -> QueueResult<Self> {
        if config.queue_type != "memory" {
            return Err(QueueError::ConnectionError(format!(
                "unsupported queue type '{}'",
                config.queue_type
            )));
        }
        let mut queue = Self::default();
        queue.connect(config).await?;
        Ok(queue)
    }
}

#[async_trait::async_trait]
impl Queue for InMemoryQueue {
    async fn connect(&mut self, config: QueueConfig) -> QueueResult<()> {
        if config.capacity == 0 {
            return Err(QueueError::ConnectionError(
                "queue capacity must be positive".to_string(),
            ));
        }
        let (tx, rx) = broadcast::channel(config.capacity);
        self.sender = Some(tx);
        *self.receiver.lock().await = Some(rx);
        Ok(())
    }

    async fn publish<T>(&self, message: Message<T>) -> QueueResult<()>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| QueueError::ConnectionError("Queue not connected".to_string()))?;

        let bytes = message.to_bytes()?;

        sender
            .send(bytes)
            .map_err(|e| QueueError::PublishError(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &mut self,
        message_type: MessageType,
        subtype: Option<String>,
    ) -> QueueResult<()> {
        let mut subs = self.subscriptions.lock().await;
        let subtypes = subs.entry(message_type).or_default();

        if let Some(subtype) = subtype {
            subtypes.insert(subtype);
        }

        Ok(())
    }

    async fn receive<T>(&self) -> QueueResult<Option<Message<T>>>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
    {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver
            .as_mut()
            .ok_or_else(|| QueueError::ConnectionError("Queue not connected".to_string()))?;

        let subscriptions = self.subscriptions.lock().await;

        match receiver.recv().await {
            Ok(bytes) => {
                let message = Message::from_bytes(&bytes)?;

                if let Some(subtypes) = subscriptions.get(&message.message_type) {
                    if subtypes.is_empty() || subtypes.contains(&message.subtype) {
                        return Ok(Some(message));
                    }
                }
                Ok(None)
            }
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(QueueError::ReceiveError(
                format!("consumer lagged behind by {skipped} messages"),
            )),
        }
    }

    async fn close(&mut self) -> QueueResult<()> {
        self.sender = None;
        *self.receiver.lock().await = None;
        Ok(())
    }
}
