use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message type to identify different kinds of messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Post-commit notices that cached or indexed data is stale
    Invalidation,
    /// System commands
    Command,
}

/// Generic message envelope that can contain any serializable payload
#[derive(Debug, Clone)]
pub struct Message<T>
where
    T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
{
    /// Type of message for routing
    pub message_type: MessageType,

    /// Specific subtype (e.g., "project_deleted" for Invalidation type)
    pub subtype: String,

    /// The actual payload
    pub payload: T,

    /// Message metadata
    pub metadata: HashMap<String, String>,

    /// Timestamp when the message was created
    pub timestamp: std::time::SystemTime,
}

impl<T> Message<T>
where
    T: Serialize + for<'a> Deserialize<'a> + Send + Sync,
{
    /// Create a new invalidation message
    pub fn new_invalidation(subtype: impl Into<String>, payload: T) -> Self {
        Self::new(MessageType::Invalidation, subtype, payload)
    }

    /// Create a new command message
    pub fn new_command(subtype: impl Into<String>, payload: T) -> Self {
        Self::new(MessageType::Command, subtype, payload)
    }

    fn new(message_type: MessageType, subtype: impl Into<String>, payload: T) -> Self {
        Self {
            message_type,
            subtype: subtype.into(),
            payload,
            metadata: HashMap::new(),
            timestamp: std::time::SystemTime::now(),
        }
    }

    /// Add metadata to the message
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Serialize the message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        #[derive(Serialize)]
        struct MessageWrapper<'a, T> {
            message_type: &'a MessageType,
            subtype: &'a str,
            payload: &'a T,
            metadata: &'a HashMap<String, String>,
            timestamp: &'a std::time::SystemTime,
        }

        let wrapper = MessageWrapper {
            message_type: &self.message_type,
            subtype: &self.subtype,
            payload: &self.payload,
            metadata: &self.metadata,
            timestamp: &self.timestamp,
        };

        serde_json::to_vec(&wrapper).map_err(QueueError::SerializationError)
    }

    /// Deserialize the message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        #[derive(Deserialize)]
        struct MessageWrapper<T> {
            message_type: MessageType,
            subtype: String,
            payload: T,
            metadata: HashMap<String, String>,
            timestamp: std::time::SystemTime,
        }

        let wrapper: MessageWrapper<T> = serde_json::from_slice(bytes)?;

        Ok(Self {
            message_type: wrapper.message_type,
            subtype: wrapper.subtype,
            payload: wrapper.payload,
            metadata: wrapper.metadata,
            timestamp: wrapper.timestamp,
        })
    }
}

/// Configuration for a queue implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Type of queue; only "memory" ships with spanstore
    pub queue_type: String,
    /// Connection URL
    pub url: String,
    /// Buffered messages per channel
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: "memory".to_string(),
            url: "memory://local".to_string(),
            capacity: default_capacity(),
        }
    }
}

/// Error types that can occur during queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    ConnectionError(String),

    #[error("Failed to publish message: {0}")]
    PublishError(String),

    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("Failed to receive message: {0}")]
    ReceiveError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Trait that must be implemented by all queue implementations
#[async_trait]
pub trait Queue: std::fmt::Debug + Sync + Send + 'static {
    /// Connect to the queue system
    async fn connect(&mut self, config: QueueConfig) -> QueueResult<()>;

    /// Publish a message to the queue
    async fn publish<T>(&self, message: Message<T>) -> QueueResult<()>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync;

    /// Subscribe to messages of specific types
    async fn subscribe(
        &mut self,
        message_type: MessageType,
        subtype: Option<String>,
    ) -> QueueResult<()>;

    /// Receive the next message (if any)
    async fn receive<T>(&self) -> QueueResult<Option<Message<T>>>
    where
        T: Serialize + for<'a> Deserialize<'a> + Send + Sync;

    /// Close the queue connection
    async fn close(&mut self) -> QueueResult<()>;
}

pub mod memory;
pub use memory::InMemoryQueue;
