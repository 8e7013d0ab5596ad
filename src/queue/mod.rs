//! Pub/sub contract used by the file engine and its workers.
//!
//! Exchanges fan a published body out to every bound queue. A queue has at
//! most one subscriber, which receives each delivery as a [`Message`] token
//! that must be settled exactly once.

pub mod memory;
pub mod worker;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use memory::MemoryQueue;
pub use worker::WorkerHost;

pub const EXCHANGE_FILE_REPLICATION: &str = "file_replication";
pub const EXCHANGE_FILE_DELETION: &str = "file_deletion";
pub const QUEUE_PROCEED_FILE_REPLICATION: &str = "proceed_file_replication";
pub const QUEUE_PROCEED_FILE_DELETION: &str = "proceed_file_deletion";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection is not open")]
    NotOpen,
    #[error("exchange `{0}` is not declared")]
    ExchangeNotFound(String),
    #[error("queue `{0}` is not declared")]
    QueueNotFound(String),
    #[error("queue `{0}` already has a subscriber")]
    AlreadySubscribed(String),
    #[error("message is already settled")]
    AlreadySettled,
    #[error("listener was cancelled")]
    Cancelled,
    #[error("invalid message body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("handler failed: {0}")]
    Handler(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Every bound queue receives a copy.
    Fanout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclareExchangeParam {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclareQueueParam {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclareQueueResult {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindQueueParam {
    pub exchange: String,
    pub queue: String,
}

pub struct SubscribeParam {
    pub queue: String,
    pub listener: Arc<dyn Listener>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishParam {
    pub exchange: String,
    pub body: Vec<u8>,
}

/// A delivered message. Exactly one of `ack`, `nack` or `reject` settles it;
/// a second settlement fails with [`QueueError::AlreadySettled`].
#[async_trait]
pub trait Message: Send + Sync {
    fn body(&self) -> &[u8];

    /// Done; remove the message.
    async fn ack(&self) -> QueueResult<()>;

    /// Failed; redeliver later.
    async fn nack(&self) -> QueueResult<()>;

    /// Poison; discard without redelivery. This is the broker's drop
    /// operation. Dropping the `Message` value unsettled is not: the delivery
    /// goes back to its queue instead.
    async fn reject(&self) -> QueueResult<()>;
}

#[async_trait]
pub trait Listener: Send + Sync {
    async fn handle(&self, message: Box<dyn Message>) -> QueueResult<()>;
}

#[async_trait]
pub trait Queuer: Send + Sync {
    async fn open(&self) -> QueueResult<()>;

    async fn declare_exchange(&self, param: DeclareExchangeParam) -> QueueResult<()>;

    async fn declare_queue(&self, param: DeclareQueueParam) -> QueueResult<DeclareQueueResult>;

    async fn bind_queue(&self, param: BindQueueParam) -> QueueResult<()>;

    async fn subscribe(&self, param: SubscribeParam) -> QueueResult<()>;

    async fn publish(&self, param: PublishParam) -> QueueResult<()>;
}
