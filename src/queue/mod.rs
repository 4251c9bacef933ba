//! Abstract message-queue contract.
//!
//! The dispatch core only needs three capabilities from the upstream queue:
//! a batched long-poll receive, a delete by receipt handle, and the queue's
//! configured message retention period (reused as the throttle record TTL).

pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use sqs::SqsQueue;

pub const MAX_RECEIVE_MESSAGES: i32 = 10;
pub const RECEIVE_WAIT_TIME: Duration = Duration::from_secs(10);
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// One received message: envelope identifier, receipt handle for deletion,
/// raw body, and the time the message entered the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    pub max_messages: i32,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: MAX_RECEIVE_MESSAGES,
            wait_time: RECEIVE_WAIT_TIME,
            visibility_timeout: VISIBILITY_TIMEOUT,
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue i/o error: {0}")]
    Io(String),

    #[error("missing or malformed message attribute: {0}")]
    Attribute(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll the queue for up to `opts.max_messages` messages.
    async fn receive(&self, opts: &ReceiveOptions) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a message by its receipt handle.
    async fn delete(&self, receipt: &str) -> Result<(), QueueError>;

    /// The queue's configured message retention period.
    async fn retention_period(&self) -> Result<Duration, QueueError>;
}
