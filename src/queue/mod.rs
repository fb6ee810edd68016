//! Durable queue transport.
//!
//! This module contains:
//! - `QueueTransport` trait: long-poll receive and receipt-handle delete
//! - `Delivery`: one delivery of a queued message
//! - Implementations: SQS (`sqs` feature), in-memory broker simulation
//!
//! Delivery is at-least-once. A received message stays hidden for its
//! visibility window; if it is not deleted before the window ends it becomes
//! available again and its receive count increments.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
#[cfg(feature = "sqs")]
pub mod sqs;

pub use memory::InMemoryQueue;
#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to the queue.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Delete failed: {0}")]
    Delete(String),
}

/// Capability to acknowledge one specific delivery.
///
/// Tied to a single visibility window, not to the message identity: a
/// redelivered message carries a new handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a queued message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    /// How many times this message has been received, this delivery included.
    pub approximate_receive_count: u32,
}

/// Parameters of a long-poll receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on messages returned by one receive.
    pub max_messages: u32,
    /// How long to wait for messages to become available.
    pub wait_time: Duration,
    /// How long received messages stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// Interface to the queue the fulfillment worker consumes.
///
/// Implementations:
/// - `SqsQueue`: AWS SQS
/// - `InMemoryQueue`: in-process broker for standalone mode and tests
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Long-poll for up to `options.max_messages` deliveries.
    ///
    /// Returns an empty batch if nothing became available within the wait time.
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Delivery>>;

    /// Acknowledge a delivery, removing the message permanently.
    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<()>;
}
