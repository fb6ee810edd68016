//! Quarantine for messages that keep failing.
//!
//! Off by default: without a policy, a failing message is left on the queue
//! and redelivered until the broker's retention discards it.
//!
//! With a `QuarantinePolicy`, a delivery that fails after being received
//! `max_receive_count` times or more is published to a quarantine channel.
//! The original delivery is deleted only once that publish has succeeded,
//! so a message is never dropped silently.
//!
//! ## Message Format
//!
//! Publishers forward the original body verbatim. `QuarantinedMessage`
//! carries alongside it:
//! - The original message id and body, verbatim
//! - The receive count at quarantine time
//! - The last processing error and its kind
//! - When the message was quarantined

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::queue::Delivery;

#[cfg(feature = "sqs")]
pub mod sqs;

#[cfg(feature = "sqs")]
pub use sqs::SqsDeadLetterPublisher;

/// Errors that can occur during quarantine operations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    #[error("DLQ not configured")]
    NotConfigured,

    #[error("Failed to publish to DLQ: {0}")]
    PublishFailed(String),
}

/// A message moved off the fulfillment queue after repeated failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedMessage {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub error: String,
    /// Short error classification, e.g. "decode", "player_not_found".
    pub error_kind: String,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedMessage {
    pub fn from_delivery(delivery: &Delivery, error: impl Into<String>, error_kind: &str) -> Self {
        Self {
            message_id: delivery.message_id.clone(),
            body: delivery.body.clone(),
            receive_count: delivery.approximate_receive_count,
            error: error.into(),
            error_kind: error_kind.to_string(),
            quarantined_at: Utc::now(),
        }
    }
}

/// When a failing delivery is quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuarantinePolicy {
    pub max_receive_count: u32,
}

impl QuarantinePolicy {
    pub fn new(max_receive_count: u32) -> Self {
        Self { max_receive_count }
    }

    /// Whether a failed delivery has exhausted its redeliveries.
    pub fn should_quarantine(&self, delivery: &Delivery) -> bool {
        delivery.approximate_receive_count >= self.max_receive_count
    }
}

/// Trait for publishing messages to a quarantine channel.
///
/// Implementations handle the actual transport (SQS, in-memory, etc.).
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish a quarantined message.
    ///
    /// Returns Ok(()) only once the message is durably accepted.
    async fn publish(&self, message: QuarantinedMessage) -> Result<(), DlqError>;

    /// Check if the publisher is configured and ready.
    fn is_configured(&self) -> bool {
        true
    }
}

/// No-op publisher that logs but doesn't send anywhere.
///
/// Reports itself as not configured, so the worker never deletes a
/// delivery on its behalf.
pub struct NoopDeadLetterPublisher;

#[async_trait]
impl DeadLetterPublisher for NoopDeadLetterPublisher {
    async fn publish(&self, message: QuarantinedMessage) -> Result<(), DlqError> {
        warn!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            error = %message.error,
            "DLQ not configured, message stays on the queue"
        );
        Err(DlqError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// In-memory publisher using a channel.
///
/// Used for standalone mode and testing.
pub struct ChannelDeadLetterPublisher {
    sender: mpsc::UnboundedSender<QuarantinedMessage>,
}

impl ChannelDeadLetterPublisher {
    /// Create a new channel-based publisher.
    ///
    /// Returns the publisher and a receiver for consuming quarantined messages.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<QuarantinedMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterPublisher for ChannelDeadLetterPublisher {
    async fn publish(&self, message: QuarantinedMessage) -> Result<(), DlqError> {
        info!(
            message_id = %message.message_id,
            error_kind = %message.error_kind,
            "Publishing to channel DLQ"
        );
        self.sender
            .send(message)
            .map_err(|e| DlqError::PublishFailed(e.to_string()))
    }
}

/// Policy plus publisher, as handed to the worker.
#[derive(Clone)]
pub struct Quarantine {
    pub policy: QuarantinePolicy,
    pub publisher: Arc<dyn DeadLetterPublisher>,
}

impl Quarantine {
    pub fn new(policy: QuarantinePolicy, publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self { policy, publisher }
    }

    /// Whether this failed delivery should be moved to quarantine.
    pub fn applies_to(&self, delivery: &Delivery) -> bool {
        if !self.publisher.is_configured() {
            debug!(
                message_id = %delivery.message_id,
                "Quarantine publisher not configured, skipping"
            );
            return false;
        }
        self.policy.should_quarantine(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ReceiptHandle;

    fn delivery(receive_count: u32) -> Delivery {
        Delivery {
            message_id: "m-1".to_string(),
            receipt_handle: ReceiptHandle::new("rh-1"),
            body: "not json".to_string(),
            approximate_receive_count: receive_count,
        }
    }

    // ============================================================================
    // Policy Tests
    // ============================================================================

    #[test]
    fn test_policy_threshold_inclusive() {
        let policy = QuarantinePolicy::new(3);
        assert!(!policy.should_quarantine(&delivery(2)));
        assert!(policy.should_quarantine(&delivery(3)));
        assert!(policy.should_quarantine(&delivery(7)));
    }

    #[test]
    fn test_quarantine_requires_configured_publisher() {
        let noop = Quarantine::new(QuarantinePolicy::new(1), Arc::new(NoopDeadLetterPublisher));
        assert!(!noop.applies_to(&delivery(5)));

        let (publisher, _rx) = ChannelDeadLetterPublisher::new();
        let channel = Quarantine::new(QuarantinePolicy::new(1), Arc::new(publisher));
        assert!(channel.applies_to(&delivery(5)));
    }

    // ============================================================================
    // Message Tests
    // ============================================================================

    #[test]
    fn test_from_delivery() {
        let message = QuarantinedMessage::from_delivery(&delivery(4), "bad envelope", "decode");

        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.body, "not json");
        assert_eq!(message.receive_count, 4);
        assert_eq!(message.error, "bad envelope");
        assert_eq!(message.error_kind, "decode");
    }

    // ============================================================================
    // Publisher Tests
    // ============================================================================

    #[tokio::test]
    async fn test_noop_publisher_refuses() {
        let publisher = NoopDeadLetterPublisher;
        let message = QuarantinedMessage::from_delivery(&delivery(4), "e", "decode");

        let result = publisher.publish(message).await;
        assert!(matches!(result, Err(DlqError::NotConfigured)));
        assert!(!publisher.is_configured());
    }

    #[tokio::test]
    async fn test_channel_publisher_sends() {
        let (publisher, mut receiver) = ChannelDeadLetterPublisher::new();
        let message = QuarantinedMessage::from_delivery(&delivery(4), "e", "decode");

        publisher.publish(message.clone()).await.unwrap();

        let received = receiver.recv().await.expect("Should receive quarantined message");
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_channel_publisher_closed_receiver() {
        let (publisher, receiver) = ChannelDeadLetterPublisher::new();
        drop(receiver);

        let result = publisher
            .publish(QuarantinedMessage::from_delivery(&delivery(1), "e", "decode"))
            .await;
        assert!(matches!(result, Err(DlqError::PublishFailed(_))));
    }

    #[test]
    fn test_dlq_error_display() {
        assert!(DlqError::NotConfigured.to_string().contains("not configured"));
        let err = DlqError::PublishFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_every_error_comes_from_a_publisher() {
        // Each variant is produced by a publisher in this module.
        let noop = NoopDeadLetterPublisher
            .publish(QuarantinedMessage::from_delivery(&delivery(1), "e", "decode"))
            .await;
        let (closed, receiver) = ChannelDeadLetterPublisher::new();
        drop(receiver);
        let channel = closed
            .publish(QuarantinedMessage::from_delivery(&delivery(1), "e", "decode"))
            .await;

        for result in [noop, channel] {
            match result {
                Err(DlqError::NotConfigured) | Err(DlqError::PublishFailed(_)) => {}
                Ok(()) => panic!("publish should have failed"),
            }
        }
    }
}
