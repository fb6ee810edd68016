//! SQS quarantine publisher.
//!
//! Sends the original body verbatim, so a quarantined message can be
//! replayed onto the fulfillment queue unchanged once fixed. Failure details
//! travel as message attributes.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client as SqsClient;
use tracing::info;

use super::{DeadLetterPublisher, DlqError, QuarantinedMessage};

const ERROR_ATTR: &str = "x-gamelib-error";
const ERROR_KIND_ATTR: &str = "x-gamelib-error-kind";
const RECEIVE_COUNT_ATTR: &str = "x-gamelib-receive-count";
const ORIGINAL_ID_ATTR: &str = "x-gamelib-original-message-id";
const QUARANTINED_AT_ATTR: &str = "x-gamelib-quarantined-at";

/// Publishes quarantined messages to a separate SQS queue.
pub struct SqsDeadLetterPublisher {
    sqs: SqsClient,
    queue_url: String,
}

impl SqsDeadLetterPublisher {
    pub fn new(sqs: SqsClient, queue_url: impl Into<String>) -> Self {
        Self {
            sqs,
            queue_url: queue_url.into(),
        }
    }
}

fn string_attr(value: &str) -> Result<MessageAttributeValue, DlqError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| DlqError::PublishFailed(format!("Failed to build attribute: {}", e)))
}

fn attributes(message: &QuarantinedMessage) -> Result<HashMap<String, MessageAttributeValue>, DlqError> {
    let mut attrs = HashMap::new();
    // SQS rejects empty attribute values
    if !message.error.is_empty() {
        attrs.insert(ERROR_ATTR.to_string(), string_attr(&message.error)?);
    }
    attrs.insert(ERROR_KIND_ATTR.to_string(), string_attr(&message.error_kind)?);
    if !message.message_id.is_empty() {
        attrs.insert(ORIGINAL_ID_ATTR.to_string(), string_attr(&message.message_id)?);
    }
    attrs.insert(
        QUARANTINED_AT_ATTR.to_string(),
        string_attr(&message.quarantined_at.to_rfc3339())?,
    );
    attrs.insert(
        RECEIVE_COUNT_ATTR.to_string(),
        MessageAttributeValue::builder()
            .data_type("Number")
            .string_value(message.receive_count.to_string())
            .build()
            .map_err(|e| DlqError::PublishFailed(format!("Failed to build attribute: {}", e)))?,
    );
    Ok(attrs)
}

#[async_trait]
impl DeadLetterPublisher for SqsDeadLetterPublisher {
    async fn publish(&self, message: QuarantinedMessage) -> Result<(), DlqError> {
        let attrs = attributes(&message)?;

        self.sqs
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(&message.body)
            .set_message_attributes(Some(attrs))
            .send()
            .await
            .map_err(|e| DlqError::PublishFailed(format!("Failed to send to DLQ: {}", e)))?;

        info!(
            message_id = %message.message_id,
            receive_count = message.receive_count,
            error_kind = %message.error_kind,
            queue = %self.queue_url,
            "Message sent to DLQ queue"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Delivery, ReceiptHandle};

    #[test]
    fn test_attributes_carry_failure_details() {
        let delivery = Delivery {
            message_id: "m-9".to_string(),
            receipt_handle: ReceiptHandle::new("rh"),
            body: "{}".to_string(),
            approximate_receive_count: 6,
        };
        let message = QuarantinedMessage::from_delivery(&delivery, "Player not found: u1", "player_not_found");

        let attrs = attributes(&message).unwrap();

        assert_eq!(attrs[ERROR_KIND_ATTR].string_value(), Some("player_not_found"));
        assert_eq!(attrs[RECEIVE_COUNT_ATTR].string_value(), Some("6"));
        assert_eq!(attrs[RECEIVE_COUNT_ATTR].data_type(), "Number");
        assert_eq!(attrs[ORIGINAL_ID_ATTR].string_value(), Some("m-9"));
    }
}
