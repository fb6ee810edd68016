//! AWS SQS queue transport.
//!
//! Long-polls a single queue URL. `ApproximateReceiveCount` is requested on
//! every receive so the worker can apply its quarantine policy.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info, warn};

use super::{Delivery, QueueTransport, ReceiptHandle, ReceiveOptions, Result, TransportError};
use crate::config::SqsQueueConfig;

/// Build an SQS client honoring region and endpoint overrides.
pub async fn build_client(region: Option<&str>, endpoint_url: Option<&str>) -> SqsClient {
    let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

    if let Some(region) = region {
        aws_config_builder = aws_config_builder.region(aws_config::Region::new(region.to_string()));
    }

    if let Some(endpoint) = endpoint_url {
        aws_config_builder = aws_config_builder.endpoint_url(endpoint);
    }

    let aws_config = aws_config_builder.load().await;
    SqsClient::new(&aws_config)
}

/// SQS implementation of QueueTransport.
pub struct SqsQueue {
    sqs: SqsClient,
    queue_url: String,
}

impl SqsQueue {
    /// Connect to the queue described by `config`.
    pub async fn connect(config: &SqsQueueConfig) -> Result<Self> {
        if config.queue_url.is_empty() {
            return Err(TransportError::Connection(
                "No SQS queue URL configured".to_string(),
            ));
        }

        let sqs = build_client(config.region.as_deref(), config.endpoint_url.as_deref()).await;

        info!(
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            queue_url = %config.queue_url,
            "Connected to AWS SQS"
        );

        Ok(Self::new(sqs, config.queue_url.clone()))
    }

    /// Wrap an existing client.
    pub fn new(sqs: SqsClient, queue_url: impl Into<String>) -> Self {
        Self {
            sqs,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

/// Convert an SQS message, skipping ones without body or receipt handle.
fn to_delivery(message: &Message) -> Option<Delivery> {
    let receipt_handle = message.receipt_handle()?;
    let body = message.body()?;

    let approximate_receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    Some(Delivery {
        message_id: message.message_id().unwrap_or_default().to_string(),
        receipt_handle: ReceiptHandle::new(receipt_handle),
        body: body.to_string(),
        approximate_receive_count,
    })
}

/// Clamp a duration to whole seconds for the SQS API.
fn secs(duration: std::time::Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl QueueTransport for SqsQueue {
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<Delivery>> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(options.max_messages as i32)
            .wait_time_seconds(secs(options.wait_time))
            .visibility_timeout(secs(options.visibility_timeout))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| TransportError::Receive(format!("Failed to receive from SQS: {}", e)))?;

        let messages = output.messages();
        let deliveries: Vec<Delivery> = messages.iter().filter_map(to_delivery).collect();

        if deliveries.len() < messages.len() {
            warn!(
                skipped = messages.len() - deliveries.len(),
                "SQS returned messages without body or receipt handle"
            );
        }

        debug!(count = deliveries.len(), "Received SQS batch");
        Ok(deliveries)
    }

    async fn delete(&self, receipt_handle: &ReceiptHandle) -> Result<()> {
        self.sqs
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle.as_str())
            .send()
            .await
            .map_err(|e| TransportError::Delete(format!("Failed to delete SQS message: {}", e)))?;

        Ok(())
    }
}
