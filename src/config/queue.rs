//! Queue configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::{ConfigError, MAX_BATCH_SIZE, MAX_VISIBILITY_TIMEOUT_SECS, MAX_WAIT_TIME_SECS};
use crate::queue::ReceiveOptions;

/// Queue type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    #[default]
    Sqs,
    Memory,
}

/// Queue configuration (discriminated union plus receive settings).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue type discriminator.
    #[serde(rename = "type")]
    pub queue_type: QueueType,
    /// SQS-specific configuration.
    pub sqs: SqsQueueConfig,
    /// Maximum messages per receive (1-10).
    pub max_messages: u32,
    /// Long-poll wait in seconds (0-20).
    pub wait_time_secs: u64,
    /// Visibility timeout for received messages in seconds.
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let receive = ReceiveOptions::default();
        Self {
            queue_type: QueueType::default(),
            sqs: SqsQueueConfig::default(),
            max_messages: receive.max_messages,
            wait_time_secs: receive.wait_time.as_secs(),
            visibility_timeout_secs: receive.visibility_timeout.as_secs(),
        }
    }
}

impl QueueConfig {
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.max_messages,
            wait_time: Duration::from_secs(self.wait_time_secs),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
        }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_messages) {
            return Err(ConfigError::Invalid {
                field: "queue.max_messages",
                reason: format!("must be between 1 and {}, got {}", MAX_BATCH_SIZE, self.max_messages),
            });
        }
        if self.wait_time_secs > MAX_WAIT_TIME_SECS {
            return Err(ConfigError::Invalid {
                field: "queue.wait_time_secs",
                reason: format!("must be at most {}, got {}", MAX_WAIT_TIME_SECS, self.wait_time_secs),
            });
        }
        if self.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                field: "queue.visibility_timeout_secs",
                reason: format!(
                    "must be at most {}, got {}",
                    MAX_VISIBILITY_TIMEOUT_SECS, self.visibility_timeout_secs
                ),
            });
        }
        if self.queue_type == QueueType::Sqs && self.sqs.queue_url.trim().is_empty() {
            return Err(ConfigError::Missing("queue.sqs.queue_url"));
        }
        Ok(())
    }
}

/// SQS-specific configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SqsQueueConfig {
    /// URL of the fulfillment queue.
    pub queue_url: String,
    /// AWS region (falls back to the default provider chain).
    pub region: Option<String>,
    /// Custom endpoint, e.g. LocalStack.
    pub endpoint_url: Option<String>,
}
