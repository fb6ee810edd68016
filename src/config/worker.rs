//! Worker and quarantine configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::dlq::QuarantinePolicy;
use crate::worker::{BackoffPolicy, DEFAULT_BACKOFF};

/// Consumer loop configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause after a failed receive.
    pub backoff: BackoffConfig,
}

impl WorkerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        self.backoff.validate()
    }
}

/// Backoff kind discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Receive-failure backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub policy: BackoffKind,
    /// Fixed delay, or the minimum delay for exponential backoff.
    pub delay_ms: u64,
    /// Upper bound for exponential backoff. Ignored for fixed.
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            policy: BackoffKind::Fixed,
            delay_ms: DEFAULT_BACKOFF.as_millis() as u64,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        match self.policy {
            BackoffKind::Fixed => BackoffPolicy::Fixed {
                delay: Duration::from_millis(self.delay_ms),
            },
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                min: Duration::from_millis(self.delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.backoff.delay_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.policy == BackoffKind::Exponential && self.max_delay_ms < self.delay_ms {
            return Err(ConfigError::Invalid {
                field: "worker.backoff.max_delay_ms",
                reason: format!("must be at least delay_ms ({})", self.delay_ms),
            });
        }
        Ok(())
    }
}

/// Quarantine configuration. Disabled unless `max_receive_count` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// Quarantine a failing message once it has been received this many times.
    pub max_receive_count: Option<u32>,
    /// SQS queue receiving quarantined messages.
    pub queue_url: Option<String>,
}

impl DlqConfig {
    /// Quarantine policy, if enabled.
    pub fn policy(&self) -> Option<QuarantinePolicy> {
        self.max_receive_count.map(QuarantinePolicy::new)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        match self.max_receive_count {
            Some(0) => Err(ConfigError::Invalid {
                field: "dlq.max_receive_count",
                reason: "must be at least 1".to_string(),
            }),
            Some(_) if self.queue_url.as_deref().map_or(true, |url| url.trim().is_empty()) => {
                Err(ConfigError::Missing("dlq.queue_url"))
            }
            _ => Ok(()),
        }
    }
}
