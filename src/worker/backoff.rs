//! Pause between receive attempts after a transport failure.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

/// Default fixed pause after a failed receive.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// How long to wait after a failed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay every time.
    Fixed { delay: Duration },
    /// Doubling delay between `min` and `max`, with jitter.
    Exponential { min: Duration, max: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed {
            delay: DEFAULT_BACKOFF,
        }
    }
}

impl BackoffPolicy {
    fn exponential_builder(min: Duration, max: Duration) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(min)
            .with_max_delay(max)
            .with_max_times(usize::MAX)
            .with_jitter()
    }
}

/// Stateful delay source driven by a `BackoffPolicy`.
///
/// `reset` after a successful receive so the next outage starts from the
/// minimum delay again.
pub struct FailureBackoff {
    policy: BackoffPolicy,
    delays: Option<ExponentialBackoff>,
    consecutive_failures: u32,
}

impl FailureBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            delays: None,
            consecutive_failures: 0,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Failures since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay to apply for the failure that just happened.
    pub fn next_delay(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.policy {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Exponential { min, max } => self
                .delays
                .get_or_insert_with(|| BackoffPolicy::exponential_builder(min, max).build())
                .next()
                .unwrap_or(max),
        }
    }

    pub fn reset(&mut self) {
        self.delays = None;
        self.consecutive_failures = 0;
    }
}
