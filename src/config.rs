//! Engine configuration.
//!
//! Built through a validating builder, in line with the rest of the crate:
//! malformed configuration is a fast-fail [`ConfigError`], never something
//! the engine limps along with.

use crate::error::ConfigError;
use crate::overflow::{DropCancelled, OverflowPolicyFactory};
use crate::queue::{FifoQueue, TaskQueue};
use std::sync::Arc;
use std::time::Duration;

/// Factory for the dispatch queue's FIFO storage.
pub type QueueFactory = Arc<dyn Fn() -> Box<dyn TaskQueue> + Send + Sync>;

/// Validated engine tunables.
#[derive(Clone)]
pub struct EngineConfig {
    /// Token budget granted to a bucket before the server reports limits.
    pub(crate) assumed_budget: i64,
    /// Drain batch cap for limitless buckets after a global rejection.
    /// `usize::MAX` leaves limitless drains unbounded.
    pub(crate) global_retry_budget: usize,
    /// Backlog depth at which the overflow policy runs.
    pub(crate) overflow_threshold: usize,
    pub(crate) overflow_factory: OverflowPolicyFactory,
    pub(crate) queue_factory: QueueFactory,
    /// Bound on the worker's empty-queue wait, so shutdown stays responsive.
    pub(crate) idle_wait: Duration,
    /// First delay after a transient connectivity failure.
    pub(crate) retry_base: Duration,
    /// Ceiling for the transient-failure backoff.
    pub(crate) retry_max: Duration,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new().build().expect("default config is valid")
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("assumed_budget", &self.assumed_budget)
            .field("global_retry_budget", &self.global_retry_budget)
            .field("overflow_threshold", &self.overflow_threshold)
            .field("idle_wait", &self.idle_wait)
            .field("retry_base", &self.retry_base)
            .field("retry_max", &self.retry_max)
            .finish()
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    assumed_budget: i64,
    global_retry_budget: usize,
    overflow_threshold: usize,
    overflow_factory: OverflowPolicyFactory,
    queue_factory: QueueFactory,
    idle_wait: Duration,
    retry_base: Duration,
    retry_max: Duration,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            assumed_budget: 5,
            global_retry_budget: usize::MAX,
            overflow_threshold: 64,
            overflow_factory: Arc::new(|| Box::new(DropCancelled::new())),
            queue_factory: Arc::new(|| Box::new(FifoQueue::new())),
            idle_wait: Duration::from_millis(500),
            retry_base: Duration::from_millis(250),
            retry_max: Duration::from_secs(30),
        }
    }

    /// Token budget for buckets whose server limits are still unknown.
    pub fn assumed_budget(mut self, budget: i64) -> Self {
        self.assumed_budget = budget;
        self
    }

    /// Cap on how many tasks one global-bucket drain resubmits.
    pub fn global_retry_budget(mut self, budget: usize) -> Self {
        self.global_retry_budget = budget;
        self
    }

    /// Backlog depth that triggers the overflow policy.
    pub fn overflow_threshold(mut self, threshold: usize) -> Self {
        self.overflow_threshold = threshold;
        self
    }

    /// Factory producing one overflow policy per bucket.
    pub fn overflow_policy(mut self, factory: OverflowPolicyFactory) -> Self {
        self.overflow_factory = factory;
        self
    }

    /// Factory for the dispatch queue's FIFO storage.
    pub fn queue(mut self, factory: QueueFactory) -> Self {
        self.queue_factory = factory;
        self
    }

    /// Bound on the worker's empty-queue wait.
    pub fn idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Backoff bounds for transient connectivity failures.
    pub fn transient_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.assumed_budget < 1 {
            return Err(ConfigError::InvalidAssumedBudget(self.assumed_budget));
        }
        if self.overflow_threshold < 1 {
            return Err(ConfigError::InvalidOverflowThreshold(self.overflow_threshold));
        }
        if self.retry_base.is_zero() || self.retry_base > self.retry_max {
            return Err(ConfigError::InvalidRetryBackoff {
                base: self.retry_base,
                max: self.retry_max,
            });
        }
        if self.idle_wait.is_zero() {
            return Err(ConfigError::InvalidIdleWait);
        }
        Ok(EngineConfig {
            assumed_budget: self.assumed_budget,
            global_retry_budget: self.global_retry_budget,
            overflow_threshold: self.overflow_threshold,
            overflow_factory: self.overflow_factory,
            queue_factory: self.queue_factory,
            idle_wait: self.idle_wait,
            retry_base: self.retry_base,
            retry_max: self.retry_max,
        })
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = EngineConfig::default();
        assert_eq!(config.assumed_budget, 5);
        assert_eq!(config.overflow_threshold, 64);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = EngineConfig::builder().assumed_budget(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidAssumedBudget(0));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = EngineConfig::builder().overflow_threshold(0).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidOverflowThreshold(0));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let err = EngineConfig::builder()
            .transient_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRetryBackoff { .. }));
    }

    #[test]
    fn zero_idle_wait_is_rejected() {
        let err = EngineConfig::builder().idle_wait(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::InvalidIdleWait);
    }
}
