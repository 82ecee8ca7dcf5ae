use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::OperationId;
use crate::utils::errors::ErrorClass;

/// Exponential backoff shared by the loader and the recovery engine
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed per operation (not counting the first attempt)
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, multiplier: f64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            multiplier,
            max_delay_ms,
        }
    }

    /// `min(base * multiplier^attempt, max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One in-flight recoverable failure
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRecord {
    pub operation: OperationId,
    /// Retries scheduled so far, never above `max_retries`
    pub attempt_count: u32,
    pub next_delay: Duration,
    pub class: ErrorClass,
    pub last_error: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Attempt bookkeeping per operation id
#[derive(Debug, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    records: HashMap<OperationId, RetryRecord>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Schedule the next retry, or `None` once the budget is spent (the
    /// record is dropped at that point).
    pub fn schedule(
        &mut self,
        operation: &OperationId,
        class: ErrorClass,
        error: &str,
    ) -> Option<RetryRecord> {
        let attempts = self.records.get(operation).map_or(0, |r| r.attempt_count);
        if attempts >= self.policy.max_retries {
            warn!(
                "{}: retry budget of {} exhausted ({})",
                operation, self.policy.max_retries, error
            );
            self.records.remove(operation);
            return None;
        }

        let attempt_count = attempts + 1;
        let record = RetryRecord {
            operation: operation.clone(),
            attempt_count,
            next_delay: self.policy.delay_for_attempt(attempt_count - 1),
            class,
            last_error: error.to_string(),
            scheduled_at: Utc::now(),
        };
        debug!(
            "{}: retry {} of {} in {:?}",
            operation, attempt_count, self.policy.max_retries, record.next_delay
        );
        self.records.insert(operation.clone(), record.clone());
        Some(record)
    }

    pub fn get(&self, operation: &OperationId) -> Option<&RetryRecord> {
        self.records.get(operation)
    }

    /// Success clears the attempt counter
    pub fn clear(&mut self, operation: &OperationId) -> bool {
        self.records.remove(operation).is_some()
    }

    pub fn active(&self) -> Vec<RetryRecord> {
        self.records.values().cloned().collect()
    }
}
