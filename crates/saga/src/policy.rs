//! Retry and compensation policy.

use std::time::Duration;

use crate::error::{ErrorKind, StepError};
use crate::order_fulfillment::Step;

/// Exponential backoff without jitter.
///
/// `max_attempts` counts the first try, so the default runs an activity at
/// most three times, waiting 1s then 2s between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Retries back to back, for tests and local runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Wait before retry number `retry` (0 for the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_coefficient.max(1.0).powi(retry as i32);
        let millis = self.initial_interval.as_millis() as f64 * factor;
        let cap = self.max_interval.as_millis() as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }

    /// Whether a failure on attempt `attempt` (1-based) earns another try.
    pub fn should_retry(&self, attempt: u32, error: &StepError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// Per-activity retry policies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetryPolicies {
    pub create_order: RetryPolicy,
    pub check_inventory: RetryPolicy,
    pub process_payment: RetryPolicy,
    pub send_notification: RetryPolicy,
    pub complete: RetryPolicy,
    /// Used by cancel, fail and inventory-release activities.
    pub compensation: RetryPolicy,
}

impl RetryPolicies {
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            create_order: policy.clone(),
            check_inventory: policy.clone(),
            process_payment: policy.clone(),
            send_notification: policy.clone(),
            complete: policy.clone(),
            compensation: policy,
        }
    }

    pub fn for_step(&self, step: Step) -> &RetryPolicy {
        match step {
            Step::CreateOrder => &self.create_order,
            Step::CheckInventory => &self.check_inventory,
            Step::ProcessPayment => &self.process_payment,
            Step::SendNotification => &self.send_notification,
            Step::Complete => &self.complete,
        }
    }
}

/// Whether a failed saga must hand its reservation back.
///
/// Inventory failures always release. Payment failures release unless the
/// error is `Internal`: that kind is raised after the charge succeeded, so
/// the reservation is left to the expiry sweep.
pub fn should_release_inventory(step: Step, kind: ErrorKind) -> bool {
    match step {
        Step::CheckInventory => true,
        Step::ProcessPayment => kind != ErrorKind::Internal,
        Step::CreateOrder | Step::SendNotification | Step::Complete => false,
    }
}
