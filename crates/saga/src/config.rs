//! Engine configuration.

use std::time::Duration;

use domain::Channel;
use domain::inventory::default_reservation_ttl;

use crate::order_fulfillment::{DEFAULT_CURRENCY, DEFAULT_PAYMENT_METHOD};
use crate::policy::{RetryPolicies, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub retry: RetryPolicies,
    /// How long a reservation holds stock before the sweeper may release it.
    pub reservation_ttl: chrono::Duration,
    pub currency: String,
    pub payment_method: String,
    pub notification_channel: Channel,
    pub sweep_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicies::default(),
            reservation_ttl: default_reservation_ttl(),
            currency: DEFAULT_CURRENCY.to_string(),
            payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            notification_channel: Channel::Email,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SagaConfig {
    /// Default attempts without backoff waits.
    pub fn for_testing() -> Self {
        Self {
            retry: RetryPolicies::uniform(RetryPolicy::immediate(3)),
            sweep_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SagaConfig::default();
        assert_eq!(config.retry.process_payment.max_attempts, 3);
        assert_eq!(config.retry.process_payment.initial_interval, Duration::from_secs(1));
        assert_eq!(config.reservation_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.currency, "USD");
        assert_eq!(config.notification_channel, Channel::Email);
    }

    #[test]
    fn testing_config_never_waits() {
        let config = SagaConfig::for_testing();
        assert_eq!(config.retry.check_inventory.delay_for_retry(2), Duration::ZERO);
        assert_eq!(config.retry.check_inventory.max_attempts, 3);
    }
}
