//! Worker configuration loaded from environment variables.

use std::time::Duration;

use saga::{RetryPolicies, RetryPolicy, SagaConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `SAGA_MAX_ATTEMPTS`, `SAGA_INITIAL_INTERVAL_MS`, `SAGA_MAX_INTERVAL_MS`:
///   retry policy applied to every activity
/// - `RESERVATION_TTL_SECS`, `SWEEP_INTERVAL_SECS`: reservation expiry
/// - `ORDER_CURRENCY`: currency charged for orders
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub currency: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            max_attempts: parsed("SAGA_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            initial_interval: parsed("SAGA_INITIAL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_interval),
            max_interval: parsed("SAGA_MAX_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_interval),
            reservation_ttl: parsed("RESERVATION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_ttl),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            currency: lookup("ORDER_CURRENCY")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.currency),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine configuration derived from these settings.
    pub fn saga_config(&self) -> SagaConfig {
        let policy = RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval);
        let ttl = chrono::Duration::from_std(self.reservation_ttl)
            .unwrap_or_else(|_| domain::inventory::default_reservation_ttl());

        SagaConfig {
            retry: RetryPolicies::uniform(policy),
            reservation_ttl: ttl,
            sweep_interval: self.sweep_interval,
            ..SagaConfig::default()
        }
        .with_currency(self.currency.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            max_attempts: saga.retry.process_payment.max_attempts,
            initial_interval: saga.retry.process_payment.initial_interval,
            max_interval: saga.retry.process_payment.max_interval,
            reservation_ttl: saga
                .reservation_ttl
                .to_std()
                .unwrap_or(Duration::from_secs(30 * 60)),
            sweep_interval: saga.sweep_interval,
            currency: saga.currency,
        }
    }
}
