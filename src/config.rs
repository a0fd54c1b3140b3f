//! Pool and extraction configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Connection pool configuration.
///
/// Validated once by [`PoolConfig::validate`] before pool creation and
/// treated as immutable afterwards. Driver-level tuning knobs (`arraysize`,
/// `prefetch_rows`, `stmt_cache_size`) are forwarded to the driver when the
/// underlying pool is opened.
#[derive(Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Data source name (host/service descriptor)
    pub dsn: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Minimum number of pooled connections
    pub pool_min: u32,
    /// Maximum number of pooled connections
    pub pool_max: u32,
    /// Connections added when the pool grows
    pub pool_increment: u32,
    /// How long an acquisition may wait on the driver pool
    pub pool_timeout: Duration,
    /// Rows fetched per driver round-trip
    pub arraysize: usize,
    /// Rows prefetched by the driver ahead of the cursor
    pub prefetch_rows: usize,
    /// Statement cache capacity per connection
    pub stmt_cache_size: usize,
    /// Acquisition attempts before the circuit opens
    pub max_retries: u32,
    /// Initial delay between failed acquisition attempts
    pub retry_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub retry_backoff: f64,
    /// Require an encrypted connection
    pub use_tls: bool,
    /// Optional wallet directory for TLS credentials
    pub wallet_location: Option<String>,
}

impl PoolConfig {
    /// Create a configuration with default tuning values.
    pub fn new(dsn: &str, user: &str, password: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            pool_min: 5,
            pool_max: 20,
            pool_increment: 1,
            pool_timeout: Duration::from_secs(30),
            arraysize: 2000,
            prefetch_rows: 2000,
            stmt_cache_size: 50,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_backoff: 2.0,
            use_tls: true,
            wallet_location: None,
        }
    }

    /// Set the minimum number of pooled connections.
    pub fn pool_min(mut self, min: u32) -> Self {
        self.pool_min = min;
        self
    }

    /// Set the maximum number of pooled connections.
    pub fn pool_max(mut self, max: u32) -> Self {
        self.pool_max = max;
        self
    }

    /// Set the pool growth increment.
    pub fn pool_increment(mut self, increment: u32) -> Self {
        self.pool_increment = increment;
        self
    }

    /// Set the acquisition timeout enforced by the driver pool.
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    /// Set the number of rows fetched per driver round-trip.
    pub fn arraysize(mut self, arraysize: usize) -> Self {
        self.arraysize = arraysize;
        self
    }

    /// Set the number of rows the driver prefetches ahead of the cursor.
    pub fn prefetch_rows(mut self, rows: usize) -> Self {
        self.prefetch_rows = rows;
        self
    }

    /// Set the statement cache capacity per connection.
    pub fn stmt_cache_size(mut self, capacity: usize) -> Self {
        self.stmt_cache_size = capacity;
        self
    }

    /// Set the number of acquisition attempts before the circuit opens.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial delay between failed acquisition attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the backoff multiplier applied after each failed attempt.
    pub fn retry_backoff(mut self, backoff: f64) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Enable or disable TLS.
    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Set the wallet directory for TLS credentials.
    pub fn wallet_location(mut self, location: &str) -> Self {
        self.wallet_location = Some(location.to_string());
        self
    }

    /// Validate configuration parameters.
    ///
    /// Fails with `ConfigError` naming the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.pool_min < 1 {
            return Err(ExtractError::ConfigError("pool_min must be >= 1".into()));
        }
        if self.pool_max < self.pool_min {
            return Err(ExtractError::ConfigError(
                "pool_max must be >= pool_min".into(),
            ));
        }
        if self.arraysize == 0 {
            return Err(ExtractError::ConfigError(
                "arraysize must be positive".into(),
            ));
        }
        if self.prefetch_rows == 0 {
            return Err(ExtractError::ConfigError(
                "prefetch_rows must be positive".into(),
            ));
        }
        if self.retry_backoff < 1.0 {
            return Err(ExtractError::ConfigError(
                "retry_backoff must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

// Debug output masks the password so configs can be logged safely.
impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("dsn", &self.dsn)
            .field("user", &self.user)
            .field("password", &"****")
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .field("pool_increment", &self.pool_increment)
            .field("pool_timeout", &self.pool_timeout)
            .field("arraysize", &self.arraysize)
            .field("prefetch_rows", &self.prefetch_rows)
            .field("stmt_cache_size", &self.stmt_cache_size)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_backoff", &self.retry_backoff)
            .field("use_tls", &self.use_tls)
            .field("wallet_location", &self.wallet_location)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PoolConfig {
        PoolConfig::new("localhost/xe", "scott", "tiger")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = base()
            .pool_min(2)
            .pool_max(8)
            .arraysize(500)
            .max_retries(5)
            .retry_delay(Duration::from_millis(250))
            .retry_backoff(1.5)
            .stmt_cache_size(200)
            .use_tls(false)
            .wallet_location("/etc/wallet");

        assert_eq!(config.pool_min, 2);
        assert_eq!(config.pool_max, 8);
        assert_eq!(config.arraysize, 500);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.retry_backoff, 1.5);
        assert_eq!(config.stmt_cache_size, 200);
        assert!(!config.use_tls);
        assert_eq!(config.wallet_location.as_deref(), Some("/etc/wallet"));
    }

    #[test]
    fn test_pool_min_zero_rejected() {
        let err = base().pool_min(0).validate().unwrap_err();
        assert!(err.to_string().contains("pool_min"));
    }

    #[test]
    fn test_pool_max_below_min_rejected() {
        let err = base().pool_min(4).pool_max(2).validate().unwrap_err();
        assert!(err.to_string().contains("pool_max"));
    }

    #[test]
    fn test_arraysize_zero_rejected() {
        let err = base().arraysize(0).validate().unwrap_err();
        assert!(err.to_string().contains("arraysize"));
    }

    #[test]
    fn test_prefetch_rows_zero_rejected() {
        let err = base().prefetch_rows(0).validate().unwrap_err();
        assert!(err.to_string().contains("prefetch_rows"));
    }

    #[test]
    fn test_retry_backoff_below_one_rejected() {
        let err = base().retry_backoff(0.5).validate().unwrap_err();
        assert!(err.to_string().contains("retry_backoff"));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = base().pool_max(12).arraysize(100);
        let json = serde_json::to_string(&config).unwrap();
        let back: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pool_max, 12);
        assert_eq!(back.arraysize, 100);
        assert_eq!(back.dsn, "localhost/xe");
    }

    #[test]
    fn test_debug_masks_password() {
        let rendered = format!("{:?}", base());
        assert!(!rendered.contains("tiger"));
        assert!(rendered.contains("****"));
    }
}
