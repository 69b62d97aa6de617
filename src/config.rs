//! Configuration for the REST/WebSocket clients and the sync loop.
//!
//! This module provides the [`Config`] struct and the [`RetryConfig`]
//! backoff policy shared by stream reconnects and snapshot retries.

use std::time::Duration;

use crate::error::Error;

/// Depth limits accepted by the REST depth endpoint
pub const VALID_DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

/// Exchange environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production spot market
    #[default]
    Production,
    /// Spot testnet
    Testnet,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.binance.com",
            Environment::Testnet => "https://testnet.binance.vision",
        }
    }

    /// Get the combined-stream WebSocket URL
    pub fn websocket_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://stream.binance.com:9443/stream",
            Environment::Testnet => "wss://stream.testnet.binance.vision/stream",
        }
    }
}

/// Push interval of the diff depth stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateSpeed {
    /// One depth event every 100ms
    #[default]
    Ms100,
    /// One depth event every second
    Ms1000,
}

impl UpdateSpeed {
    /// Stream name for a symbol at this speed, e.g. `btcusdt@depth@100ms`
    pub fn depth_stream(&self, symbol: &str) -> String {
        match self {
            UpdateSpeed::Ms100 => format!("{}@depth@100ms", symbol.to_lowercase()),
            UpdateSpeed::Ms1000 => format!("{}@depth", symbol.to_lowercase()),
        }
    }
}

/// Exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_retries: u32,
    /// Initial delay between attempts
    pub initial_delay_ms: u64,
    /// Maximum delay between attempts
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries (0 = infinite)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay in milliseconds
    pub fn initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set maximum delay in milliseconds
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt is allowed after `attempt` attempts
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt < self.max_retries
    }
}

/// Configuration for the depth synchronizer and its clients
///
/// # Example
///
/// ```rust
/// use book_sync::Config;
/// use book_sync::config::Environment;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_environment(Environment::Testnet)
///     .with_depth_limit(500)
///     .with_snapshot_timeout(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Exchange environment
    environment: Environment,

    /// HTTP request timeout
    timeout: Duration,

    /// Upper bound on one snapshot fetch
    snapshot_timeout: Duration,

    /// Levels per side requested from the depth endpoint
    depth_limit: u32,

    /// Diff depth stream push interval
    update_speed: UpdateSpeed,

    /// Backoff for WebSocket reconnects
    reconnect: RetryConfig,

    /// Backoff between snapshot attempts for a symbol that keeps failing,
    /// and how many consecutive failures it gets before being dropped
    snapshot_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(10),
            depth_limit: 1000,
            update_speed: UpdateSpeed::default(),
            reconnect: RetryConfig::default(),
            snapshot_retry: RetryConfig::new()
                .max_retries(0)
                .initial_delay_ms(250)
                .max_delay_ms(10_000),
        }
    }
}

impl Config {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the exchange environment
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the snapshot fetch timeout
    #[must_use]
    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    /// Set the snapshot depth limit (see [`VALID_DEPTH_LIMITS`])
    #[must_use]
    pub fn with_depth_limit(mut self, limit: u32) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Set the depth stream update speed
    #[must_use]
    pub fn with_update_speed(mut self, speed: UpdateSpeed) -> Self {
        self.update_speed = speed;
        self
    }

    /// Set the WebSocket reconnect policy
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: RetryConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the snapshot retry backoff
    ///
    /// With a non-zero `max_retries`, a symbol whose snapshot fails that many
    /// times in a row is dropped by the driver.
    #[must_use]
    pub fn with_snapshot_retry(mut self, retry: RetryConfig) -> Self {
        self.snapshot_retry = retry;
        self
    }

    /// Check the configuration for values the exchange would reject
    pub fn validate(&self) -> Result<(), Error> {
        if !VALID_DEPTH_LIMITS.contains(&self.depth_limit) {
            return Err(Error::Config(format!(
                "depth limit {} not one of {:?}",
                self.depth_limit, VALID_DEPTH_LIMITS
            )));
        }
        if self.timeout.is_zero() || self.snapshot_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &'static str {
        self.environment.rest_base_url()
    }

    /// Get the WebSocket URL
    pub fn websocket_url(&self) -> &'static str {
        self.environment.websocket_url()
    }

    /// Get the HTTP timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the snapshot fetch timeout
    pub fn snapshot_timeout(&self) -> Duration {
        self.snapshot_timeout
    }

    /// Get the snapshot depth limit
    pub fn depth_limit(&self) -> u32 {
        self.depth_limit
    }

    /// Get the depth stream update speed
    pub fn update_speed(&self) -> UpdateSpeed {
        self.update_speed
    }

    /// Get the reconnect policy
    pub fn reconnect(&self) -> &RetryConfig {
        &self.reconnect
    }

    /// Get the snapshot retry backoff
    pub fn snapshot_retry(&self) -> &RetryConfig {
        &self.snapshot_retry
    }
}
