//! Public, transport-agnostic client configuration.
//!
//! This type intentionally contains no transport-specific concepts (socket
//! addresses, TLS, framing). Transports are configured when they are
//! constructed; this config only governs correlation and lifecycle policy.

use std::time::Duration;

/// Retry configuration with exponential backoff.
///
/// Used as the reconnection policy of a
/// [`ConnectionManager`](crate::ConnectionManager): how many times to re-dial
/// after a failed or dropped connection, and how long to wait between tries.
///
/// # Example
///
/// ```
/// use mux_rpc::RetryConfig;
/// use std::time::Duration;
///
/// let retry_config = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    ///
    /// Example: 2.0 doubles the delay each time (exponential backoff).
    pub multiplier: f32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retry attempts (caps exponential growth).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// Reasonable default retry configuration.
    ///
    /// - `max_attempts`: 3
    /// - `multiplier`: 2.0 (exponential backoff)
    /// - `initial_delay`: 100ms
    /// - `max_delay`: 5s
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Correlation and lifecycle policy for one connection session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ---
    /// Identifier for this client, used in log output only.
    pub client_id: String,

    /// Reconnection policy.
    ///
    /// `None` (the default) means a dropped connection stays down until
    /// [`start()`](crate::ConnectionManager::start) is called again. With a
    /// policy, the manager moves to `Connecting` and re-dials with backoff.
    /// The same policy governs retries of the initial connect.
    pub reconnect: Option<RetryConfig>,

    /// Escalation threshold for unmatched response frames.
    ///
    /// Responses whose identifier matches no pending operation are normally
    /// logged and dropped. When set, this many *consecutive* unmatched
    /// responses are treated as a corrupted stream and the connection is torn
    /// down with a protocol error. Any matched response resets the streak.
    pub unmatched_response_limit: Option<u32>,
}

impl ClientConfig {
    /// Create a config with no reconnection and no unmatched-frame limit.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            reconnect: None,
            unmatched_response_limit: None,
        }
    }

    /// Enable automatic reconnection with the given backoff policy.
    ///
    /// # Example
    ///
    /// ```
    /// use mux_rpc::{ClientConfig, RetryConfig};
    ///
    /// let config = ClientConfig::new("ui").with_reconnect(RetryConfig::default());
    /// assert!(config.reconnect.is_some());
    /// ```
    pub fn with_reconnect(mut self, config: RetryConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Treat `limit` consecutive unmatched responses as a corrupted stream.
    pub fn with_unmatched_response_limit(mut self, limit: u32) -> Self {
        self.unmatched_response_limit = Some(limit);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("mux-rpc")
    }
}
