//! Connection builder.
//!
//! Fluent alternative to filling in a [`ClientConfig`] by hand.

use std::time::Duration;

use crate::{ClientConfig, ConnectionManager, RetryConfig, TransportPtr};

/// Builder for [`ConnectionManager`] instances.
///
/// # Examples
///
/// ## Reconnecting client
/// ```no_run
/// use mux_rpc::{create_memory_transport, ConnectionBuilder};
/// use std::time::Duration;
///
/// # async fn example() -> mux_rpc::Result<()> {
/// let (transport, _peer) = create_memory_transport();
///
/// let manager = ConnectionBuilder::new(transport)
///     .client_id("dashboard")
///     .retry_max_attempts(20)
///     .retry_initial_delay(Duration::from_millis(200))
///     .retry_max_delay(Duration::from_secs(10))
///     .unmatched_response_limit(32)
///     .build();
///
/// manager.start().await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Single-shot client
/// ```no_run
/// use mux_rpc::{create_memory_transport, ConnectionBuilder};
///
/// let (transport, _peer) = create_memory_transport();
/// let manager = ConnectionBuilder::new(transport).build();
/// ```
pub struct ConnectionBuilder {
    // ---
    transport: TransportPtr,
    client_id: Option<String>,
    reconnect: Option<RetryConfig>,

    // Individual retry knobs (all optional)
    retry_max_attempts: Option<u32>,
    retry_multiplier: Option<f32>,
    retry_initial_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,

    unmatched_response_limit: Option<u32>,
}

impl ConnectionBuilder {
    /// Create a builder for a manager over `transport`.
    pub fn new(transport: TransportPtr) -> Self {
        // ---
        Self {
            transport,
            client_id: None,
            reconnect: None,
            retry_max_attempts: None,
            retry_multiplier: None,
            retry_initial_delay: None,
            retry_max_delay: None,
            unmatched_response_limit: None,
        }
    }

    /// Label used in log lines. Default: `"mux-rpc"`.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Use a complete reconnection policy.
    ///
    /// Individual `retry_*` settings override the matching fields.
    pub fn reconnect(mut self, config: RetryConfig) -> Self {
        self.reconnect = Some(config);
        self
    }

    /// Set maximum reconnect attempts.
    ///
    /// Default: no reconnection (single attempt).
    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    /// Set retry backoff multiplier.
    ///
    /// Default: 2.0 (exponential backoff).
    pub fn retry_multiplier(mut self, multiplier: f32) -> Self {
        self.retry_multiplier = Some(multiplier);
        self
    }

    /// Set initial delay before first retry.
    ///
    /// Default: 100ms.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = Some(delay);
        self
    }

    /// Set maximum delay between retry attempts.
    ///
    /// Default: 5s.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Tear the connection down after `limit` consecutive unmatched
    /// responses. Default: unmatched responses are only logged.
    pub fn unmatched_response_limit(mut self, limit: u32) -> Self {
        self.unmatched_response_limit = Some(limit);
        self
    }

    /// Resolve the settings into a [`ClientConfig`].
    pub fn config(&self) -> ClientConfig {
        // ---
        let mut config = match &self.client_id {
            Some(id) => ClientConfig::new(id.clone()),
            None => ClientConfig::default(),
        };

        // Reconnect only if a policy or at least one retry parameter was set
        let knobs_set = self.retry_max_attempts.is_some()
            || self.retry_multiplier.is_some()
            || self.retry_initial_delay.is_some()
            || self.retry_max_delay.is_some();

        if self.reconnect.is_some() || knobs_set {
            let base = self.reconnect.clone().unwrap_or_default();
            config.reconnect = Some(RetryConfig {
                max_attempts: self.retry_max_attempts.unwrap_or(base.max_attempts),
                multiplier: self.retry_multiplier.unwrap_or(base.multiplier),
                initial_delay: self.retry_initial_delay.unwrap_or(base.initial_delay),
                max_delay: self.retry_max_delay.unwrap_or(base.max_delay),
            });
        }

        config.unmatched_response_limit = self.unmatched_response_limit;
        config
    }

    /// Build the connection manager (consumes self).
    pub fn build(self) -> ConnectionManager {
        let config = self.config();
        ConnectionManager::new(self.transport, config)
    }
}
