//! Coordinator configuration
//!
//! [`InvocationConfig`] holds the process-wide retry/refresh defaults,
//! [`RequestOptions`] overrides any of them for a single call chain.
//! Everything deserializes with defaults so partial TOML works.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound for a single retry delay when exponential backoff is on
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Retry and recovery policy applied to one call chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Automatic retries after the first failed attempt
    pub max_retries: u32,
    /// Delay before a retry attempt, in milliseconds
    pub retry_delay_ms: u64,
    /// Double the delay for every further retry
    pub use_exponential_backoff: bool,
    /// Refresh the channel once retries are exhausted
    pub refresh_on_max_retries_exhausted: bool,
    /// Publish `RequestRetry` events for observers
    pub show_retry_notification: bool,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay_ms: 0,
            use_exponential_backoff: false,
            refresh_on_max_retries_exhausted: true,
            show_retry_notification: true,
        }
    }
}

impl InvocationConfig {
    /// Create a new configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retries
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set base retry delay
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable exponential backoff
    #[must_use]
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Enable or disable refreshing the channel after retries run out
    #[must_use]
    pub fn with_refresh_on_exhausted(mut self, enabled: bool) -> Self {
        self.refresh_on_max_retries_exhausted = enabled;
        self
    }

    /// Base retry delay
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay to wait before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if !self.use_exponential_backoff || self.retry_delay_ms == 0 {
            return self.retry_delay();
        }
        let shift = retry.saturating_sub(1).min(20);
        let delay_ms = self
            .retry_delay_ms
            .saturating_mul(1_u64 << shift)
            .min(MAX_RETRY_DELAY_MS.max(self.retry_delay_ms));
        Duration::from_millis(delay_ms)
    }

    /// Apply per-call overrides on top of this configuration.
    #[must_use]
    pub fn merged(&self, options: &RequestOptions) -> Self {
        Self {
            max_retries: options.max_retries.unwrap_or(self.max_retries),
            retry_delay_ms: options
                .retry_delay
                .map(|d| d.as_millis() as u64)
                .unwrap_or(self.retry_delay_ms),
            use_exponential_backoff: options
                .use_exponential_backoff
                .unwrap_or(self.use_exponential_backoff),
            refresh_on_max_retries_exhausted: options
                .refresh_on_max_retries_exhausted
                .unwrap_or(self.refresh_on_max_retries_exhausted),
            show_retry_notification: options
                .show_retry_notification
                .unwrap_or(self.show_retry_notification),
        }
    }
}

/// Per-call overrides; unset fields fall back to the coordinator defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Override for [`InvocationConfig::max_retries`]
    pub max_retries: Option<u32>,
    /// Override for the base retry delay
    pub retry_delay: Option<Duration>,
    /// Override for [`InvocationConfig::use_exponential_backoff`]
    pub use_exponential_backoff: Option<bool>,
    /// Override for [`InvocationConfig::refresh_on_max_retries_exhausted`]
    pub refresh_on_max_retries_exhausted: Option<bool>,
    /// Override for [`InvocationConfig::show_retry_notification`]
    pub show_retry_notification: Option<bool>,
}

impl RequestOptions {
    /// Options that override nothing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override maximum retries
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Override base retry delay
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Override exponential backoff
    #[must_use]
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = Some(enabled);
        self
    }

    /// Override refresh after exhausted retries
    #[must_use]
    pub fn refresh_on_exhausted(mut self, enabled: bool) -> Self {
        self.refresh_on_max_retries_exhausted = Some(enabled);
        self
    }

    /// Override retry notifications
    #[must_use]
    pub fn retry_notification(mut self, enabled: bool) -> Self {
        self.show_retry_notification = Some(enabled);
        self
    }
}

/// Channel refresh settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// How long a session waits for the channel refreshed signal
    pub timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl RefreshConfig {
    /// Session timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Window in which a repeated dedup key is dropped, in milliseconds
    pub dedup_window_ms: u64,
    /// Dedup records kept before pruning kicks in
    pub history_limit: usize,
    /// Oldest records evicted by one prune
    pub prune_count: usize,
    /// Buffer of the async event stream
    pub stream_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 1_000,
            history_limit: 100,
            prune_count: 50,
            stream_capacity: 256,
        }
    }
}

impl EventBusConfig {
    /// Dedup window as a duration
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Process-wide call defaults
    pub invocation: InvocationConfig,
    /// Channel refresh settings
    pub refresh: RefreshConfig,
    /// Event bus settings
    pub events: EventBusConfig,
}
