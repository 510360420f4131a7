//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync passes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum number of uploads in flight at once.
    pub upload_concurrency: usize,
    /// Bound on every remote call; exceeding it counts as a transport
    /// failure.
    pub request_timeout: Duration,
    /// Page size requested from the changes feed.
    pub page_size: u32,
    /// Backoff between failed passes.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            upload_concurrency: 4,
            request_timeout: Duration::from_secs(30),
            page_size: 100,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the upload worker count (at least one).
    pub fn with_upload_concurrency(mut self, workers: usize) -> Self {
        self.upload_concurrency = workers.max(1);
        self
    }

    /// Sets the per-call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the changes page size (at least one).
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How much randomness to apply to a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as is.
    None,
    /// Pick uniformly between zero and the computed delay.
    Full,
}

/// Configuration for retry behavior after a failed pass.
///
/// Applies to every failed pass, not only transport failures: a pass that
/// failed on local storage or an internal error is retried on the same
/// schedule. Retries are only scheduled while online.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter mode.
    pub jitter: Jitter,
    /// Consecutive failures after which automatic retries stop; `None`
    /// retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: Jitter::Full,
            max_attempts: None,
        }
    }

    /// Creates a configuration that never retries automatically.
    pub fn no_retry() -> Self {
        Self::new().with_max_attempts(0)
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter mode.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Limits the number of automatic retries.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Returns true if retry number `attempt` (1-based) may be scheduled.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Upper bound of the delay before retry number `attempt` (1-based):
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = (self.base_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// Delay before retry number `attempt` (1-based), with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let max_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
