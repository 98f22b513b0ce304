//! Mediator configuration.
//!
//! All fields have defaults, so a partial JSON document is enough:
//!
//! ```ignore
//! let config = MediatorConfig::from_json_str(r#"{
//!     "max_concurrent_notification_handlers": 32,
//!     "retry": { "max_attempts": 5 },
//!     "cache": { "default_ttl_secs": 600 }
//! }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{MediatorError, Result};
use crate::pipeline::behaviors::{RetryPolicy, DEFAULT_CACHE_TTL, DEFAULT_SLOW_THRESHOLD};

/// Default maximum concurrent notification handlers per publish.
pub const DEFAULT_MAX_CONCURRENT_NOTIFICATION_HANDLERS: usize = 256;

/// Settings for [`Mediator`](crate::Mediator) and the built-in behaviors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Handlers of one notification running at the same time.
    pub max_concurrent_notification_handlers: usize,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_notification_handlers: DEFAULT_MAX_CONCURRENT_NOTIFICATION_HANDLERS,
            retry: RetryPolicy::default(),
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl MediatorConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MediatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 0.0 {
            return Err(MediatorError::Config(format!(
                "retry.multiplier must be a non-negative number, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(MediatorError::Config(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Concurrency limit clamped to what a semaphore supports, at least 1.
    pub fn notification_permits(&self) -> usize {
        self.max_concurrent_notification_handlers
            .clamp(1, Semaphore::MAX_PERMITS)
    }
}

/// Settings for [`LoggingBehavior`](crate::pipeline::behaviors::LoggingBehavior).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub slow_threshold_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: u64::try_from(DEFAULT_SLOW_THRESHOLD.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl LoggingConfig {
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

/// Settings for [`CachingBehavior`](crate::pipeline::behaviors::CachingBehavior).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
