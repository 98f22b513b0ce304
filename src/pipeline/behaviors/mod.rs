//! Built-in pipeline behaviors.
//!
//! - [`LoggingBehavior`] - span and outcome log per request
//! - [`RetryBehavior`] - re-runs failed handlers with backoff
//! - [`ValidationBehavior`] - rejects requests failing [`Validate`]
//! - [`CachingBehavior`] / [`CacheInvalidationBehavior`] - response cache

mod caching;
mod logging;
mod retry;
mod validation;

pub use caching::{
    CacheInvalidationBehavior, Cacheable, CachingBehavior, InvalidatesCache, DEFAULT_CACHE_TTL,
};
pub use logging::{LoggingBehavior, DEFAULT_SLOW_THRESHOLD};
pub use retry::{RetryBehavior, RetryPolicy};
pub use validation::{FieldError, Validate, ValidationBehavior, ValidationErrors, Validator};
