//! Read-through caching and cache invalidation behaviors.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheStore;
use crate::error::{MediatorError, Result};
use crate::handler::DispatchContext;
use crate::message::Request;
use crate::pipeline::{Next, PipelineBehavior};

/// Default lifetime of cached responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Requests whose responses may be cached.
pub trait Cacheable {
    /// Key for this request; `None` bypasses the cache.
    fn cache_key(&self) -> Option<String>;

    /// Lifetime override for this request.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// Requests that make cached responses stale.
pub trait InvalidatesCache {
    /// Fragment contained in every key to drop, e.g. `"Color"`.
    fn invalidation_fragment(&self) -> Option<String>;
}

/// Serves responses from a [`CacheStore`] and fills it on misses.
///
/// Responses are stored as JSON. Entries that no longer decode are logged
/// and replaced.
#[derive(Clone)]
pub struct CachingBehavior {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl CachingBehavior {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }
}

impl<R> PipelineBehavior<R> for CachingBehavior
where
    R: Request + Cacheable,
    R::Response: Serialize + DeserializeOwned,
{
    async fn handle(
        &self,
        request: &R,
        next: Next<R::Response>,
        ctx: &DispatchContext,
    ) -> Result<R::Response> {
        let key = match request.cache_key() {
            Some(key) => key,
            None => return next.run().await,
        };

        if let Some(bytes) = self.store.get(&key).await? {
            match serde_json::from_slice::<R::Response>(&bytes) {
                Ok(cached) => {
                    tracing::debug!(
                        target: "source_mediator::dispatch",
                        call_id = ctx.call_id(),
                        key = %key,
                        "Cache hit"
                    );
                    return Ok(cached);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "source_mediator::dispatch",
                        key = %key,
                        error = %e,
                        "Discarding undecodable cache entry"
                    );
                }
            }
        }

        let response = next.run().await?;
        let encoded = serde_json::to_vec(&response).map_err(|e| MediatorError::cache(&key, e))?;
        let ttl = request.cache_ttl().unwrap_or(self.default_ttl);
        self.store.set(&key, Bytes::from(encoded), Some(ttl)).await?;
        tracing::debug!(
            target: "source_mediator::dispatch",
            call_id = ctx.call_id(),
            key = %key,
            ttl_secs = ttl.as_secs(),
            "Cached response"
        );

        Ok(response)
    }
}

/// Drops cache entries matching `*{fragment}*` before the handler runs.
#[derive(Clone)]
pub struct CacheInvalidationBehavior {
    store: Arc<dyn CacheStore>,
}

impl CacheInvalidationBehavior {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }
}

impl<R> PipelineBehavior<R> for CacheInvalidationBehavior
where
    R: Request + InvalidatesCache,
{
    async fn handle(
        &self,
        request: &R,
        next: Next<R::Response>,
        ctx: &DispatchContext,
    ) -> Result<R::Response> {
        if let Some(fragment) = request.invalidation_fragment() {
            let pattern = format!("*{fragment}*");
            let removed = self.store.remove_by_pattern(&pattern).await?;
            tracing::debug!(
                target: "source_mediator::dispatch",
                call_id = ctx.call_id(),
                pattern = %pattern,
                removed,
                "Invalidated cache entries"
            );
        }
        next.run().await
    }
}
