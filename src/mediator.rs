//! Mediator facade and builder.
//!
//! The [`MediatorBuilder`] provides a fluent API for registering handlers and
//! behaviors. The [`Mediator`] it builds is the caller-facing entry point:
//! 1. Wrap the message and a fresh [`DispatchContext`] in an envelope
//! 2. Run the behaviors matching the call, outermost first
//! 3. Dispatch to the single handler (or fan out, for notifications)
//!
//! # Example
//!
//! ```ignore
//! use source_mediator::Mediator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mediator = Mediator::builder()
//!         .command_fn(|cmd: Arc<CreateColor>, _ctx| async move {
//!             println!("creating {}", cmd.name);
//!             Ok(())
//!         })?
//!         .notification_fn(|evt: Arc<ColorCreated>, _ctx| async move {
//!             println!("created {}", evt.id);
//!             Ok(())
//!         })
//!         .with_logging(-100)
//!         .build(Arc::new(EmptyResolver));
//!
//!     mediator.send_command(CreateColor { name: "teal".into() }).await?;
//!     mediator.publish(ColorCreated { id: 1 }).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::MediatorConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{HandlerResult, MediatorError, Result};
use crate::handler::{
    CommandHandler, DispatchContext, Envelope, HandlerRegistry, NotificationHandler,
    RequestHandler,
};
use crate::message::{AnyMessage, AnyValue, Command, Notification, Query, Request, TypeKey};
use crate::pipeline::behaviors::{
    CacheInvalidationBehavior, Cacheable, CachingBehavior, InvalidatesCache, LoggingBehavior,
    RetryBehavior, RetryPolicy, Validate, ValidationBehavior,
};
use crate::pipeline::{Matcher, Next, OpenBehavior, PipelineBehavior, PipelineComposer};
use crate::publisher::NotificationPublisher;
use crate::resolver::{InstanceSource, Resolver};

/// Caller-facing entry point for commands, queries and notifications.
///
/// `Mediator` is `Clone`; clones share the registry, behaviors and
/// configuration.
#[derive(Clone)]
pub struct Mediator {
    dispatcher: Dispatcher,
    pipeline: Arc<PipelineComposer>,
    publisher: NotificationPublisher,
    resolver: Arc<dyn Resolver>,
    config: Arc<MediatorConfig>,
}

impl Mediator {
    /// Create a new mediator builder.
    pub fn builder() -> MediatorBuilder {
        MediatorBuilder::new()
    }

    /// A mediator sharing everything with this one but resolving handler and
    /// behavior instances through `resolver`, typically a per-request scope.
    pub fn with_resolver(&self, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            ..self.clone()
        }
    }

    /// Send a request and wait for its response.
    pub async fn send<R: Request>(&self, request: R) -> Result<R::Response> {
        self.send_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Send a request with a caller-owned cancellation token.
    pub async fn send_with_cancellation<R: Request>(
        &self,
        request: R,
        cancellation: CancellationToken,
    ) -> Result<R::Response> {
        let ctx = DispatchContext::for_request::<R>(cancellation);
        let value = self.execute(Envelope::new(Arc::new(request), ctx)).await?;
        value
            .downcast::<R::Response>()
            .map(|v| *v)
            .map_err(|_| MediatorError::InvalidResult {
                message_type: std::any::type_name::<R>(),
                response_type: std::any::type_name::<R::Response>(),
            })
    }

    /// Send a command.
    pub async fn send_command<C: Command>(&self, command: C) -> Result<()> {
        self.send(command).await
    }

    pub async fn send_command_with_cancellation<C: Command>(
        &self,
        command: C,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.send_with_cancellation(command, cancellation).await
    }

    /// Send a query and wait for its response.
    pub async fn send_query<Q: Query>(&self, query: Q) -> Result<Q::Response> {
        self.send(query).await
    }

    pub async fn send_query_with_cancellation<Q: Query>(
        &self,
        query: Q,
        cancellation: CancellationToken,
    ) -> Result<Q::Response> {
        self.send_with_cancellation(query, cancellation).await
    }

    /// Send an erased message, routed by its concrete runtime type.
    ///
    /// `response` is the response type the caller expects back.
    pub async fn send_any(
        &self,
        message: AnyMessage,
        response: TypeKey,
        cancellation: CancellationToken,
    ) -> Result<AnyValue> {
        let id = (*message).type_id();
        let message_type = self
            .dispatcher
            .registry()
            .lookup(id)
            .map(|b| b.message)
            .unwrap_or_else(|| TypeKey::from_parts(id, "<unregistered message>"));
        let ctx = DispatchContext::new(message_type, Some(response), cancellation);
        self.execute(Envelope::new(message, ctx)).await
    }

    /// Publish a notification to all of its handlers.
    pub async fn publish<N: Notification>(&self, notification: N) -> Result<()> {
        self.publish_with_cancellation(notification, CancellationToken::new())
            .await
    }

    pub async fn publish_with_cancellation<N: Notification>(
        &self,
        notification: N,
        cancellation: CancellationToken,
    ) -> Result<()> {
        self.publisher
            .publish(notification, self.resolver.as_ref(), cancellation)
            .await
    }

    /// Publish an erased notification, routed by its concrete runtime type.
    pub async fn publish_any(
        &self,
        notification: AnyMessage,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let id = (*notification).type_id();
        let notification_type = self
            .dispatcher
            .registry()
            .notification_handlers(id)
            .first()
            .map(|b| b.notification)
            .unwrap_or_else(|| TypeKey::from_parts(id, "<unregistered notification>"));
        let ctx = DispatchContext::new(notification_type, None, cancellation);
        self.publisher
            .publish_envelope(Envelope::new(notification, ctx), self.resolver.as_ref())
            .await
    }

    pub fn registry(&self) -> &HandlerRegistry {
        self.dispatcher.registry()
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    async fn execute(&self, envelope: Envelope) -> Result<AnyValue> {
        let ctx = envelope.context().clone();
        ctx.check_cancelled()?;

        let result = self
            .pipeline
            .execute(&self.dispatcher, Arc::clone(&self.resolver), envelope)
            .await;

        match result {
            Err(e) if ctx.is_cancelled() && !e.is_cancelled() => {
                tracing::debug!(
                    target: "source_mediator::dispatch",
                    call_id = ctx.call_id(),
                    error = %e,
                    "Call failed after cancellation"
                );
                Err(MediatorError::cancelled(ctx.message_type()))
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("registry", self.dispatcher.registry())
            .field("behaviors", &self.pipeline.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Behavior registration applied when the builder is finished.
type Deferred = Box<dyn FnOnce(&mut PipelineComposer, &MediatorConfig) + Send>;

/// Builder for configuring and creating a [`Mediator`].
///
/// Handler registration returns `Result<Self>` and fails on a duplicate
/// command or request type. Behaviors are materialized in `build`, in the
/// order they were added, so the built-in ones see the final configuration.
pub struct MediatorBuilder {
    registry: HandlerRegistry,
    behaviors: Vec<Deferred>,
    config: MediatorConfig,
}

impl MediatorBuilder {
    /// Create a new mediator builder.
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            behaviors: Vec::new(),
            config: MediatorConfig::default(),
        }
    }

    /// Register command handler `H`, resolved on every dispatch.
    pub fn command<C, H>(mut self) -> Result<Self>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.registry.register_command::<C, H>()?;
        Ok(self)
    }

    /// Register command handler `H`, built by `factory` on every dispatch.
    pub fn command_with<C, H, F>(mut self, factory: F) -> Result<Self>
    where
        C: Command,
        H: CommandHandler<C>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry
            .register_command_source::<C, H>(InstanceSource::factory(factory))?;
        Ok(self)
    }

    /// Register a closure command handler.
    pub fn command_fn<C, F, Fut>(mut self, handler: F) -> Result<Self>
    where
        C: Command,
        F: Fn(Arc<C>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_command_fn(handler)?;
        Ok(self)
    }

    /// Register request or query handler `H`, resolved on every dispatch.
    pub fn request<R, H>(mut self) -> Result<Self>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.registry.register_request::<R, H>()?;
        Ok(self)
    }

    /// Register request handler `H`, built by `factory` on every dispatch.
    pub fn request_with<R, H, F>(mut self, factory: F) -> Result<Self>
    where
        R: Request,
        H: RequestHandler<R>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry
            .register_request_source::<R, H>(InstanceSource::factory(factory))?;
        Ok(self)
    }

    /// Register a closure request handler.
    pub fn request_fn<R, F, Fut>(mut self, handler: F) -> Result<Self>
    where
        R: Request,
        F: Fn(Arc<R>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R::Response>> + Send + 'static,
    {
        self.registry.register_request_fn(handler)?;
        Ok(self)
    }

    /// Add notification handler `H`, resolved on every publish.
    pub fn notification<N, H>(mut self) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        self.registry.register_notification::<N, H>();
        self
    }

    /// Add notification handler `H`, built by `factory` on every publish.
    pub fn notification_with<N, H, F>(mut self, factory: F) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry
            .register_notification_source::<N, H>(InstanceSource::factory(factory));
        self
    }

    /// Add a closure notification handler.
    pub fn notification_fn<N, F, Fut>(mut self, handler: F) -> Self
    where
        N: Notification,
        F: Fn(Arc<N>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register_notification_fn(handler);
        self
    }

    fn defer<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut PipelineComposer, &MediatorConfig) + Send + 'static,
    {
        self.behaviors.push(Box::new(register));
        self
    }

    /// Add behavior `B` for request `R`, resolved on every call.
    pub fn behavior<R, B>(self, order: i32) -> Self
    where
        R: Request,
        B: PipelineBehavior<R>,
    {
        self.defer(move |pipeline, _| pipeline.behavior::<R, B>(order))
    }

    /// Add behavior `B` for request `R`, built by `factory` on every call.
    pub fn behavior_with<R, B, F>(self, order: i32, factory: F) -> Self
    where
        R: Request,
        B: PipelineBehavior<R>,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.defer(move |pipeline, _| pipeline.behavior_with::<R, B, F>(order, factory))
    }

    /// Add a closure behavior for request `R`.
    pub fn behavior_fn<R, F, Fut>(self, order: i32, behavior: F) -> Self
    where
        R: Request,
        F: Fn(Arc<R>, Next<R::Response>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response>> + Send + 'static,
    {
        self.defer(move |pipeline, _| pipeline.behavior_fn::<R, F, Fut>(order, behavior))
    }

    /// Add open behavior `B` for every call `matcher` accepts.
    pub fn open_behavior<B: OpenBehavior>(self, order: i32, matcher: Matcher) -> Self {
        self.defer(move |pipeline, _| pipeline.open_behavior::<B>(order, matcher))
    }

    /// Add open behavior `B`, built by `factory` on every call.
    pub fn open_behavior_with<B, F>(self, order: i32, matcher: Matcher, factory: F) -> Self
    where
        B: OpenBehavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.defer(move |pipeline, _| pipeline.open_behavior_with::<B, F>(order, matcher, factory))
    }

    /// Log every request, using `logging.slow_threshold_ms` from the config.
    pub fn with_logging(self, order: i32) -> Self {
        self.defer(move |pipeline, config| {
            let threshold = config.logging.slow_threshold();
            pipeline.open_behavior_with(order, Matcher::any(), move || {
                LoggingBehavior::new(threshold)
            });
        })
    }

    /// Retry failed requests with the configured [`RetryPolicy`].
    pub fn with_retry(self, order: i32) -> Self {
        self.defer(move |pipeline, config| {
            let policy = config.retry.clone();
            pipeline.open_behavior_with(order, Matcher::any(), move || {
                RetryBehavior::new(policy.clone())
            });
        })
    }

    /// Validate `R` before its handler runs.
    pub fn with_validation<R>(self, order: i32) -> Self
    where
        R: Request + Validate,
    {
        self.defer(move |pipeline, _| {
            pipeline.behavior_with::<R, ValidationBehavior, _>(order, || ValidationBehavior)
        })
    }

    /// Cache responses of `R` in `store`.
    pub fn with_caching<R>(self, order: i32, store: Arc<dyn CacheStore>) -> Self
    where
        R: Request + Cacheable,
        R::Response: serde::Serialize + serde::de::DeserializeOwned,
    {
        self.defer(move |pipeline, config| {
            let ttl = config.cache.default_ttl();
            pipeline.behavior_with::<R, CachingBehavior, _>(order, move || {
                CachingBehavior::new(Arc::clone(&store), ttl)
            });
        })
    }

    /// Drop cached entries before `R` runs.
    pub fn with_cache_invalidation<R>(self, order: i32, store: Arc<dyn CacheStore>) -> Self
    where
        R: Request + InvalidatesCache,
    {
        self.defer(move |pipeline, _| {
            pipeline.behavior_with::<R, CacheInvalidationBehavior, _>(order, move || {
                CacheInvalidationBehavior::new(Arc::clone(&store))
            });
        })
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of concurrently running notification handlers.
    ///
    /// Default: 256
    pub fn max_concurrent_notification_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_notification_handlers = limit;
        self
    }

    /// Set the policy used by [`with_retry`](Self::with_retry).
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the threshold used by [`with_logging`](Self::with_logging).
    ///
    /// Default: 500ms
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.config.logging.slow_threshold_ms =
            u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Finish registration.
    ///
    /// Handler and behavior instances are resolved through `resolver` on
    /// every call.
    pub fn build(self, resolver: Arc<dyn Resolver>) -> Mediator {
        let mut pipeline = PipelineComposer::new();
        for register in self.behaviors {
            register(&mut pipeline, &self.config);
        }

        let registry = Arc::new(self.registry);
        tracing::debug!(
            handlers = registry.len(),
            behaviors = pipeline.len(),
            "Built mediator"
        );

        Mediator {
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            pipeline: Arc::new(pipeline),
            publisher: NotificationPublisher::new(registry, self.config.notification_permits()),
            resolver,
            config: Arc::new(self.config),
        }
    }
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::EmptyResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo(String);
    impl Request for Echo {
        type Response = String;
    }
    impl Query for Echo {}

    struct Ping;
    impl Request for Ping {
        type Response = ();
    }
    impl Command for Ping {}

    fn echo_mediator() -> Mediator {
        Mediator::builder()
            .request_fn(|q: Arc<Echo>, _ctx| async move { HandlerResult::Ok(q.0.clone()) })
            .unwrap()
            .build(Arc::new(EmptyResolver))
    }

    #[tokio::test]
    async fn test_send_query() {
        let mediator = echo_mediator();
        assert_eq!(mediator.send_query(Echo("hi".into())).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_send_any_routes_by_runtime_type() {
        let mediator = echo_mediator();
        let message: AnyMessage = Arc::new(Echo("erased".into()));
        let value = mediator
            .send_any(message, TypeKey::of::<String>(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "erased");
    }

    #[tokio::test]
    async fn test_duplicate_in_builder() {
        let result = Mediator::builder()
            .command_fn(|_c: Arc<Ping>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap()
            .command_fn(|_c: Arc<Ping>, _ctx| async { HandlerResult::Ok(()) });
        assert!(matches!(result, Err(MediatorError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_with_resolver_shares_registry() {
        let mediator = echo_mediator();
        let scoped = mediator.with_resolver(Arc::new(EmptyResolver));
        assert_eq!(scoped.registry().len(), 1);
        assert_eq!(scoped.send(Echo("x".into())).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_publish_any() {
        struct Seen;
        impl Notification for Seen {}

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mediator = Mediator::builder()
            .notification_fn(move |_n: Arc<Seen>, _ctx| {
                c.fetch_add(1, Ordering::SeqCst);
                async { HandlerResult::Ok(()) }
            })
            .build(Arc::new(EmptyResolver));

        mediator
            .publish_any(Arc::new(Seen), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_config_setters() {
        let mediator = Mediator::builder()
            .max_concurrent_notification_handlers(8)
            .slow_threshold(Duration::from_secs(2))
            .retry_policy(RetryPolicy::none())
            .build(Arc::new(EmptyResolver));

        assert_eq!(mediator.config().max_concurrent_notification_handlers, 8);
        assert_eq!(mediator.config().logging.slow_threshold_ms, 2000);
        assert_eq!(mediator.config().retry.max_attempts, 1);
    }

    #[test]
    fn test_slow_threshold_saturates() {
        let mediator = Mediator::builder()
            .slow_threshold(Duration::MAX)
            .build(Arc::new(EmptyResolver));

        assert_eq!(mediator.config().logging.slow_threshold_ms, u64::MAX);
    }
}
