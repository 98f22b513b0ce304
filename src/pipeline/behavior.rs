//! Behavior traits, matchers and adapters.
//!
//! A behavior wraps the handler of every request it matches. Typed behaviors
//! ([`PipelineBehavior`]) apply to one request type; open behaviors
//! ([`OpenBehavior`]) see the erased envelope and apply to every request
//! their [`Matcher`] accepts.

use std::any::TypeId;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Continuation, Next};
use crate::error::Result;
use crate::handler::{BoxFuture, DispatchContext, Envelope};
use crate::message::{AnyValue, Request, Unit};
use crate::resolver::{InstanceSource, Resolver};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Erased behavior as stored by the composer.
pub trait Behavior: Send + Sync + 'static {
    fn invoke(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
        next: Continuation,
    ) -> BoxFuture<'static, Result<AnyValue>>;
}

/// Behavior bound to request type `R`.
///
/// Return `next.run().await` to continue, or a value of your own to
/// short-circuit the handler.
pub trait PipelineBehavior<R: Request>: Send + Sync + 'static {
    fn handle(
        &self,
        request: &R,
        next: Next<R::Response>,
        ctx: &DispatchContext,
    ) -> impl Future<Output = Result<R::Response>> + Send;
}

/// Behavior over erased envelopes, applicable to many request types.
pub trait OpenBehavior: Send + Sync + 'static {
    fn handle(
        &self,
        envelope: &Envelope,
        next: Continuation,
    ) -> impl Future<Output = Result<AnyValue>> + Send;
}

/// Predicate deciding which calls a behavior applies to.
#[derive(Clone)]
pub enum Matcher {
    /// Every request.
    Any,
    /// Requests of one concrete message type.
    Request(TypeId),
    /// Requests expecting one response type.
    Response(TypeId),
    /// One concrete message type with one response type.
    Pair { request: TypeId, response: TypeId },
    /// Custom predicate over the call context.
    Predicate(Arc<dyn Fn(&DispatchContext) -> bool + Send + Sync>),
}

impl Matcher {
    pub fn any() -> Self {
        Matcher::Any
    }

    pub fn request<R: Request>() -> Self {
        Matcher::Request(TypeId::of::<R>())
    }

    pub fn response<T: 'static>() -> Self {
        Matcher::Response(TypeId::of::<T>())
    }

    /// Matches `R` sent with its declared response type.
    pub fn pair<R: Request>() -> Self {
        Matcher::Pair {
            request: TypeId::of::<R>(),
            response: TypeId::of::<R::Response>(),
        }
    }

    /// Matches every call expecting [`Unit`].
    pub fn commands() -> Self {
        Self::response::<Unit>()
    }

    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&DispatchContext) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, ctx: &DispatchContext) -> bool {
        let message = ctx.message_type().id();
        let response = ctx.response_type().map(|k| k.id());
        match self {
            Matcher::Any => true,
            Matcher::Request(id) => message == *id,
            Matcher::Response(id) => response == Some(*id),
            Matcher::Pair {
                request,
                response: expected,
            } => message == *request && response == Some(*expected),
            Matcher::Predicate(f) => f(ctx),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Any => f.write_str("Any"),
            Matcher::Request(id) => f.debug_tuple("Request").field(id).finish(),
            Matcher::Response(id) => f.debug_tuple("Response").field(id).finish(),
            Matcher::Pair { request, response } => f
                .debug_struct("Pair")
                .field("request", request)
                .field("response", response)
                .finish(),
            Matcher::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// A registered behavior with its ordering key.
pub struct BehaviorBinding {
    /// Lower values wrap outside higher ones.
    pub order: i32,
    /// Registration sequence; breaks ties between equal orders.
    pub sequence: u64,
    pub name: &'static str,
    pub matcher: Matcher,
    pub behavior: Box<dyn Behavior>,
}

impl BehaviorBinding {
    pub fn new(
        order: i32,
        name: &'static str,
        matcher: Matcher,
        behavior: Box<dyn Behavior>,
    ) -> Self {
        Self {
            order,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            name,
            matcher,
            behavior,
        }
    }
}

impl std::fmt::Debug for BehaviorBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorBinding")
            .field("order", &self.order)
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// Adapts a [`PipelineBehavior`] to the erased [`Behavior`].
pub struct TypedBehavior<R, B> {
    source: InstanceSource<B>,
    _phantom: PhantomData<fn(&R)>,
}

impl<R, B> TypedBehavior<R, B>
where
    R: Request,
    B: PipelineBehavior<R>,
{
    pub fn new(source: InstanceSource<B>) -> Self {
        Self {
            source,
            _phantom: PhantomData,
        }
    }
}

impl<R, B> Behavior for TypedBehavior<R, B>
where
    R: Request,
    B: PipelineBehavior<R>,
{
    fn invoke(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
        next: Continuation,
    ) -> BoxFuture<'static, Result<AnyValue>> {
        let behavior = match self.source.obtain(resolver) {
            Ok(b) => b,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let request = match envelope.downcast::<R>() {
            Ok(r) => r,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let ctx = envelope.context().clone();

        Box::pin(async move {
            let response = behavior.handle(&request, Next::new(next), &ctx).await?;
            Ok(Box::new(response) as AnyValue)
        })
    }
}

/// Adapts an [`OpenBehavior`] to the erased [`Behavior`].
pub struct OpenAdapter<B> {
    source: InstanceSource<B>,
}

impl<B: OpenBehavior> OpenAdapter<B> {
    pub fn new(source: InstanceSource<B>) -> Self {
        Self { source }
    }
}

impl<B: OpenBehavior> Behavior for OpenAdapter<B> {
    fn invoke(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
        next: Continuation,
    ) -> BoxFuture<'static, Result<AnyValue>> {
        let behavior = match self.source.obtain(resolver) {
            Ok(b) => b,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let envelope = envelope.clone();

        Box::pin(async move { behavior.handle(&envelope, next).await })
    }
}

/// Closure behavior for request `R`.
pub struct BehaviorFn<R, F, Fut> {
    behavior: F,
    _phantom: PhantomData<fn(Arc<R>) -> Fut>,
}

impl<R, F, Fut> BehaviorFn<R, F, Fut>
where
    R: Request,
    F: Fn(Arc<R>, Next<R::Response>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    pub fn new(behavior: F) -> Self {
        Self {
            behavior,
            _phantom: PhantomData,
        }
    }
}

impl<R, F, Fut> Behavior for BehaviorFn<R, F, Fut>
where
    R: Request,
    F: Fn(Arc<R>, Next<R::Response>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    fn invoke(
        &self,
        _resolver: &dyn Resolver,
        envelope: &Envelope,
        next: Continuation,
    ) -> BoxFuture<'static, Result<AnyValue>> {
        let request = match envelope.downcast::<R>() {
            Ok(r) => r,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = (self.behavior)(request, Next::new(next), envelope.context().clone());

        Box::pin(async move { Ok(Box::new(fut.await?) as AnyValue) })
    }
}
