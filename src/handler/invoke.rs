//! Type-erased invocation thunks.
//!
//! Registration turns each typed handler into a boxed [`Handler`] (for
//! commands and requests) or [`NotificationInvoker`] (for notifications).
//! The thunk downcasts the erased message back to its concrete type,
//! obtains the handler instance and returns a `'static` future.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use super::{CommandHandler, DispatchContext, Envelope, NotificationHandler, RequestHandler};
use crate::error::{HandlerResult, MediatorError, Result};
use crate::message::{AnyValue, Command, Notification, Request};
use crate::resolver::{InstanceSource, Resolver};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Erased command or request handler.
///
/// Command thunks resolve to `Ok(None)`; request thunks to `Ok(Some(value))`.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
    ) -> BoxFuture<'static, Result<Option<AnyValue>>>;
}

/// Erased notification handler.
pub trait NotificationInvoker: Send + Sync + 'static {
    fn call(&self, resolver: &dyn Resolver, envelope: &Envelope) -> BoxFuture<'static, Result<()>>;
}

fn failed<T: Send + 'static>(err: MediatorError) -> BoxFuture<'static, Result<T>> {
    Box::pin(async move { Err(err) })
}

/// Command handler instance obtained per call.
pub struct CommandThunk<C, H> {
    source: InstanceSource<H>,
    _phantom: PhantomData<fn(&C)>,
}

impl<C, H> CommandThunk<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    pub fn new(source: InstanceSource<H>) -> Self {
        Self {
            source,
            _phantom: PhantomData,
        }
    }
}

impl<C, H> Handler for CommandThunk<C, H>
where
    C: Command,
    H: CommandHandler<C>,
{
    fn call(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
    ) -> BoxFuture<'static, Result<Option<AnyValue>>> {
        let handler = match self.source.obtain(resolver) {
            Ok(h) => h,
            Err(e) => return failed(e),
        };
        let command = match envelope.downcast::<C>() {
            Ok(c) => c,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();

        Box::pin(async move {
            handler
                .handle(&command, &ctx)
                .await
                .map_err(|e| MediatorError::handler(ctx.message_type(), e))?;
            Ok(None)
        })
    }
}

/// Request handler instance obtained per call.
pub struct RequestThunk<R, H> {
    source: InstanceSource<H>,
    _phantom: PhantomData<fn(&R)>,
}

impl<R, H> RequestThunk<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    pub fn new(source: InstanceSource<H>) -> Self {
        Self {
            source,
            _phantom: PhantomData,
        }
    }
}

impl<R, H> Handler for RequestThunk<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    fn call(
        &self,
        resolver: &dyn Resolver,
        envelope: &Envelope,
    ) -> BoxFuture<'static, Result<Option<AnyValue>>> {
        let handler = match self.source.obtain(resolver) {
            Ok(h) => h,
            Err(e) => return failed(e),
        };
        let request = match envelope.downcast::<R>() {
            Ok(r) => r,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();

        Box::pin(async move {
            let response = handler
                .handle(&request, &ctx)
                .await
                .map_err(|e| MediatorError::handler(ctx.message_type(), e))?;
            Ok(Some(Box::new(response) as AnyValue))
        })
    }
}

/// Closure handling command `C`.
pub struct CommandFn<C, F, Fut> {
    handler: F,
    _phantom: PhantomData<fn(Arc<C>) -> Fut>,
}

impl<C, F, Fut> CommandFn<C, F, Fut>
where
    C: Command,
    F: Fn(Arc<C>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, Fut> Handler for CommandFn<C, F, Fut>
where
    C: Command,
    F: Fn(Arc<C>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        _resolver: &dyn Resolver,
        envelope: &Envelope,
    ) -> BoxFuture<'static, Result<Option<AnyValue>>> {
        let command = match envelope.downcast::<C>() {
            Ok(c) => c,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();
        let key = ctx.message_type();
        let fut = (self.handler)(command, ctx);

        Box::pin(async move {
            fut.await.map_err(|e| MediatorError::handler(key, e))?;
            Ok(None)
        })
    }
}

/// Closure handling request `R`.
pub struct RequestFn<R, F, Fut> {
    handler: F,
    _phantom: PhantomData<fn(Arc<R>) -> Fut>,
}

impl<R, F, Fut> RequestFn<R, F, Fut>
where
    R: Request,
    F: Fn(Arc<R>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R::Response>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<R, F, Fut> Handler for RequestFn<R, F, Fut>
where
    R: Request,
    F: Fn(Arc<R>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R::Response>> + Send + 'static,
{
    fn call(
        &self,
        _resolver: &dyn Resolver,
        envelope: &Envelope,
    ) -> BoxFuture<'static, Result<Option<AnyValue>>> {
        let request = match envelope.downcast::<R>() {
            Ok(r) => r,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();
        let key = ctx.message_type();
        let fut = (self.handler)(request, ctx);

        Box::pin(async move {
            let response = fut.await.map_err(|e| MediatorError::handler(key, e))?;
            Ok(Some(Box::new(response) as AnyValue))
        })
    }
}

/// Notification handler instance obtained per call.
pub struct NotificationThunk<N, H> {
    source: InstanceSource<H>,
    _phantom: PhantomData<fn(&N)>,
}

impl<N, H> NotificationThunk<N, H>
where
    N: Notification,
    H: NotificationHandler<N>,
{
    pub fn new(source: InstanceSource<H>) -> Self {
        Self {
            source,
            _phantom: PhantomData,
        }
    }
}

impl<N, H> NotificationInvoker for NotificationThunk<N, H>
where
    N: Notification,
    H: NotificationHandler<N>,
{
    fn call(&self, resolver: &dyn Resolver, envelope: &Envelope) -> BoxFuture<'static, Result<()>> {
        let handler = match self.source.obtain(resolver) {
            Ok(h) => h,
            Err(e) => return failed(e),
        };
        let notification = match envelope.downcast::<N>() {
            Ok(n) => n,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();

        Box::pin(async move {
            handler
                .handle(&notification, &ctx)
                .await
                .map_err(|e| MediatorError::handler(ctx.message_type(), e))
        })
    }
}

/// Closure reacting to notification `N`.
pub struct NotificationFn<N, F, Fut> {
    handler: F,
    _phantom: PhantomData<fn(Arc<N>) -> Fut>,
}

impl<N, F, Fut> NotificationFn<N, F, Fut>
where
    N: Notification,
    F: Fn(Arc<N>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<N, F, Fut> NotificationInvoker for NotificationFn<N, F, Fut>
where
    N: Notification,
    F: Fn(Arc<N>, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, _resolver: &dyn Resolver, envelope: &Envelope) -> BoxFuture<'static, Result<()>> {
        let notification = match envelope.downcast::<N>() {
            Ok(n) => n,
            Err(e) => return failed(e),
        };
        let ctx = envelope.context().clone();
        let key = ctx.message_type();
        let fut = (self.handler)(notification, ctx);

        Box::pin(async move { fut.await.map_err(|e| MediatorError::handler(key, e)) })
    }
}
