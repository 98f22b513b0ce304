//! Typed handler traits implemented by application code.
//!
//! Implementations may use `async fn`; the returned future must be `Send`.

use std::future::Future;

use super::DispatchContext;
use crate::error::HandlerResult;
use crate::message::{Command, Notification, Request};

/// Handles command `C`.
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    fn handle(
        &self,
        command: &C,
        ctx: &DispatchContext,
    ) -> impl Future<Output = HandlerResult> + Send;
}

/// Handles request or query `R` and produces its response.
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    fn handle(
        &self,
        request: &R,
        ctx: &DispatchContext,
    ) -> impl Future<Output = HandlerResult<R::Response>> + Send;
}

/// Reacts to notification `N`.
///
/// Any number of handlers may be registered for the same notification.
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    fn handle(
        &self,
        notification: &N,
        ctx: &DispatchContext,
    ) -> impl Future<Output = HandlerResult> + Send;
}
