//! Notification fan-out.
//!
//! Every handler registered for the concrete notification type is invoked,
//! concurrently and bounded by a semaphore owned by that publish. A failing or panicking handler
//! never prevents the others from running; all failures are collected into
//! one [`AggregateNotificationError`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{AggregateNotificationError, MediatorError, NotificationFailure, Result};
use crate::handler::{DispatchContext, Envelope, HandlerRegistry, NotificationBinding};
use crate::message::Notification;
use crate::resolver::Resolver;

/// A notification handler panicked; carried as the source of its failure.
#[derive(Debug, Error)]
#[error("notification handler panicked: {message}")]
pub struct HandlerPanic {
    pub message: String,
}

impl HandlerPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

/// Delivers notifications to all of their handlers.
#[derive(Clone, Debug)]
pub struct NotificationPublisher {
    registry: Arc<HandlerRegistry>,
    permits: usize,
}

impl NotificationPublisher {
    /// `max_concurrent` handlers of one publish may run at a time (at least 1).
    pub fn new(registry: Arc<HandlerRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            permits: max_concurrent.clamp(1, Semaphore::MAX_PERMITS),
        }
    }

    /// Publish `notification` to every handler registered for `N`.
    pub async fn publish<N: Notification>(
        &self,
        notification: N,
        resolver: &dyn Resolver,
        cancellation: CancellationToken,
    ) -> Result<()> {
        let ctx = DispatchContext::for_notification::<N>(cancellation);
        self.publish_envelope(Envelope::new(Arc::new(notification), ctx), resolver)
            .await
    }

    /// Publish an already erased notification.
    ///
    /// Handlers are selected by the message's concrete runtime type.
    pub async fn publish_envelope(&self, envelope: Envelope, resolver: &dyn Resolver) -> Result<()> {
        let ctx = envelope.context();
        ctx.check_cancelled()?;

        let handlers = self
            .registry
            .notification_handlers((**envelope.message()).type_id());
        if handlers.is_empty() {
            tracing::trace!(
                target: "source_mediator::publish",
                notification = ctx.message_type().name(),
                "No notification handlers"
            );
            return Ok(());
        }

        tracing::debug!(
            target: "source_mediator::publish",
            call_id = ctx.call_id(),
            notification = ctx.message_type().name(),
            handlers = handlers.len(),
            "Publishing notification"
        );

        // Per publish: a handler that publishes again must not wait on its own permit.
        let limiter = Semaphore::new(self.permits);
        let runs = handlers
            .iter()
            .enumerate()
            .map(|(index, binding)| Self::run_one(&limiter, index, binding, &envelope, resolver));
        let failures: Vec<NotificationFailure> = join_all(runs).await.into_iter().flatten().collect();

        if failures.is_empty() {
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(MediatorError::cancelled(ctx.message_type()));
        }

        Err(AggregateNotificationError::new(ctx.message_type().name(), handlers.len(), failures).into())
    }

    /// Invoke one handler; returns its failure, if any.
    async fn run_one(
        limiter: &Semaphore,
        index: usize,
        binding: &NotificationBinding,
        envelope: &Envelope,
        resolver: &dyn Resolver,
    ) -> Option<NotificationFailure> {
        let ctx = envelope.context();
        let failure = |error: MediatorError| NotificationFailure {
            index,
            handler: binding.handler_name,
            error,
        };

        let _permit = tokio::select! {
            _ = ctx.cancelled() => return Some(failure(MediatorError::cancelled(ctx.message_type()))),
            permit = limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => return Some(failure(MediatorError::handler(ctx.message_type(), Box::new(e)))),
            },
        };
        if let Err(e) = ctx.check_cancelled() {
            return Some(failure(e));
        }

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            binding.invoker.call(resolver, envelope)
        })) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(failure(e)),
            Err(payload) => {
                let panic = HandlerPanic::from_payload(payload);
                tracing::warn!(
                    target: "source_mediator::publish",
                    call_id = ctx.call_id(),
                    handler = binding.handler_name,
                    panic = %panic.message,
                    "Notification handler panicked"
                );
                Some(failure(MediatorError::handler(ctx.message_type(), Box::new(panic))))
            }
        }
    }
}
