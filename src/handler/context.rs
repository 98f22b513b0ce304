//! Per-call context for handlers and behaviors.
//!
//! A [`DispatchContext`] is created once per `send` or `publish` and passed
//! by reference to every behavior and handler taking part in the call. It
//! carries the call id, the message and expected response type keys, and
//! the caller's cancellation token.
//!
//! # Example
//!
//! ```ignore
//! async fn handle(&self, cmd: &ImportColors, ctx: &DispatchContext) -> HandlerResult {
//!     for row in &cmd.rows {
//!         ctx.check_cancelled()?;
//!         self.repo.insert(row).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{MediatorError, Result};
use crate::message::{AnyMessage, Notification, Request, TypeKey};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Context shared by all participants of one dispatch.
///
/// `DispatchContext` is `Clone`; clones share the same cancellation token.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    call_id: u64,
    message_type: TypeKey,
    response_type: Option<TypeKey>,
    cancellation: CancellationToken,
}

impl DispatchContext {
    /// Create a context with explicit type keys.
    pub fn new(
        message_type: TypeKey,
        response_type: Option<TypeKey>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            call_id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            message_type,
            response_type,
            cancellation,
        }
    }

    /// Context for sending request `R`.
    pub fn for_request<R: Request>(cancellation: CancellationToken) -> Self {
        Self::new(
            TypeKey::of::<R>(),
            Some(TypeKey::of::<R::Response>()),
            cancellation,
        )
    }

    /// Context for publishing notification `N`.
    pub fn for_notification<N: Notification>(cancellation: CancellationToken) -> Self {
        Self::new(TypeKey::of::<N>(), None, cancellation)
    }

    /// Process-unique id of this call.
    #[inline]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Key of the message being dispatched.
    #[inline]
    pub fn message_type(&self) -> TypeKey {
        self.message_type
    }

    /// Key of the expected response; `None` for notifications.
    #[inline]
    pub fn response_type(&self) -> Option<TypeKey> {
        self.response_type
    }

    /// The caller's cancellation token.
    #[inline]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the caller has cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the caller cancels.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Fail with [`MediatorError::Cancelled`] if the caller has cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(MediatorError::cancelled(self.message_type));
        }
        Ok(())
    }
}

/// An erased message together with its dispatch context.
#[derive(Clone)]
pub struct Envelope {
    message: AnyMessage,
    context: DispatchContext,
}

impl Envelope {
    pub fn new(message: AnyMessage, context: DispatchContext) -> Self {
        Self { message, context }
    }

    /// The erased message.
    #[inline]
    pub fn message(&self) -> &AnyMessage {
        &self.message
    }

    #[inline]
    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Borrow the message as `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.message.downcast_ref::<T>()
    }

    /// Shared handle to the message as `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        Arc::clone(&self.message)
            .downcast::<T>()
            .map_err(|_| MediatorError::MessageMismatch {
                expected: std::any::type_name::<T>(),
                actual: self.context.message_type().name(),
            })
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("message_type", &self.context.message_type())
            .field("call_id", &self.context.call_id())
            .finish()
    }
}
