//! Continuations passed to pipeline behaviors.

use std::marker::PhantomData;
use std::sync::Arc;

use super::BehaviorBinding;
use crate::dispatcher::Dispatcher;
use crate::error::{MediatorError, Result};
use crate::handler::{BoxFuture, DispatchContext, Envelope};
use crate::message::AnyValue;
use crate::resolver::Resolver;

/// Everything needed to run the rest of one composed pipeline.
pub(crate) struct Chain {
    pub(crate) behaviors: Vec<Arc<BehaviorBinding>>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) resolver: Arc<dyn Resolver>,
    pub(crate) envelope: Envelope,
}

/// The remainder of the pipeline after the current behavior.
///
/// Calling [`run`](Continuation::run) invokes the next behavior, or the
/// dispatcher once every behavior has been entered. A continuation can be run
/// more than once; each run re-enters the inner behaviors and the handler.
#[derive(Clone)]
pub struct Continuation {
    chain: Arc<Chain>,
    index: usize,
}

impl Continuation {
    pub(crate) fn start(chain: Chain) -> Self {
        Self {
            chain: Arc::new(chain),
            index: 0,
        }
    }

    /// Run the rest of the pipeline.
    pub fn run(&self) -> BoxFuture<'static, Result<AnyValue>> {
        if let Some(binding) = self.chain.behaviors.get(self.index) {
            let next = Continuation {
                chain: Arc::clone(&self.chain),
                index: self.index + 1,
            };
            return binding
                .behavior
                .invoke(self.chain.resolver.as_ref(), &self.chain.envelope, next);
        }

        let chain = Arc::clone(&self.chain);
        Box::pin(async move {
            chain
                .dispatcher
                .dispatch(&chain.envelope, chain.resolver.as_ref())
                .await
        })
    }

    /// Context of the call this continuation belongs to.
    pub fn context(&self) -> &DispatchContext {
        self.chain.envelope.context()
    }

    /// The message being dispatched.
    pub fn envelope(&self) -> &Envelope {
        &self.chain.envelope
    }

    /// Number of behaviors still to run before the handler.
    pub fn remaining(&self) -> usize {
        self.chain.behaviors.len().saturating_sub(self.index)
    }
}

/// Typed continuation handed to [`PipelineBehavior`](super::PipelineBehavior).
pub struct Next<T> {
    inner: Continuation,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Next<T> {
    pub fn new(inner: Continuation) -> Self {
        Self {
            inner,
            _phantom: PhantomData,
        }
    }

    /// Run the rest of the pipeline and take back the typed response.
    pub async fn run(&self) -> Result<T> {
        let value = self.inner.run().await?;
        let ctx = self.inner.context();
        value
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| MediatorError::InvalidResult {
                message_type: ctx.message_type().name(),
                response_type: std::any::type_name::<T>(),
            })
    }

    pub fn context(&self) -> &DispatchContext {
        self.inner.context()
    }

    /// The untyped continuation.
    pub fn into_inner(self) -> Continuation {
        self.inner
    }
}

impl<T> Clone for Next<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _phantom: PhantomData,
        }
    }
}
