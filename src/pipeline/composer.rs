//! Ordered composition of behaviors around the dispatcher.

use std::future::Future;
use std::sync::Arc;

use super::behavior::{
    BehaviorBinding, BehaviorFn, Matcher, OpenAdapter, OpenBehavior, PipelineBehavior,
    TypedBehavior,
};
use super::next::{Chain, Continuation};
use super::Next;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::handler::{DispatchContext, Envelope};
use crate::message::{AnyValue, Request};
use crate::resolver::{InstanceSource, Resolver};

/// Holds registered behaviors and wraps dispatches with the applicable ones.
///
/// Behaviors with lower `order` run first on the way in and last on the way
/// out. Equal orders keep registration order.
#[derive(Default)]
pub struct PipelineComposer {
    bindings: Vec<Arc<BehaviorBinding>>,
}

impl PipelineComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an erased behavior.
    pub fn register(&mut self, binding: BehaviorBinding) {
        tracing::debug!(
            behavior = binding.name,
            order = binding.order,
            "Registered pipeline behavior"
        );
        self.bindings.push(Arc::new(binding));
    }

    /// Add `B` for request `R`, resolved on every call.
    pub fn behavior<R, B>(&mut self, order: i32)
    where
        R: Request,
        B: PipelineBehavior<R>,
    {
        self.behavior_source::<R, B>(order, InstanceSource::Resolve);
    }

    /// Add `B` for request `R`, built by `factory` on every call.
    pub fn behavior_with<R, B, F>(&mut self, order: i32, factory: F)
    where
        R: Request,
        B: PipelineBehavior<R>,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.behavior_source::<R, B>(order, InstanceSource::factory(factory));
    }

    fn behavior_source<R, B>(&mut self, order: i32, source: InstanceSource<B>)
    where
        R: Request,
        B: PipelineBehavior<R>,
    {
        self.register(BehaviorBinding::new(
            order,
            std::any::type_name::<B>(),
            Matcher::pair::<R>(),
            Box::new(TypedBehavior::<R, B>::new(source)),
        ));
    }

    /// Add a closure behavior for request `R`.
    pub fn behavior_fn<R, F, Fut>(&mut self, order: i32, behavior: F)
    where
        R: Request,
        F: Fn(Arc<R>, Next<R::Response>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response>> + Send + 'static,
    {
        self.register(BehaviorBinding::new(
            order,
            std::any::type_name::<F>(),
            Matcher::pair::<R>(),
            Box::new(BehaviorFn::new(behavior)),
        ));
    }

    /// Add open behavior `B` for every call `matcher` accepts, resolved on
    /// every call.
    pub fn open_behavior<B: OpenBehavior>(&mut self, order: i32, matcher: Matcher) {
        self.open_behavior_source::<B>(order, matcher, InstanceSource::Resolve);
    }

    /// Add open behavior `B` built by `factory` on every call.
    pub fn open_behavior_with<B, F>(&mut self, order: i32, matcher: Matcher, factory: F)
    where
        B: OpenBehavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.open_behavior_source::<B>(order, matcher, InstanceSource::factory(factory));
    }

    fn open_behavior_source<B: OpenBehavior>(
        &mut self,
        order: i32,
        matcher: Matcher,
        source: InstanceSource<B>,
    ) {
        self.register(BehaviorBinding::new(
            order,
            std::any::type_name::<B>(),
            matcher,
            Box::new(OpenAdapter::new(source)),
        ));
    }

    /// Behaviors applicable to a call, outermost first.
    pub fn compose(&self, ctx: &DispatchContext) -> Vec<Arc<BehaviorBinding>> {
        let mut applicable: Vec<_> = self
            .bindings
            .iter()
            .filter(|b| b.matcher.matches(ctx))
            .cloned()
            .collect();
        applicable.sort_by_key(|b| (b.order, b.sequence));
        applicable
    }

    /// Run the composed pipeline for one envelope.
    pub async fn execute(
        &self,
        dispatcher: &Dispatcher,
        resolver: Arc<dyn Resolver>,
        envelope: Envelope,
    ) -> Result<AnyValue> {
        let behaviors = self.compose(envelope.context());
        if !behaviors.is_empty() {
            tracing::trace!(
                target: "source_mediator::dispatch",
                call_id = envelope.context().call_id(),
                behaviors = behaviors.len(),
                "Composed pipeline"
            );
        }

        Continuation::start(Chain {
            behaviors,
            dispatcher: dispatcher.clone(),
            resolver,
            envelope,
        })
        .run()
        .await
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for PipelineComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.bindings.iter()).finish()
    }
}
