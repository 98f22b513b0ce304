//! Pipeline module - behaviors wrapped around request handlers.
//!
//! Provides:
//! - [`PipelineComposer`] - registers behaviors and composes them per call
//! - [`PipelineBehavior`] / [`OpenBehavior`] - typed and erased behavior traits
//! - [`Next`] / [`Continuation`] - the rest of the pipeline
//! - [`behaviors`] - logging, retry, validation and caching
//!
//! # Example
//!
//! ```ignore
//! use source_mediator::pipeline::{Next, PipelineBehavior};
//!
//! struct Audit;
//!
//! impl PipelineBehavior<CreateColor> for Audit {
//!     async fn handle(&self, cmd: &CreateColor, next: Next<()>, _ctx: &DispatchContext) -> Result<()> {
//!         tracing::info!(name = %cmd.name, "creating color");
//!         next.run().await
//!     }
//! }
//!
//! composer.behavior_with::<CreateColor, Audit, _>(0, || Audit);
//! ```

mod behavior;
pub mod behaviors;
mod composer;
mod next;

pub use behavior::{
    Behavior, BehaviorBinding, BehaviorFn, Matcher, OpenAdapter, OpenBehavior, PipelineBehavior,
    TypedBehavior,
};
pub use composer::PipelineComposer;
pub use next::{Continuation, Next};
