//! Handler module - handler traits, registration and per-call context.
//!
//! Provides:
//! - [`CommandHandler`], [`RequestHandler`], [`NotificationHandler`] - typed handler traits
//! - [`HandlerRegistry`] - maps message types to erased handlers
//! - [`DispatchContext`] - call id, type keys and cancellation for one call
//!
//! # Example
//!
//! ```ignore
//! use source_mediator::handler::{DispatchContext, RequestHandler};
//! use source_mediator::HandlerResult;
//!
//! struct GetColorHandler { repo: Arc<ColorRepo> }
//!
//! impl RequestHandler<GetColor> for GetColorHandler {
//!     async fn handle(&self, q: &GetColor, _ctx: &DispatchContext) -> HandlerResult<Option<Color>> {
//!         Ok(self.repo.find(q.id).await?)
//!     }
//! }
//! ```

mod context;
mod invoke;
mod registry;
mod traits;

pub use context::{DispatchContext, Envelope};
pub use invoke::{
    BoxFuture, CommandFn, CommandThunk, Handler, NotificationFn, NotificationInvoker,
    NotificationThunk, RequestFn, RequestThunk,
};
pub use registry::{HandlerRegistry, NotificationBinding, RequestBinding};
pub use traits::{CommandHandler, NotificationHandler, RequestHandler};
