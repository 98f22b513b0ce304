//! # source-mediator
//!
//! In-process mediator for Rust services.
//!
//! Callers send commands and queries to exactly one handler and publish
//! notifications to any number of handlers, without knowing who handles
//! them. Cross-cutting concerns run as ordered pipeline behaviors around
//! every request.
//!
//! ## Architecture
//!
//! - **HandlerRegistry**: message type to handler bindings, immutable after startup
//! - **Dispatcher**: runs the one handler bound to a request's runtime type
//! - **PipelineComposer**: nests matching behaviors around the dispatcher by order
//! - **NotificationPublisher**: concurrent fan-out with aggregated failures
//!
//! ## Example
//!
//! ```ignore
//! use source_mediator::{Mediator, Query, Request, EmptyResolver};
//!
//! struct GetGreeting { name: String }
//! impl Request for GetGreeting { type Response = String; }
//! impl Query for GetGreeting {}
//!
//! #[tokio::main]
//! async fn main() {
//!     let mediator = Mediator::builder()
//!         .request_fn(|q: Arc<GetGreeting>, _ctx| async move {
//!             Ok(format!("hello, {}", q.name))
//!         })
//!         .unwrap()
//!         .with_logging(0)
//!         .build(Arc::new(EmptyResolver));
//!
//!     let greeting = mediator.send_query(GetGreeting { name: "ada".into() }).await.unwrap();
//!     assert_eq!(greeting, "hello, ada");
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod pipeline;
pub mod resolver;
pub mod services;

mod dispatcher;
mod mediator;
mod publisher;

pub use config::MediatorConfig;
pub use dispatcher::Dispatcher;
pub use error::{
    AggregateNotificationError, BoxError, HandlerResult, MediatorError, NotificationFailure,
    Result,
};
pub use handler::{
    CommandHandler, DispatchContext, HandlerRegistry, NotificationHandler, RequestHandler,
};
pub use mediator::{Mediator, MediatorBuilder};
pub use message::{Command, Notification, Query, Request, TypeKey, Unit};
pub use pipeline::{Matcher, Next, PipelineBehavior, PipelineComposer};
pub use publisher::{HandlerPanic, NotificationPublisher};
pub use resolver::{EmptyResolver, Resolver, ResolverExt};
pub use services::{ServiceCollection, ServiceProvider, ServiceScope};

pub use tokio_util::sync::CancellationToken;
