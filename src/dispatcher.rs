//! Terminal step of the pipeline: route one message to its handler.

use std::any::Any;
use std::sync::Arc;

use crate::error::{MediatorError, Result};
use crate::handler::{Envelope, HandlerRegistry};
use crate::message::{AnyValue, TypeKey};
use crate::resolver::Resolver;

/// Looks up and invokes the single handler bound to a message type.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher reads from.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Invoke the handler for the envelope's message.
    ///
    /// The binding is selected by the message's concrete runtime type and
    /// must produce the response type recorded in the envelope's context.
    /// A command binding satisfies a send that expects [`Unit`](crate::Unit),
    /// and a request binding whose response is `Unit` satisfies a command
    /// send, since both share one table.
    pub async fn dispatch(&self, envelope: &Envelope, resolver: &dyn Resolver) -> Result<AnyValue> {
        let ctx = envelope.context();
        let message = ctx.message_type();
        let expected = ctx.response_type().unwrap_or_else(TypeKey::of::<()>);

        let binding = match self.registry.lookup((**envelope.message()).type_id()) {
            Some(b) if b.response == expected => b,
            Some(b) => {
                tracing::debug!(
                    target: "source_mediator::dispatch",
                    message = message.name(),
                    bound = b.response.name(),
                    expected = expected.name(),
                    "Binding produces a different response type"
                );
                return Err(no_handler(message, expected));
            }
            None => return Err(no_handler(message, expected)),
        };

        ctx.check_cancelled()?;

        tracing::trace!(
            target: "source_mediator::dispatch",
            call_id = ctx.call_id(),
            message = message.name(),
            handler = binding.handler_name,
            "Dispatching"
        );

        let produced = binding.handler.call(resolver, envelope).await?;
        finish(message, expected, produced)
    }
}

fn no_handler(message: TypeKey, expected: TypeKey) -> MediatorError {
    MediatorError::NoHandler {
        message_type: message.name(),
        response_type: (!expected.is_unit()).then(|| expected.name()),
    }
}

/// Check the handler output against the expected response type.
fn finish(message: TypeKey, expected: TypeKey, produced: Option<AnyValue>) -> Result<AnyValue> {
    let invalid = || MediatorError::InvalidResult {
        message_type: message.name(),
        response_type: expected.name(),
    };

    match produced {
        None if expected.is_unit() => Ok(Box::new(())),
        None => Err(invalid()),
        Some(value) if (*value).type_id() == expected.id() => Ok(value),
        Some(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use crate::handler::{DispatchContext, RequestBinding};
    use crate::handler::{BoxFuture, Handler};
    use crate::message::{Command, Query, Request};
    use crate::resolver::EmptyResolver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Archive;
    impl Request for Archive {
        type Response = ();
    }
    impl Command for Archive {}

    struct Total;
    impl Request for Total {
        type Response = u64;
    }
    impl Query for Total {}

    /// Returns a value of the wrong type.
    struct Liar;
    impl Handler for Liar {
        fn call(
            &self,
            _resolver: &dyn Resolver,
            _envelope: &Envelope,
        ) -> BoxFuture<'static, Result<Option<AnyValue>>> {
            Box::pin(async { Ok(Some(Box::new("nope") as AnyValue)) })
        }
    }

    fn envelope<R: Request>(msg: R, token: CancellationToken) -> Envelope {
        Envelope::new(Arc::new(msg), DispatchContext::for_request::<R>(token))
    }

    #[tokio::test]
    async fn test_command_returns_unit() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command_fn(|_c: Arc<Archive>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let value = dispatcher
            .dispatch(&envelope(Archive, CancellationToken::new()), &EmptyResolver)
            .await
            .unwrap();
        assert!(value.downcast::<()>().is_ok());
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::new()));
        let err = dispatcher
            .dispatch(&envelope(Total, CancellationToken::new()), &EmptyResolver)
            .await
            .err()
            .unwrap();
        match err {
            MediatorError::NoHandler { message_type, response_type } => {
                assert!(message_type.ends_with("Total"));
                assert_eq!(response_type, Some("u64"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_value_type_is_invalid_result() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(RequestBinding::request::<Total>("Liar", Box::new(Liar)))
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let err = dispatcher
            .dispatch(&envelope(Total, CancellationToken::new()), &EmptyResolver)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MediatorError::InvalidResult { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut registry = HandlerRegistry::new();
        registry
            .register_request_fn(move |_q: Arc<Total>, _ctx| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { HandlerResult::Ok(0u64) }
            })
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let token = CancellationToken::new();
        token.cancel();
        let err = dispatcher
            .dispatch(&envelope(Total, token), &EmptyResolver)
            .await
            .err()
            .unwrap();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finish_rejects_missing_value() {
        let err = finish(TypeKey::of::<Total>(), TypeKey::of::<u64>(), None).unwrap_err();
        assert!(matches!(err, MediatorError::InvalidResult { .. }));
        assert!(finish(TypeKey::of::<Archive>(), TypeKey::of::<()>(), None).is_ok());
    }
}
