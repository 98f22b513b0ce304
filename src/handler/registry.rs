//! Handler registry keyed by concrete message type.
//!
//! Commands and requests share one table: each message type has at most one
//! binding, whatever its response type. Notifications map to an ordered list
//! of handlers. The registry is filled at startup and read-only afterwards.
//!
//! # Example
//!
//! ```ignore
//! use source_mediator::handler::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register_command::<CreateColor, CreateColorHandler>()?;
//! registry.register_request_fn(|q: Arc<GetColor>, _ctx| async move {
//!     Ok(lookup(q.id))
//! })?;
//! registry.register_notification::<ColorCreated, AuditLog>();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::invoke::{
    CommandFn, CommandThunk, Handler, NotificationFn, NotificationInvoker, NotificationThunk,
    RequestFn, RequestThunk,
};
use super::{CommandHandler, DispatchContext, NotificationHandler, RequestHandler};
use crate::error::{HandlerResult, MediatorError, Result};
use crate::message::{Command, Notification, Request, TypeKey};
use crate::resolver::InstanceSource;

/// A command or request binding.
pub struct RequestBinding {
    /// Message type served.
    pub message: TypeKey,
    /// Response type produced; [`Unit`](crate::Unit) for commands.
    pub response: TypeKey,
    /// Name used in logs and configuration errors.
    pub handler_name: &'static str,
    /// The erased handler.
    pub handler: Box<dyn Handler>,
}

impl RequestBinding {
    /// Binding for command `C`.
    pub fn command<C: Command>(handler_name: &'static str, handler: Box<dyn Handler>) -> Self {
        Self::request::<C>(handler_name, handler)
    }

    /// Binding for request `R`.
    pub fn request<R: Request>(handler_name: &'static str, handler: Box<dyn Handler>) -> Self {
        Self {
            message: TypeKey::of::<R>(),
            response: TypeKey::of::<R::Response>(),
            handler_name,
            handler,
        }
    }
}

/// One handler for a notification type.
pub struct NotificationBinding {
    pub notification: TypeKey,
    pub handler_name: &'static str,
    pub invoker: Box<dyn NotificationInvoker>,
}

impl NotificationBinding {
    pub fn new<N: Notification>(
        handler_name: &'static str,
        invoker: Box<dyn NotificationInvoker>,
    ) -> Self {
        Self {
            notification: TypeKey::of::<N>(),
            handler_name,
            invoker,
        }
    }
}

/// Registry mapping message types to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    /// Command and request bindings by message type.
    requests: HashMap<TypeId, RequestBinding>,
    /// Notification handlers by notification type, in registration order.
    notifications: HashMap<TypeId, Vec<NotificationBinding>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command or request binding.
    ///
    /// Fails with [`MediatorError::Configuration`] if the message type is
    /// already bound, regardless of the response type.
    pub fn register(&mut self, binding: RequestBinding) -> Result<()> {
        if let Some(existing) = self.requests.get(&binding.message.id()) {
            return Err(MediatorError::Configuration {
                message_type: binding.message.name(),
                handler: binding.handler_name,
                existing: existing.handler_name,
            });
        }

        tracing::debug!(
            message = binding.message.name(),
            response = binding.response.name(),
            handler = binding.handler_name,
            "Registered handler"
        );
        self.requests.insert(binding.message.id(), binding);
        Ok(())
    }

    /// Register `H` for command `C`, resolved on every dispatch.
    pub fn register_command<C, H>(&mut self) -> Result<()>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        self.register_command_source::<C, H>(InstanceSource::Resolve)
    }

    /// Register `H` for command `C` with an explicit instance source.
    pub fn register_command_source<C, H>(&mut self, source: InstanceSource<H>) -> Result<()>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let thunk = CommandThunk::<C, H>::new(source);
        self.register(RequestBinding::command::<C>(
            std::any::type_name::<H>(),
            Box::new(thunk),
        ))
    }

    /// Register a closure for command `C`.
    pub fn register_command_fn<C, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        C: Command,
        F: Fn(Arc<C>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(RequestBinding::command::<C>(
            std::any::type_name::<F>(),
            Box::new(CommandFn::new(handler)),
        ))
    }

    /// Register `H` for request `R`, resolved on every dispatch.
    pub fn register_request<R, H>(&mut self) -> Result<()>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.register_request_source::<R, H>(InstanceSource::Resolve)
    }

    /// Register `H` for request `R` with an explicit instance source.
    pub fn register_request_source<R, H>(&mut self, source: InstanceSource<H>) -> Result<()>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let thunk = RequestThunk::<R, H>::new(source);
        self.register(RequestBinding::request::<R>(
            std::any::type_name::<H>(),
            Box::new(thunk),
        ))
    }

    /// Register a closure for request `R`.
    pub fn register_request_fn<R, F, Fut>(&mut self, handler: F) -> Result<()>
    where
        R: Request,
        F: Fn(Arc<R>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R::Response>> + Send + 'static,
    {
        self.register(RequestBinding::request::<R>(
            std::any::type_name::<F>(),
            Box::new(RequestFn::new(handler)),
        ))
    }

    /// Append a notification binding. Never fails.
    pub fn register_notification_binding(&mut self, binding: NotificationBinding) {
        tracing::debug!(
            notification = binding.notification.name(),
            handler = binding.handler_name,
            "Registered notification handler"
        );
        self.notifications
            .entry(binding.notification.id())
            .or_default()
            .push(binding);
    }

    /// Append `H` as a handler of notification `N`, resolved on every publish.
    pub fn register_notification<N, H>(&mut self)
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        self.register_notification_source::<N, H>(InstanceSource::Resolve);
    }

    /// Append `H` as a handler of `N` with an explicit instance source.
    pub fn register_notification_source<N, H>(&mut self, source: InstanceSource<H>)
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        let thunk = NotificationThunk::<N, H>::new(source);
        self.register_notification_binding(NotificationBinding::new::<N>(
            std::any::type_name::<H>(),
            Box::new(thunk),
        ));
    }

    /// Append a closure as a handler of notification `N`.
    pub fn register_notification_fn<N, F, Fut>(&mut self, handler: F)
    where
        N: Notification,
        F: Fn(Arc<N>, DispatchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_notification_binding(NotificationBinding::new::<N>(
            std::any::type_name::<F>(),
            Box::new(NotificationFn::new(handler)),
        ));
    }

    /// Get the binding for a concrete message type.
    pub fn lookup(&self, message: TypeId) -> Option<&RequestBinding> {
        self.requests.get(&message)
    }

    /// Handlers for a concrete notification type, in registration order.
    pub fn notification_handlers(&self, notification: TypeId) -> &[NotificationBinding] {
        self.notifications
            .get(&notification)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns `true` if message type `M` has a command or request binding.
    pub fn contains<M: 'static>(&self) -> bool {
        self.requests.contains_key(&TypeId::of::<M>())
    }

    /// Number of notification handlers registered for `N`.
    pub fn notification_handler_count<N: Notification>(&self) -> usize {
        self.notification_handlers(TypeId::of::<N>()).len()
    }

    /// Number of command and request bindings.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns `true` if no command, request or notification handler exists.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.notifications.is_empty()
    }

    /// Bound message types, sorted by name.
    pub fn request_types(&self) -> Vec<TypeKey> {
        let mut keys: Vec<TypeKey> = self.requests.values().map(|b| b.message).collect();
        keys.sort_by_key(|k| k.name());
        keys
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("requests", &self.requests.len())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Query;

    struct Rename;
    impl Request for Rename {
        type Response = ();
    }
    impl Command for Rename {}

    struct Count;
    impl Request for Count {
        type Response = usize;
    }
    impl Query for Count {}

    struct Renamed;
    impl Notification for Renamed {}

    #[test]
    fn test_new_registry_is_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.lookup(TypeId::of::<Rename>()).is_none());
        assert!(registry.notification_handlers(TypeId::of::<Renamed>()).is_empty());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command_fn(|_c: Arc<Rename>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap();
        registry
            .register_request_fn(|_q: Arc<Count>, _ctx| async { HandlerResult::Ok(3usize) })
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains::<Rename>());

        let binding = registry.lookup(TypeId::of::<Count>()).unwrap();
        assert_eq!(binding.response, TypeKey::of::<usize>());

        let binding = registry.lookup(TypeId::of::<Rename>()).unwrap();
        assert!(binding.response.is_unit());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command_fn(|_c: Arc<Rename>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap();

        let err = registry
            .register_command_fn(|_c: Arc<Rename>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap_err();
        match err {
            MediatorError::Configuration { message_type, .. } => {
                assert!(message_type.ends_with("Rename"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_notification_handlers_keep_order() {
        let mut registry = HandlerRegistry::new();
        for _ in 0..3 {
            registry.register_notification_fn(|_n: Arc<Renamed>, _ctx| async { HandlerResult::Ok(()) });
        }

        assert_eq!(registry.notification_handler_count::<Renamed>(), 3);
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_request_types_sorted() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_request_fn(|_q: Arc<Count>, _ctx| async { HandlerResult::Ok(0usize) })
            .unwrap();
        registry
            .register_command_fn(|_c: Arc<Rename>, _ctx| async { HandlerResult::Ok(()) })
            .unwrap();

        let names: Vec<_> = registry.request_types().iter().map(|k| k.name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
