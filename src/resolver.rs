//! Instance resolution for handlers and behaviors.
//!
//! The mediator never constructs handlers itself when they are registered by
//! type; it asks a [`Resolver`] for them at dispatch time. A resolver is
//! usually a [`ServiceProvider`](crate::services::ServiceProvider) or one of
//! its scopes, but any type can implement it.

use std::any::Any;
use std::sync::Arc;

use crate::error::{MediatorError, Result};
use crate::message::TypeKey;

/// Supplies instances by type key.
pub trait Resolver: Send + Sync {
    /// Resolve an instance whose concrete type matches `key`.
    fn resolve_any(&self, key: TypeKey) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Typed convenience over [`Resolver`].
pub trait ResolverExt {
    /// Resolve an instance of `T`.
    fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>>;
}

impl<R: Resolver + ?Sized> ResolverExt for R {
    fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = self.resolve_any(key)?;
        instance
            .downcast::<T>()
            .map_err(|_| MediatorError::Unresolved {
                type_name: key.name(),
            })
    }
}

/// Resolver that knows no types.
///
/// Suitable when every handler and behavior is registered as a closure or
/// with a factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyResolver;

impl Resolver for EmptyResolver {
    fn resolve_any(&self, key: TypeKey) -> Result<Arc<dyn Any + Send + Sync>> {
        Err(MediatorError::Unresolved {
            type_name: key.name(),
        })
    }
}

/// Where a registered handler or behavior instance comes from.
pub enum InstanceSource<T> {
    /// Ask the resolver on every call.
    Resolve,
    /// Build a fresh instance on every call.
    Factory(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T> Clone for InstanceSource<T> {
    fn clone(&self) -> Self {
        match self {
            InstanceSource::Resolve => InstanceSource::Resolve,
            InstanceSource::Factory(f) => InstanceSource::Factory(Arc::clone(f)),
        }
    }
}

impl<T: Send + Sync + 'static> InstanceSource<T> {
    /// Source backed by a factory closure.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        InstanceSource::Factory(Arc::new(f))
    }

    /// Obtain an instance for one invocation.
    pub fn obtain(&self, resolver: &dyn Resolver) -> Result<Arc<T>> {
        match self {
            InstanceSource::Resolve => resolver.resolve::<T>(),
            InstanceSource::Factory(f) => Ok(Arc::new(f())),
        }
    }
}
