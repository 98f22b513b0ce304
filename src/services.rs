//! A small service container implementing [`Resolver`].
//!
//! Services are registered with a lifetime:
//! - singleton: created once per provider, on first use
//! - scoped: created once per [`ServiceScope`]
//! - transient: created on every resolve
//!
//! Factories receive the resolver they are called from, so services can
//! depend on each other.
//!
//! # Example
//!
//! ```ignore
//! let provider = ServiceCollection::new()
//!     .add_singleton(ColorRepo::default())
//!     .add_transient(|r| Ok(CreateColorHandler { repo: r.resolve::<ColorRepo>()? }))
//!     .build();
//!
//! let scope = provider.create_scope();
//! let handler = scope.resolve::<CreateColorHandler>()?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{MediatorError, Result};
use crate::message::TypeKey;
use crate::resolver::Resolver;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&dyn Resolver) -> Result<Instance> + Send + Sync>;

/// How long a resolved instance is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Singleton,
    Scoped,
    Transient,
}

struct Registration {
    lifetime: Lifetime,
    type_name: &'static str,
    factory: Factory,
    singleton: Mutex<Option<Instance>>,
}

impl Registration {
    fn new(lifetime: Lifetime, type_name: &'static str, factory: Factory) -> Self {
        Self {
            lifetime,
            type_name,
            factory,
            singleton: Mutex::new(None),
        }
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |resolver: &dyn Resolver| -> Result<Instance> {
        factory(resolver).map(|value| Arc::new(value) as Instance)
    })
}

/// Service registrations, turned into a [`ServiceProvider`] by `build`.
///
/// Registering the same type again replaces the earlier registration.
#[derive(Default)]
pub struct ServiceCollection {
    services: HashMap<TypeId, Registration>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, key: TypeKey, registration: Registration) -> Self {
        self.services.insert(key.id(), registration);
        self
    }

    /// Register an existing instance as a singleton.
    pub fn add_singleton<T: Send + Sync + 'static>(self, value: T) -> Self {
        let instance: Instance = Arc::new(value);
        let registration = Registration {
            lifetime: Lifetime::Singleton,
            type_name: std::any::type_name::<T>(),
            factory: Arc::new({
                let instance = Arc::clone(&instance);
                move |_: &dyn Resolver| -> Result<Instance> { Ok(Arc::clone(&instance)) }
            }),
            singleton: Mutex::new(Some(instance)),
        };
        self.add(TypeKey::of::<T>(), registration)
    }

    /// Register a singleton created lazily by `factory`.
    pub fn add_singleton_with<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
    {
        let registration =
            Registration::new(Lifetime::Singleton, std::any::type_name::<T>(), erase(factory));
        self.add(TypeKey::of::<T>(), registration)
    }

    /// Register a service created once per scope.
    pub fn add_scoped<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
    {
        let registration =
            Registration::new(Lifetime::Scoped, std::any::type_name::<T>(), erase(factory));
        self.add(TypeKey::of::<T>(), registration)
    }

    /// Register a service created on every resolve.
    pub fn add_transient<T, F>(self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
    {
        let registration =
            Registration::new(Lifetime::Transient, std::any::type_name::<T>(), erase(factory));
        self.add(TypeKey::of::<T>(), registration)
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            inner: Arc::new(ProviderInner {
                services: self.services,
            }),
        }
    }
}

struct ProviderInner {
    services: HashMap<TypeId, Registration>,
}

/// Root resolver built from a [`ServiceCollection`].
///
/// Cloning is cheap and clones share singletons.
#[derive(Clone)]
pub struct ServiceProvider {
    inner: Arc<ProviderInner>,
}

impl ServiceProvider {
    /// Start a scope; scoped services live as long as the scope.
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            provider: self.clone(),
            scoped: Mutex::new(HashMap::new()),
        }
    }

    /// Lifetime registered for `T`, if any.
    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.inner
            .services
            .get(&TypeId::of::<T>())
            .map(|r| r.lifetime)
    }

    fn registration(&self, key: TypeKey) -> Result<&Registration> {
        self.inner
            .services
            .get(&key.id())
            .ok_or(MediatorError::Unresolved {
                type_name: key.name(),
            })
    }

    fn singleton(&self, registration: &Registration) -> Result<Instance> {
        if let Some(instance) = lock(&registration.singleton).as_ref() {
            return Ok(Arc::clone(instance));
        }

        // Created outside the lock so factories may resolve other singletons.
        let created = (registration.factory)(self as &dyn Resolver)?;
        let mut slot = lock(&registration.singleton);
        Ok(Arc::clone(slot.get_or_insert(created)))
    }
}

impl Resolver for ServiceProvider {
    fn resolve_any(&self, key: TypeKey) -> Result<Instance> {
        let registration = self.registration(key)?;
        match registration.lifetime {
            Lifetime::Singleton => self.singleton(registration),
            Lifetime::Transient => (registration.factory)(self as &dyn Resolver),
            Lifetime::Scoped => {
                tracing::debug!(
                    service = registration.type_name,
                    "Scoped service resolved outside a scope"
                );
                Err(MediatorError::Unresolved {
                    type_name: registration.type_name,
                })
            }
        }
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.inner.services.len())
            .finish()
    }
}

/// Resolver holding one instance of each scoped service.
pub struct ServiceScope {
    provider: ServiceProvider,
    scoped: Mutex<HashMap<TypeId, Instance>>,
}

impl ServiceScope {
    /// The provider this scope was created from.
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }
}

impl Resolver for ServiceScope {
    fn resolve_any(&self, key: TypeKey) -> Result<Instance> {
        let registration = self.provider.registration(key)?;
        match registration.lifetime {
            Lifetime::Singleton => self.provider.singleton(registration),
            Lifetime::Transient => (registration.factory)(self as &dyn Resolver),
            Lifetime::Scoped => {
                if let Some(instance) = lock(&self.scoped).get(&key.id()) {
                    return Ok(Arc::clone(instance));
                }
                let created = (registration.factory)(self as &dyn Resolver)?;
                let mut scoped = lock(&self.scoped);
                Ok(Arc::clone(scoped.entry(key.id()).or_insert(created)))
            }
        }
    }
}

impl std::fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceScope")
            .field("scoped", &lock(&self.scoped).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Repo {
        id: usize,
    }

    struct Handler {
        repo: Arc<Repo>,
    }

    struct UnitOfWork;

    #[test]
    fn test_singleton_is_shared() {
        let provider = ServiceCollection::new().add_singleton(Repo { id: 9 }).build();
        let a = provider.resolve::<Repo>().unwrap();
        let b = provider.create_scope().resolve::<Repo>().unwrap();
        assert_eq!(a.id, 9);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lazy_singleton_created_once() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let provider = ServiceCollection::new()
            .add_singleton_with(move |_| {
                Ok(Repo {
                    id: counter.fetch_add(1, Ordering::SeqCst),
                })
            })
            .build();

        assert_eq!(created.load(Ordering::SeqCst), 0);
        let a = provider.resolve::<Repo>().unwrap();
        let b = provider.resolve::<Repo>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_with_dependency() {
        let provider = ServiceCollection::new()
            .add_singleton(Repo { id: 1 })
            .add_transient(|r| {
                Ok(Handler {
                    repo: r.resolve::<Repo>()?,
                })
            })
            .build();

        let a = provider.resolve::<Handler>().unwrap();
        let b = provider.resolve::<Handler>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a.repo, &b.repo));
    }

    #[test]
    fn test_scoped_per_scope() {
        let provider = ServiceCollection::new()
            .add_scoped(|_| Ok(UnitOfWork))
            .build();

        let first = provider.create_scope();
        let second = provider.create_scope();
        let a = first.resolve::<UnitOfWork>().unwrap();
        let b = first.resolve::<UnitOfWork>().unwrap();
        let c = second.resolve::<UnitOfWork>().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(provider.lifetime_of::<UnitOfWork>(), Some(Lifetime::Scoped));
    }

    #[test]
    fn test_scoped_from_root_fails() {
        let provider = ServiceCollection::new()
            .add_scoped(|_| Ok(UnitOfWork))
            .build();
        assert!(matches!(
            provider.resolve::<UnitOfWork>(),
            Err(MediatorError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_unknown_service() {
        let provider = ServiceCollection::new().build();
        assert!(provider.resolve::<Repo>().is_err());
        assert!(provider.lifetime_of::<Repo>().is_none());
    }

    #[test]
    fn test_factory_error_propagates() {
        let provider = ServiceCollection::new()
            .add_transient::<Repo, _>(|_| Err(MediatorError::Config("no database".into())))
            .build();
        assert!(matches!(provider.resolve::<Repo>(), Err(MediatorError::Config(_))));
    }
}
