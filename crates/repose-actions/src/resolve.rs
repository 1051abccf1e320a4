//! Dependency lookup for handler parameters.
//!
//! The dispatcher never constructs dependencies itself; it asks a
//! [`Resolver`] by type. [`Services`] is a small map-backed resolver that is
//! enough for tests and simple hosts.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use repose_state::Store;

pub type Shared = Arc<dyn Any + Send + Sync>;

pub trait Resolver: Send + Sync {
    /// The value registered for `ty`. The returned `Arc` must hold a `ty`.
    fn resolve(&self, ty: TypeId) -> Option<Shared>;

    fn contains(&self, ty: TypeId) -> bool {
        self.resolve(ty).is_some()
    }
}

impl<F> Resolver for F
where
    F: Fn(TypeId) -> Option<Shared> + Send + Sync,
{
    fn resolve(&self, ty: TypeId) -> Option<Shared> {
        self(ty)
    }
}

/// Typed lookup on top of [`Resolver::resolve`].
pub fn resolve_as<T: Any + Send + Sync>(resolver: &dyn Resolver) -> Option<Arc<T>> {
    resolver.resolve(TypeId::of::<T>())?.downcast::<T>().ok()
}

#[derive(Clone)]
enum Service {
    Instance(Shared),
    Factory(Arc<dyn Fn() -> Shared + Send + Sync>),
}

/// Map from type to a shared instance or a factory.
#[derive(Default)]
pub struct Services {
    entries: RwLock<HashMap<TypeId, Service>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single shared instance of `T`.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> &Self {
        self.entries
            .write()
            .insert(TypeId::of::<T>(), Service::Instance(Arc::new(value)));
        self
    }

    /// Registers a store so handlers can take `Store<S>` parameters.
    pub fn insert_store<S>(&self, store: Store<S>) -> &Self
    where
        S: Clone + Send + Sync + 'static,
    {
        self.insert(store)
    }

    /// Registers a factory; every resolution gets a fresh `T`.
    pub fn factory<T: Any + Send + Sync>(&self, make: impl Fn() -> T + Send + Sync + 'static) -> &Self {
        let make: Arc<dyn Fn() -> Shared + Send + Sync> = Arc::new(move || Arc::new(make()) as Shared);
        self.entries
            .write()
            .insert(TypeId::of::<T>(), Service::Factory(make));
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        resolve_as::<T>(self)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Resolver for Services {
    fn resolve(&self, ty: TypeId) -> Option<Shared> {
        let service = self.entries.read().get(&ty).cloned()?;
        Some(match service {
            Service::Instance(v) => v,
            Service::Factory(make) => make(),
        })
    }

    fn contains(&self, ty: TypeId) -> bool {
        self.entries.read().contains_key(&ty)
    }
}
