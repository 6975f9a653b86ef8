//! Lookup of domain objects by identifier.
//!
//! Commands and listeners that act on domain objects (an inventory, a shop)
//! resolve them through [`ObjectLookup`] instead of holding them directly. The
//! host decides where objects live; [`ObjectRegistry`] is the in-memory
//! implementation.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A type-erased domain object.
pub type Object = Arc<dyn Any + Send + Sync>;

/// Resolve objects by identifier.
pub trait ObjectLookup: Send + Sync {
    fn get_by_identifier(&self, id: Uuid) -> Option<Object>;

    /// Every object known to the lookup, in no particular order.
    fn all(&self) -> Vec<Object>;
}

/// Typed helpers over any [`ObjectLookup`].
pub trait ObjectLookupExt: ObjectLookup {
    /// The object with `id`, if it exists and is a `T`.
    fn get<T: Any + Send + Sync>(&self, id: Uuid) -> Option<Arc<T>> {
        self.get_by_identifier(id)?.downcast::<T>().ok()
    }

    /// Every object that is a `T`.
    fn all_of_type<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.all()
            .into_iter()
            .filter_map(|object| object.downcast::<T>().ok())
            .collect()
    }
}

impl<L: ObjectLookup + ?Sized> ObjectLookupExt for L {}

/// Concurrent in-memory [`ObjectLookup`]. Clones share the same objects.
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    objects: Arc<DashMap<Uuid, Object>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under a fresh identifier.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Uuid {
        let id = Uuid::new_v4();
        self.objects.insert(id, Arc::new(value));
        id
    }

    /// Store an already shared object under `id`, returning what was there.
    pub fn register(&self, id: Uuid, object: Object) -> Option<Object> {
        self.objects.insert(id, object)
    }

    pub fn remove(&self, id: Uuid) -> Option<Object> {
        self.objects.remove(&id).map(|(_, object)| object)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ObjectLookup for ObjectRegistry {
    fn get_by_identifier(&self, id: Uuid) -> Option<Object> {
        self.objects.get(&id).map(|entry| entry.value().clone())
    }

    fn all(&self) -> Vec<Object> {
        self.objects
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("objects", &self.objects.len())
            .finish()
    }
}
