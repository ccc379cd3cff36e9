//! Store registry: one store per key, created on first access.
//!
//! Two stores for the same key would drift apart as soon as a remote update
//! reached only one of them, so the registry is the sole allocator: every
//! lookup for a key returns a handle to the same instance.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use crate::store::{Propagator, Store};

/// Key → store cache.
///
/// Flat stores are keyed by their id; document views by their full path.
pub struct StoreRegistry<S, K = String> {
    stores: RwLock<HashMap<K, S>>,
}

impl<S, K> Default for StoreRegistry<S, K> {
    fn default() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Clone, K: Eq + Hash + Ord + Clone> StoreRegistry<S, K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the store for `key`, building it with `create` if absent.
    ///
    /// `create` runs at most once per key and must not call back into this
    /// registry.
    pub fn get_or_create<Q>(&self, key: &Q, create: impl FnOnce() -> S) -> S
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        // Fast path: read lock
        {
            let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(store) = stores.get(key) {
                return store.clone();
            }
        }

        // Slow path: write lock to create
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.entry(key.to_owned()).or_insert_with(create).clone()
    }

    /// The store for `key`, if one was created.
    pub fn lookup<Q>(&self, key: &Q) -> Option<S>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Keys of all created stores, sorted.
    pub fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Handles to all created stores.
    pub fn values(&self) -> Vec<S> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stores.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of flat stores sharing one value type, one default and one
/// propagation target.
pub struct Stores<T> {
    registry: StoreRegistry<Store<T>>,
    default: T,
    propagate: Propagator<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Stores<T> {
    pub fn new(default: T, propagate: Propagator<T>) -> Self {
        Self {
            registry: StoreRegistry::new(),
            default,
            propagate,
        }
    }

    /// Store for `key`, seeded with `default` if it does not exist yet.
    ///
    /// The default of later calls for the same key is ignored.
    pub fn get(&self, key: &str, default: T) -> Store<T> {
        self.registry.get_or_create(key, || {
            log::trace!("Creating store '{key}'");
            Store::new(key, default, self.propagate.clone())
        })
    }

    /// Store for `key`, seeded with the registry-wide default.
    pub fn get_or_default(&self, key: &str) -> Store<T> {
        self.get(key, self.default.clone())
    }

    pub fn lookup(&self, key: &str) -> Option<Store<T>> {
        self.registry.lookup(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.registry.keys()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }
}
