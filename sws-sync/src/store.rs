//! Keyed observable stores.
//!
//! A [`Store`] is one named reactive cell. It distinguishes two writes:
//!
//! - [`Store::set`] is a local edit. It notifies subscribers, then hands the
//!   value to the propagation target, which serializes and sends it upstream.
//! - [`Store::set_locally`] is a remote-origin update. It only notifies, so
//!   applying an inbound message never produces another outbound message.

use std::sync::Arc;
use tokio::sync::watch;

use crate::observable::{Observable, Subscription};

/// Called with `(key, value)` after every local `set`.
pub type Propagator<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Propagation target that discards every update.
pub fn no_propagation<T>() -> Propagator<T> {
    Arc::new(|_: &str, _: &T| {})
}

/// A named observable value bound to a remote key.
pub struct Store<T> {
    key: Arc<str>,
    cell: Observable<T>,
    propagate: Propagator<T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            cell: self.cell.clone(),
            propagate: Arc::clone(&self.propagate),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("key", &self.key)
            .field("value", &self.cell)
            .finish()
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Store<T> {
    pub fn new(key: impl Into<Arc<str>>, initial: T, propagate: Propagator<T>) -> Self {
        Self {
            key: key.into(),
            cell: Observable::new(initial),
            propagate,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Set locally first, then propagate.
    ///
    /// Subscribers are only notified when the value changed, but the
    /// update is always propagated (pressing a button twice sends twice).
    pub fn set(&self, value: T) {
        self.cell.set_if_changed(value.clone());
        (self.propagate)(&self.key, &value);
    }

    /// Set without propagating. Used for updates that came from the peer.
    pub fn set_locally(&self, value: T) {
        self.cell.set_if_changed(value);
    }

    /// `set(f(current))`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.cell.with(f);
        self.set(next);
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.cell.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<T> {
        self.cell.watch()
    }

    /// Whether both handles are the same store instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Observable::ptr_eq(&a.cell, &b.cell)
    }
}
