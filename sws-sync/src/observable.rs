//! Minimal observable value.
//!
//! An [`Observable`] holds a current value and two kinds of listeners:
//!
//! - callback subscribers, invoked synchronously on the setting thread
//!   (first call happens immediately on `subscribe` with the current value)
//! - `tokio::sync::watch` receivers, for tasks that prefer to `.await`
//!   changes
//!
//! Handles are cheap clones of one shared cell; [`Observable::ptr_eq`]
//! tells whether two handles are the same cell.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    sender: watch::Sender<T>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_id: AtomicU64,
}

/// A shared, observable cell.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Observable")
            .field(&*self.inner.sender.borrow())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                sender,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.sender.borrow().clone()
    }

    /// Run `f` against the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.sender.borrow())
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        self.inner.sender.send_replace(value.clone());
        self.notify(&value);
    }

    /// Replace the value and notify only if it differs from the current one.
    ///
    /// Returns whether subscribers were notified.
    pub fn set_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let changed = self.store_if_changed(value.clone());
        if changed {
            self.notify(&value);
        }
        changed
    }

    /// Replace the value if it differs, waking `watch` receivers but not
    /// callbacks. Callers follow up with [`Observable::notify_current`] once
    /// they hold no locks.
    pub(crate) fn store_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        self.inner.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Run callbacks with the value current at the time of the call.
    pub(crate) fn notify_current(&self) {
        let current = self.get();
        self.notify(&current);
    }

    /// Register a callback. It is called right away with the current value
    /// and then after every change, until the returned [`Subscription`] is
    /// dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback<T> = Arc::new(callback);
        lock(&self.inner.subscribers).push((id, Arc::clone(&callback)));

        let current = self.get();
        callback(&current);

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.subscribers).retain(|(sub_id, _)| *sub_id != id);
                }
            })),
        }
    }

    /// Async receiver that wakes on every change.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.inner.sender.subscribe()
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn notify(&self, value: &T) {
        // Snapshot so callbacks may subscribe or set without deadlocking.
        let callbacks: Vec<Callback<T>> = lock(&self.inner.subscribers)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// Keeps a callback registered while alive.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keep the callback registered for the lifetime of the observable.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }

    /// Unregister now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_subscribe_receives_current_then_changes() {
        let cell = Observable::new(1);
        let (seen, cb) = recorder::<i32>();
        let _sub = cell.subscribe(cb);
        cell.set(2);
        cell.set(3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn test_set_if_changed_skips_equal_values() {
        let cell = Observable::new(false);
        let (seen, cb) = recorder::<bool>();
        let _sub = cell.subscribe(cb);
        assert!(!cell.set_if_changed(false));
        assert!(cell.set_if_changed(true));
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let cell = Observable::new(0);
        let (seen, cb) = recorder::<i32>();
        let sub = cell.subscribe(cb);
        assert_eq!(cell.subscriber_count(), 1);
        drop(sub);
        assert_eq!(cell.subscriber_count(), 0);
        cell.set(9);
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_detach_keeps_callback() {
        let cell = Observable::new(0);
        let (seen, cb) = recorder::<i32>();
        cell.subscribe(cb).detach();
        cell.set(5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 5]);
    }

    #[test]
    fn test_callback_may_read_and_subscribe() {
        let cell = Observable::new(0);
        let inner = cell.clone();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let nested_sink = Arc::clone(&nested);
        let _sub = cell.subscribe(move |v| {
            assert_eq!(inner.get(), *v);
            if *v == 1 {
                let sink = Arc::clone(&nested_sink);
                inner.subscribe(move |x| sink.lock().unwrap().push(*x)).detach();
            }
        });
        cell.set(1);
        cell.set(2);
        assert_eq!(*nested.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_clones_share_cell() {
        let a = Observable::new("x".to_string());
        let b = a.clone();
        let c = Observable::new("x".to_string());
        b.set("y".into());
        assert_eq!(a.get(), "y");
        assert!(Observable::ptr_eq(&a, &b));
        assert!(!Observable::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_watch_receiver_sees_changes() {
        let cell = Observable::new(0u32);
        let mut rx = cell.watch();
        cell.set(7);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 7);
    }
}
