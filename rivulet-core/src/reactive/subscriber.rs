//! Identifiers and subscription handles.
//!
//! Every store gets a [`StoreId`] when created, and every listener or hook a
//! [`ListenerId`]. Registries are keyed by these integers rather than by
//! object identity, so holding an id never keeps a store alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Unique identifier for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    /// Generate a new unique store ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// Identifier for a value listener or lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Cancel = Box<dyn FnOnce() + Send>;

/// Handle returned by every subscribe/attach call.
///
/// Calling [`unsubscribe`](Subscription::unsubscribe) removes the listener.
/// It is idempotent: only the first call has any effect. Dropping the
/// handle unsubscribes as well; use [`detach`](Subscription::detach) to keep
/// the listener registered for the lifetime of the store instead.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Mutex<Option<Cancel>>,
}

impl Subscription {
    pub(crate) fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the listener. Subsequent calls are no-ops.
    pub fn unsubscribe(&self) {
        // Take the closure first so the lock is released before it runs;
        // deactivation may cascade into other subscriptions.
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether [`unsubscribe`](Subscription::unsubscribe) has not run yet.
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Give up the handle without unsubscribing.
    pub fn detach(self) {
        self.cancel.lock().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    fn counting() -> (Arc<AtomicI32>, Subscription) {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let subscription = Subscription::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        (calls, subscription)
    }

    #[test]
    fn store_ids_are_unique() {
        let id1 = StoreId::next();
        let id2 = StoreId::next();
        let id3 = StoreId::next();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let (calls, subscription) = counting();

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());

        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let (calls, subscription) = counting();
        assert!(subscription.is_active());

        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detach_never_cancels() {
        let (calls, subscription) = counting();
        subscription.detach();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
