//! Store Core
//!
//! The shape shared by every store: an identity, a kind, a value slot and
//! an ordered set of value listeners, plus the lifecycle hooks from
//! [`crate::events::lifecycle`].
//!
//! # Value Slot
//!
//! The slot holds `Option<T>` (absent until a derived store first computes)
//! and a version counter. The version is bumped on every assignment and is
//! what derived stores remember about their sources, so they can tell
//! whether anything moved without comparing values.
//!
//! # Notification
//!
//! Listeners are called in subscription order from a snapshot of the set,
//! with no lock held. A listener that unsubscribes itself (or others) while
//! being notified does not disturb the round in progress. Each call is
//! isolated: a panicking listener is logged and skipped.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::node::Upstream;
use super::subscriber::{ListenerId, StoreId};
use crate::error::isolate;
use crate::events::lifecycle::Lifecycle;

/// The variant of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Writable source.
    Atom,
    /// Derived on read.
    Computed,
    /// Derived at the next scheduler tick.
    Batched,
}

/// Value listener as stored internally: `(new, old)`.
pub(crate) type ValueListener<T> = Arc<dyn Fn(Option<&T>, Option<&T>) + Send + Sync>;

/// Common interface of atoms, computed and batched stores.
///
/// Anything implementing `Store` can be used as a source of a derived store
/// and can have lifecycle hooks and path listeners attached.
pub trait Store: Clone + Send + Sync + 'static {
    /// The value type held by the store.
    type Value: Clone + Send + Sync + 'static;

    /// The store's unique ID.
    fn id(&self) -> StoreId;

    /// The store's variant.
    fn kind(&self) -> StoreKind;

    /// The cached value, without triggering any derivation.
    fn peek(&self) -> Option<Self::Value>;

    /// Lifecycle hooks attached to this store.
    fn lifecycle(&self) -> &Lifecycle<Self::Value>;

    /// Number of value listeners currently attached.
    fn listener_count(&self) -> usize;

    #[doc(hidden)]
    fn upstream(&self) -> Upstream;
}

struct Slot<T> {
    value: Option<T>,
    version: u64,
}

pub(crate) struct StoreCore<T> {
    id: StoreId,
    kind: StoreKind,
    slot: Mutex<Slot<T>>,
    listeners: Mutex<IndexMap<ListenerId, ValueListener<T>>>,
    pub(crate) lifecycle: Lifecycle<T>,
}

impl<T> StoreCore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(kind: StoreKind, value: Option<T>) -> Self {
        Self {
            id: StoreId::next(),
            kind,
            slot: Mutex::new(Slot { value, version: 0 }),
            listeners: Mutex::new(IndexMap::new()),
            lifecycle: Lifecycle::new(),
        }
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn kind(&self) -> StoreKind {
        self.kind
    }

    pub(crate) fn value(&self) -> Option<T> {
        self.slot.lock().value.clone()
    }

    pub(crate) fn has_value(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    pub(crate) fn version(&self) -> u64 {
        self.slot.lock().version
    }

    /// Assign a new value, returning the previous one.
    pub(crate) fn replace(&self, value: T) -> Option<T> {
        let mut slot = self.slot.lock();
        slot.version += 1;
        slot.value.replace(value)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Add a listener. Returns its ID and whether it is the first one.
    pub(crate) fn add_listener(&self, listener: ValueListener<T>) -> (ListenerId, bool) {
        let id = ListenerId::next();
        let mut listeners = self.listeners.lock();
        listeners.insert(id, listener);
        (id, listeners.len() == 1)
    }

    /// Remove a listener. Returns `true` if it was the last one.
    ///
    /// Removing an unknown ID returns `false`, so a repeated removal never
    /// triggers deactivation twice.
    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        listeners.shift_remove(&id).is_some() && listeners.is_empty()
    }

    /// Call every listener with `(new, old)`.
    pub(crate) fn notify(&self, new: Option<&T>, old: Option<&T>) {
        let snapshot: Vec<ValueListener<T>> = self.listeners.lock().values().cloned().collect();
        tracing::trace!(store = %self.id, listeners = snapshot.len(), "notifying listeners");

        for listener in snapshot {
            isolate(self.id, "value listener", || listener(new, old));
        }
    }

    /// Call a single listener, as done once on subscribe.
    pub(crate) fn deliver(&self, listener: &ValueListener<T>, new: Option<&T>, old: Option<&T>) {
        isolate(self.id, "value listener", || listener(new, old));
    }
}

impl<T> Drop for StoreCore<T> {
    fn drop(&mut self) {
        crate::events::path::forget(self.id);
    }
}
