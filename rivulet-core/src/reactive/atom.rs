//! Atom Implementation
//!
//! An Atom is the only writable store. Everything else in the graph is
//! derived from atoms.
//!
//! # How Atoms Work
//!
//! 1. `set` compares the new value with the current one using the atom's
//!    equality. Equal values are dropped unless the write is forced.
//!
//! 2. The value is assigned immediately.
//!
//! 3. If a transaction is open on this thread, the pre-transaction value is
//!    recorded in its ledger and notification is left to the transaction.
//!
//! 4. Otherwise pre-write hooks run, listeners are notified with
//!    `(new, old)`, and post-notify hooks run.
//!
//! # Thread Safety
//!
//! Handles are cheap to clone and `Send + Sync`; the value lives behind a
//! `parking_lot` mutex that is never held while user code runs.

use std::fmt::{self, Debug};
use std::sync::Arc;

use super::equality::SameValue;
use super::node::{ChangeCallback, Node, Upstream};
use super::store::{Store, StoreCore, StoreKind, ValueListener};
use super::subscriber::{ListenerId, StoreId, Subscription};
use super::transaction;
use crate::error::isolate;
use crate::events::lifecycle::Lifecycle;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A writable reactive value.
///
/// # Example
///
/// ```rust
/// use rivulet_core::Atom;
///
/// let count = Atom::new(0);
/// let _sub = count.subscribe(|value, old| println!("{old:?} -> {value}"));
///
/// count.set(5); // prints "Some(0) -> 5"
/// assert_eq!(count.get(), 5);
/// ```
pub struct Atom<T> {
    inner: Arc<AtomInner<T>>,
}

pub(crate) struct AtomInner<T> {
    core: StoreCore<T>,
    equality: Equality<T>,
}

impl<T> Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new atom with the given initial value.
    pub fn new(value: T) -> Self
    where
        T: SameValue,
    {
        Self::with_equality(value, T::same_value)
    }

    /// Create a new atom that uses `equality` to suppress no-op writes.
    pub fn with_equality<E>(value: T, equality: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(AtomInner {
                core: StoreCore::new(StoreKind::Atom, Some(value)),
                equality: Box::new(equality),
            }),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.current()
    }

    /// Set a new value and notify listeners if it changed.
    pub fn set(&self, value: T) {
        self.inner.write(self, value, false);
    }

    /// Set a new value and notify listeners even if it is unchanged.
    pub fn set_forced(&self, value: T) {
        self.inner.write(self, value, true);
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get());
        self.set(next);
    }

    /// Subscribe to changes.
    ///
    /// The listener is called once right away with `(current, None)`, then
    /// with `(new, Some(old))` on every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(adapt(listener), true)
    }

    /// Like [`subscribe`](Atom::subscribe), without the initial call.
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(adapt(listener), false)
    }

    /// Announce that the value changed from `old`.
    ///
    /// Entry point for containers that assign through [`set`](Atom::set)-free
    /// paths: inside a transaction `old` is recorded in the ledger,
    /// otherwise listeners are notified right away.
    pub fn notify(&self, old: T) {
        if transaction::queue_for_transaction(self, old.clone()) {
            return;
        }
        let current = self.get();
        self.inner.emit(&current, &old);
    }

    /// Whether the current value is not equal to `other`.
    pub(crate) fn differs_from(&self, other: &T) -> bool {
        !(self.inner.equality)(&self.get(), other)
    }

    /// Run the notification sequence for a change from `old` to `new`.
    pub(crate) fn emit(&self, new: &T, old: &T) {
        self.inner.emit(new, old);
    }
}

fn adapt<T, F>(listener: F) -> ValueListener<T>
where
    F: Fn(&T, Option<&T>) + Send + Sync + 'static,
{
    Arc::new(move |new: Option<&T>, old: Option<&T>| {
        if let Some(new) = new {
            listener(new, old);
        }
    })
}

impl<T> AtomInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn current(&self) -> T {
        self.core.value().expect("atom always holds a value")
    }

    fn write(&self, handle: &Atom<T>, value: T, force: bool) {
        let current = self.current();
        let unchanged = isolate(self.core.id(), "equality", || (self.equality)(&current, &value))
            .unwrap_or(false);
        if !force && unchanged {
            return;
        }

        self.core.replace(value.clone());

        if transaction::queue_for_transaction(handle, current.clone()) {
            tracing::trace!(store = %self.core.id(), "write deferred to transaction");
            return;
        }
        self.emit(&value, &current);
    }

    fn emit(&self, new: &T, old: &T) {
        let id = self.core.id();
        self.core.lifecycle.fire_pre_write(id, new, old);
        self.core.notify(Some(new), Some(old));
        self.core.lifecycle.fire_post_notify(id, Some(new), Some(old));
    }

    fn attach(self: &Arc<Self>, listener: ValueListener<T>, initial: bool) -> Subscription {
        let (id, first) = self.core.add_listener(listener.clone());
        if first {
            self.core.lifecycle.fire_activate(self.core.id());
        }
        if initial {
            let current = self.core.value();
            self.core.deliver(&listener, current.as_ref(), None);
        }

        let inner = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.detach(id);
            }
        })
    }

    fn detach(&self, id: ListenerId) {
        if self.core.remove_listener(id) {
            self.core.lifecycle.fire_deactivate(self.core.id());
        }
    }
}

impl<T> Node for AtomInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> StoreId {
        self.core.id()
    }

    fn version(&self) -> u64 {
        self.core.version()
    }

    fn watch(self: Arc<Self>, on_change: ChangeCallback) -> Subscription {
        self.attach(Arc::new(move |_: Option<&T>, _: Option<&T>| on_change()), false)
    }
}

impl<T> Store for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> StoreId {
        self.inner.core.id()
    }

    fn kind(&self) -> StoreKind {
        self.inner.core.kind()
    }

    fn peek(&self) -> Option<T> {
        self.inner.core.value()
    }

    fn lifecycle(&self) -> &Lifecycle<T> {
        &self.inner.core.lifecycle
    }

    fn listener_count(&self) -> usize {
        self.inner.core.listener_count()
    }

    fn upstream(&self) -> Upstream {
        Upstream::Atom(self.inner.clone())
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Atom<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("value", &self.get())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
