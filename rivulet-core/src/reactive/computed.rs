//! Computed Implementation
//!
//! A Computed is a derived value that re-evaluates only when read while
//! stale.
//!
//! # How Computed Stores Work
//!
//! 1. On creation nothing runs. The store is dirty and has no value.
//!
//! 2. `get` re-derives if the store is dirty, or if nobody is subscribed
//!    (an unobserved store receives no change notifications, so it checks
//!    its sources' versions on every read instead).
//!
//! 3. Once subscribed, the store subscribes to every source in turn, which
//!    activates computed and batched sources transitively. A source change
//!    then marks the store dirty and re-derives it immediately, notifying
//!    listeners if the value changed.
//!
//! 4. When the last listener leaves, the source subscriptions are dropped
//!    (deactivating the chain upstream) and the store goes back to dirty.
//!
//! # Stale Reads
//!
//! A dirty batched source cannot be forced to recompute. A read that needs
//! one returns the previously cached value and leaves the store dirty.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use super::derive::{bind, bind_infallible, report, Derivation};
use super::equality::SameValue;
use super::node::{ChangeCallback, DerivedNode, Node, Upstream};
use super::sources::Sources;
use super::store::{Store, StoreKind, ValueListener};
use super::subscriber::{ListenerId, StoreId, Subscription};
use crate::error::{GraphError, Result};
use crate::events::lifecycle::Lifecycle;

/// A value derived on read from one or more source stores.
///
/// # Example
///
/// ```rust
/// use rivulet_core::{Atom, Computed};
///
/// let a = Atom::new(10);
/// let doubled = Computed::new((a.clone(),), |(a,)| a * 2);
///
/// assert_eq!(doubled.get(), Some(20));
/// a.set(15);
/// assert_eq!(doubled.get(), Some(30));
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

pub(crate) struct ComputedInner<T> {
    derivation: Derivation<T>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed store from `sources` and a calculation over
    /// their values.
    pub fn new<S, F>(sources: S, calculation: F) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
        T: SameValue,
    {
        Self::with_equality(sources, calculation, T::same_value)
    }

    /// Like [`new`](Computed::new), with a custom change test.
    pub fn with_equality<S, F, E>(sources: S, calculation: F, equality: E) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let upstream = sources.upstream();
        Self::build(Derivation::new(
            StoreKind::Computed,
            upstream,
            bind_infallible(sources, calculation),
            Box::new(equality),
        ))
    }

    /// Create a computed store whose calculation may fail.
    ///
    /// An `Err` is treated like a panicking calculation: the store keeps
    /// its previous value and stays dirty.
    pub fn try_new<S, F, E>(sources: S, calculation: F) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Display,
        T: SameValue,
    {
        let upstream = sources.upstream();
        Self::build(Derivation::new(
            StoreKind::Computed,
            upstream,
            bind(sources, calculation),
            Box::new(T::same_value),
        ))
    }

    fn build(derivation: Derivation<T>) -> Self {
        Self {
            inner: Arc::new(ComputedInner { derivation }),
        }
    }

    /// Get the current value, re-deriving if necessary.
    ///
    /// Returns `None` only if the store has never derived successfully.
    pub fn get(&self) -> Option<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => {
                report(self.id(), &err);
                self.inner.derivation.core.value()
            }
        }
    }

    /// Like [`get`](Computed::get), but reports cycles and failed
    /// calculations instead of falling back to the cached value.
    ///
    /// A stale source is not an error: the cached value is returned.
    pub fn try_get(&self) -> Result<Option<T>> {
        if self.inner.derivation.needs_refresh() {
            match self.inner.derivation.recompute() {
                Ok(()) | Err(GraphError::Stale { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(self.inner.derivation.core.value())
    }

    /// Whether the next read will re-check its sources.
    ///
    /// Always `true` while unobserved; the re-check only runs the
    /// calculation if a source version moved.
    pub fn is_dirty(&self) -> bool {
        self.inner.derivation.needs_refresh()
    }

    /// Subscribe to changes.
    ///
    /// The listener is called once right away with `(current, None)`, then
    /// with `(new, old)` whenever the derived value changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(Arc::new(listener), true)
    }

    /// Like [`subscribe`](Computed::subscribe), without the initial call.
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(Arc::new(listener), false)
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn refresh_logged(&self) {
        if let Err(err) = self.derivation.recompute() {
            report(self.derivation.id(), &err);
        }
    }

    fn on_source_change(&self) {
        self.derivation.invalidate();

        // Our own calculation refreshed a source that then notified us;
        // the value being computed already sees the change.
        if super::context::EvaluationFrame::is_evaluating(self.derivation.id()) {
            return;
        }
        self.refresh_logged();
    }

    fn attach(self: &Arc<Self>, listener: ValueListener<T>, initial: bool) -> Subscription {
        let core = &self.derivation.core;
        let activating = core.listener_count() == 0;
        if activating {
            self.activate();
        }

        let (id, _) = core.add_listener(listener.clone());
        if activating {
            core.lifecycle.fire_activate(core.id());
        }
        if initial {
            let current = core.value();
            core.deliver(&listener, current.as_ref(), None);
        }

        let inner = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.detach(id);
            }
        })
    }

    fn activate(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        let on_change: ChangeCallback = Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.on_source_change();
            }
        });
        self.derivation.connect(on_change);
        self.refresh_logged();
    }

    fn detach(&self, id: ListenerId) {
        let core = &self.derivation.core;
        if core.remove_listener(id) {
            self.derivation.disconnect();
            core.lifecycle.fire_deactivate(core.id());
        }
    }
}

impl<T> Node for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> StoreId {
        self.derivation.id()
    }

    fn version(&self) -> u64 {
        self.derivation.core.version()
    }

    fn watch(self: Arc<Self>, on_change: ChangeCallback) -> Subscription {
        self.attach(Arc::new(move |_: Option<&T>, _: Option<&T>| on_change()), false)
    }
}

impl<T> DerivedNode for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Always re-verifies, even when clean: a dependent pulling this store
    /// may run before this store's own change notification arrives.
    fn refresh(&self) -> Result<()> {
        self.derivation.recompute()
    }

    fn is_dirty(&self) -> bool {
        self.derivation.needs_refresh()
    }
}

impl<T> Store for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn id(&self) -> StoreId {
        self.inner.derivation.id()
    }

    fn kind(&self) -> StoreKind {
        self.inner.derivation.core.kind()
    }

    fn peek(&self) -> Option<T> {
        self.inner.derivation.core.value()
    }

    fn lifecycle(&self) -> &Lifecycle<T> {
        &self.inner.derivation.core.lifecycle
    }

    fn listener_count(&self) -> usize {
        self.inner.derivation.core.listener_count()
    }

    fn upstream(&self) -> Upstream {
        Upstream::Computed(self.inner.clone())
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("value", &self.peek())
            .field("dirty", &self.inner.derivation.is_dirty())
            .field("active", &self.inner.derivation.is_active())
            .field("sources", &self.inner.derivation.source_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
