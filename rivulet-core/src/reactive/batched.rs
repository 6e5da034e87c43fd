//! Batched Implementation
//!
//! A Batched store is derived like a [`Computed`](super::Computed) store,
//! but reacts to source changes on the deferred queue instead of inline.
//!
//! # How Batched Stores Work
//!
//! 1. A source change marks the store dirty. If no recompute is queued yet,
//!    one is enqueued with the scheduler; further changes before the next
//!    [`tick`](crate::scheduler::tick) are absorbed by that one task.
//!
//! 2. The task clears the pending flag and exits early if the store is
//!    clean or nobody is listening anymore.
//!
//! 3. Otherwise it re-derives. A dirty batched source aborts the recompute;
//!    the store stays dirty and is *not* rescheduled, since the source will
//!    notify it once it settles.
//!
//! 4. Reads never force a recompute: `get` returns whatever was cached at
//!    the last tick, or `None` before the first one.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use super::derive::{bind, bind_infallible, report, Derivation};
use super::equality::SameValue;
use super::node::{ChangeCallback, DerivedNode, Node, Upstream};
use super::sources::Sources;
use super::store::{Store, StoreKind, ValueListener};
use super::subscriber::{ListenerId, StoreId, Subscription};
use crate::error::Result;
use crate::events::lifecycle::Lifecycle;
use crate::scheduler;

/// A derived value recomputed at the next scheduler tick.
///
/// # Example
///
/// ```rust
/// use rivulet_core::{tick, Atom, Batched};
///
/// let a = Atom::new(1);
/// let b = Atom::new(2);
/// let sum = Batched::new((a.clone(), b.clone()), |(a, b)| a + b);
/// let _sub = sum.listen(|value, _| println!("sum = {value:?}"));
///
/// a.set(10);
/// b.set(20);
/// assert_eq!(sum.get(), None);
///
/// tick(); // one recompute for both writes
/// assert_eq!(sum.get(), Some(30));
/// ```
pub struct Batched<T> {
    inner: Arc<BatchedInner<T>>,
}

pub(crate) struct BatchedInner<T> {
    derivation: Derivation<T>,
}

impl<T> Batched<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a batched store from `sources` and a calculation over their
    /// values.
    pub fn new<S, F>(sources: S, calculation: F) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
        T: SameValue,
    {
        Self::with_equality(sources, calculation, T::same_value)
    }

    /// Like [`new`](Batched::new), with a custom change test.
    pub fn with_equality<S, F, E>(sources: S, calculation: F, equality: E) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        let upstream = sources.upstream();
        Self::build(Derivation::new(
            StoreKind::Batched,
            upstream,
            bind_infallible(sources, calculation),
            Box::new(equality),
        ))
    }

    /// Create a batched store whose calculation may fail.
    pub fn try_new<S, F, E>(sources: S, calculation: F) -> Self
    where
        S: Sources,
        F: Fn(S::Values) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Display,
        T: SameValue,
    {
        let upstream = sources.upstream();
        Self::build(Derivation::new(
            StoreKind::Batched,
            upstream,
            bind(sources, calculation),
            Box::new(T::same_value),
        ))
    }

    fn build(derivation: Derivation<T>) -> Self {
        Self {
            inner: Arc::new(BatchedInner { derivation }),
        }
    }

    /// The value as of the last tick. Never triggers a recompute.
    pub fn get(&self) -> Option<T> {
        self.inner.derivation.core.value()
    }

    /// Whether a change is waiting for the next tick.
    pub fn is_dirty(&self) -> bool {
        self.inner.derivation.is_dirty()
    }

    /// Subscribe to changes.
    ///
    /// The listener is called once right away with the cached value
    /// (`(None, None)` before the first tick), then with `(new, old)`
    /// after each tick that changed the value.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(Arc::new(listener), true)
    }

    /// Like [`subscribe`](Batched::subscribe), without the initial call.
    pub fn listen<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&T>, Option<&T>) + Send + Sync + 'static,
    {
        self.inner.attach(Arc::new(listener), false)
    }
}

impl<T> BatchedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_source_change(self: &Arc<Self>) {
        self.derivation.invalidate();
        self.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        if !self.derivation.claim_pending() {
            return;
        }
        tracing::trace!(store = %self.derivation.id(), "recompute scheduled");

        let inner = Arc::downgrade(self);
        scheduler::defer(move || {
            if let Some(inner) = inner.upgrade() {
                inner.run_scheduled();
            }
        });
    }

    fn run_scheduled(&self) {
        if !self.derivation.release_pending() {
            return;
        }
        if let Err(err) = self.derivation.recompute() {
            report(self.derivation.id(), &err);
        }
    }

    fn attach(self: &Arc<Self>, listener: ValueListener<T>, initial: bool) -> Subscription {
        let core = &self.derivation.core;
        let activating = core.listener_count() == 0;

        let (id, _) = core.add_listener(listener.clone());
        if activating {
            let inner = Arc::downgrade(self);
            let on_change: ChangeCallback = Arc::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.on_source_change();
                }
            });
            self.derivation.connect(on_change);
            self.schedule();
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

    fn detach(&self, id: ListenerId) {
        let core = &self.derivation.core;
        if core.remove_listener(id) {
            // A queued task finds the store inactive and exits.
            self.derivation.disconnect();
            core.lifecycle.fire_deactivate(core.id());
        }
    }
}

impl<T> Node for BatchedInner<T>
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

impl<T> DerivedNode for BatchedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Batched stores only recompute on their own tick.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.derivation.is_dirty()
    }
}

impl<T> Store for Batched<T>
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
        Upstream::Batched(self.inner.clone())
    }
}

impl<T> Clone for Batched<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Batched<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batched")
            .field("id", &self.id())
            .field("value", &self.peek())
            .field("dirty", &self.inner.derivation.is_dirty())
            .field("active", &self.inner.derivation.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, Atom, Computed};
    use crate::scheduler::{pending, tick};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};

    type Calls = Arc<Mutex<Vec<(Option<i32>, Option<i32>)>>>;

    fn record(store: &Batched<i32>) -> (Calls, Subscription) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let subscription = store.subscribe(move |new, old| {
            calls_clone.lock().push((new.copied(), old.copied()));
        });
        (calls, subscription)
    }

    #[test]
    fn first_value_arrives_on_tick() {
        let a = Atom::new(4);
        let squared = Batched::new((a.clone(),), |(a,)| a * a);
        let (calls, _sub) = record(&squared);

        assert_eq!(*calls.lock(), vec![(None, None)]);
        assert_eq!(squared.get(), None);

        tick();
        assert_eq!(squared.get(), Some(16));
        assert_eq!(*calls.lock(), vec![(None, None), (Some(16), None)]);
    }

    #[test]
    fn changes_between_ticks_are_coalesced() {
        let a = Atom::new(1);
        let b = Atom::new(1);
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let sum = Batched::new((a.clone(), b.clone()), move |(a, b)| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            a + b
        });
        let (calls, _sub) = record(&sum);
        tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        a.set(2);
        b.set(3);
        a.set(4);
        assert_eq!(pending(), 1);

        tick();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(*calls.lock().last().unwrap(), (Some(7), Some(2)));
    }

    #[test]
    fn get_never_forces_recompute() {
        let a = Atom::new(1);
        let doubled = Batched::new((a.clone(),), |(a,)| a * 2);
        let _sub = doubled.listen(|_, _| {});
        tick();

        a.set(5);
        assert!(doubled.is_dirty());
        assert_eq!(doubled.get(), Some(2));
        tick();
        assert_eq!(doubled.get(), Some(10));
        assert!(!doubled.is_dirty());
    }

    #[test]
    fn chained_batched_settle_in_one_tick() {
        let a = Atom::new(1);
        let first = Batched::new((a.clone(),), |(a,)| a + 1);
        let second = Batched::new((first.clone(),), |(b,)| b * 10);
        let (calls, _sub) = record(&second);

        tick();
        assert_eq!(second.get(), Some(20));

        a.set(2);
        tick();
        assert_eq!(*calls.lock(), vec![(None, None), (Some(20), None), (Some(30), Some(20))]);
    }

    #[test]
    fn waits_for_dirty_batched_source() {
        let a = Atom::new(1);
        let inner = Batched::new((a.clone(),), |(a,)| a * 2);
        // `a` first, so its listener is notified before `inner`'s.
        let outer = Batched::new((a.clone(), inner.clone()), |(a, inner)| a + inner);
        let (calls, _sub) = record(&outer);

        tick();
        assert_eq!(outer.get(), Some(3));

        a.set(2);
        tick();
        // The first attempt found `inner` dirty; its settle rescheduled us.
        assert_eq!(*calls.lock(), vec![(None, None), (Some(3), None), (Some(6), Some(3))]);
    }

    #[test]
    fn unobserved_batched_source_starves_readers() {
        let a = Atom::new(1);
        let unobserved = Batched::new((a.clone(),), |(a,)| a + 1);
        let reader = Computed::new((unobserved.clone(),), |(value,)| value * 2);

        tick();
        assert_eq!(reader.get(), None);
        assert_eq!(reader.try_get(), Ok(None));
        assert!(reader.is_dirty());
    }

    #[test]
    fn failing_computed_source_keeps_last_good_value() {
        let a = Atom::new(1);
        let b = Atom::new(10);
        let inner = Computed::new((a.clone(),), |(value,)| {
            assert!(value >= 0, "negative input");
            value
        });
        let outer = Batched::new((inner.clone(), b.clone()), |(i, b)| i + b);
        let (calls, _sub) = record(&outer);
        tick();

        a.set(-1);
        tick();
        assert_eq!(outer.get(), Some(11));

        b.set(20);
        tick();
        assert_eq!(outer.get(), Some(21));
        assert_eq!(*calls.lock().last().unwrap(), (Some(21), Some(11)));
    }

    #[test]
    fn unsubscribed_store_skips_queued_recompute() {
        let a = Atom::new(1);
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let doubled = Batched::new((a.clone(),), move |(a,)| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            a * 2
        });

        let sub = doubled.listen(|_, _| {});
        sub.unsubscribe();
        tick();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(a.listener_count(), 0);
    }

    #[test]
    fn transaction_commit_schedules_once() {
        let a = Atom::new(0);
        let b = Atom::new(0);
        let sum = Batched::new((a.clone(), b.clone()), |(a, b)| a + b);
        let (calls, _sub) = record(&sum);
        tick();

        batch(|| {
            a.set(1);
            b.set(2);
        });
        assert_eq!(pending(), 1);
        tick();

        assert_eq!(*calls.lock().last().unwrap(), (Some(3), Some(0)));
        assert_eq!(calls.lock().len(), 3);
    }
}
