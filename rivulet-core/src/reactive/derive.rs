//! Derivation Engine
//!
//! The machinery shared by computed and batched stores: the source list,
//! the dirty flag, source-version bookkeeping and the recompute step.
//! Computed and batched stores differ only in *when* they call
//! [`Derivation::recompute`].
//!
//! # Recompute
//!
//! 1. Enter an evaluation frame (fails with a cycle error if this store is
//!    already being evaluated further up the stack).
//!
//! 2. Resolve every source. Computed sources refresh themselves (one whose
//!    calculation fails contributes its last good value); a dirty batched
//!    source cannot be forced and aborts the recompute with
//!    [`GraphError::Stale`]. The store stays dirty and keeps its value.
//!
//! 3. Compare source versions with the ones seen at the last successful
//!    calculation. If none moved and a value is cached, the store is clean
//!    without running the calculation.
//!
//! 4. Run the calculation (panics caught), compare with the previous value
//!    using the store's equality, and store the result.
//!
//! 5. After leaving the frame, notify listeners if the value changed.
//!
//! # Epochs
//!
//! Every invalidation bumps an epoch. A recompute only clears the dirty
//! flag if no invalidation arrived while it was running, so a change that
//! lands mid-calculation is never lost.
//!
//! # Re-entrant Writes
//!
//! A listener that writes a source while being notified starts a nested
//! round, which completes before the outer one continues. Listeners later
//! in the outer round therefore receive `(new2, new1)` first and the
//! outer `(new1, old)` afterwards. Only the last value read through `get`
//! is authoritative.

use std::convert::Infallible;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use super::context::EvaluationFrame;
use super::node::{ChangeCallback, Upstream};
use super::sources::Sources;
use super::store::{StoreCore, StoreKind};
use super::subscriber::{StoreId, Subscription};
use crate::error::{panic_message, GraphError, Result};

/// Why a calculation produced no value.
pub(crate) enum Failure {
    /// A source had no value.
    Absent(StoreId),
    /// The calculation returned an error.
    Failed(String),
}

pub(crate) type Calculation<T> = Box<dyn Fn() -> Result<T, Failure> + Send + Sync>;
pub(crate) type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Bind a user calculation to its sources.
pub(crate) fn bind<S, T, E, F>(sources: S, calculation: F) -> Calculation<T>
where
    S: Sources,
    E: Display,
    F: Fn(S::Values) -> Result<T, E> + Send + Sync + 'static,
{
    Box::new(move || {
        let values = sources.values().map_err(Failure::Absent)?;
        calculation(values).map_err(|err| Failure::Failed(err.to_string()))
    })
}

/// Bind an infallible calculation to its sources.
pub(crate) fn bind_infallible<S, T, F>(sources: S, calculation: F) -> Calculation<T>
where
    S: Sources,
    F: Fn(S::Values) -> T + Send + Sync + 'static,
{
    bind(sources, move |values| Ok::<T, Infallible>(calculation(values)))
}

/// Log a derivation error at a level matching how unusual it is.
pub(crate) fn report(store: StoreId, err: &GraphError) {
    match err {
        GraphError::Stale { store: source } => {
            tracing::trace!(%store, %source, "derivation waiting on unsettled source");
        }
        GraphError::Cycle { .. } => tracing::error!(%store, error = %err, "derivation aborted"),
        GraphError::DerivationFailed { .. } => tracing::warn!(%store, error = %err, "derivation failed"),
    }
}

struct DeriveState {
    dirty: bool,
    active: bool,
    pending: bool,
    epoch: u64,
    /// Source versions at the last successful calculation.
    seen: Vec<u64>,
    /// Source subscriptions, held only while active.
    handles: Vec<Subscription>,
}

pub(crate) struct Derivation<T> {
    pub(crate) core: StoreCore<T>,
    upstream: Vec<Upstream>,
    calculate: Calculation<T>,
    equality: Equality<T>,
    state: Mutex<DeriveState>,
}

impl<T> Derivation<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        kind: StoreKind,
        upstream: Vec<Upstream>,
        calculate: Calculation<T>,
        equality: Equality<T>,
    ) -> Self {
        Self {
            core: StoreCore::new(kind, None),
            upstream,
            calculate,
            equality,
            state: Mutex::new(DeriveState {
                dirty: true,
                active: false,
                pending: false,
                epoch: 0,
                seen: Vec::new(),
                handles: Vec::new(),
            }),
        }
    }

    pub(crate) fn id(&self) -> StoreId {
        self.core.id()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// An inactive store gets no change notifications, so it can never
    /// trust its dirty flag.
    pub(crate) fn needs_refresh(&self) -> bool {
        let state = self.state.lock();
        state.dirty || !state.active
    }

    pub(crate) fn source_count(&self) -> usize {
        self.upstream.len()
    }

    /// Mark the cached value as possibly stale.
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        state.epoch += 1;
    }

    /// Claim the single deferred-recompute slot. Returns `false` if a
    /// recompute is already scheduled.
    pub(crate) fn claim_pending(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.pending, true)
    }

    /// Release the deferred-recompute slot. Returns whether there is work:
    /// the store is still dirty and still observed.
    pub(crate) fn release_pending(&self) -> bool {
        let mut state = self.state.lock();
        state.pending = false;
        state.dirty && state.active
    }

    /// Subscribe to every source and become active.
    pub(crate) fn connect(&self, on_change: ChangeCallback) {
        // Subscribing may cascade into activating the sources themselves,
        // so no lock is held here.
        let handles: Vec<Subscription> = self
            .upstream
            .iter()
            .map(|source| source.watch(on_change.clone()))
            .collect();

        let mut state = self.state.lock();
        state.handles = handles;
        state.active = true;
        state.dirty = true;
        state.epoch += 1;
    }

    /// Release every source subscription and become inactive and dirty.
    pub(crate) fn disconnect(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.active = false;
            state.dirty = true;
            std::mem::take(&mut state.handles)
        };
        // Dropping the handles unsubscribes, cascading deactivation upstream.
        drop(handles);
    }

    /// Bring the value up to date. See the module docs for the steps.
    pub(crate) fn recompute(&self) -> Result<()> {
        let update = {
            let _frame = EvaluationFrame::enter(self.id())?;
            self.derive()?
        };

        if let Some((next, previous)) = update {
            if self.core.listener_count() > 0 {
                self.core.notify(Some(&next), previous.as_ref());
                self.core
                    .lifecycle
                    .fire_post_notify(self.id(), Some(&next), previous.as_ref());
            }
        }
        Ok(())
    }

    /// Steps 2-4; returns `(new, old)` when the value changed.
    fn derive(&self) -> Result<Option<(T, Option<T>)>> {
        let epoch = self.state.lock().epoch;

        for source in &self.upstream {
            source.resolve()?;
        }
        let versions: Vec<u64> = self.upstream.iter().map(Upstream::version).collect();

        {
            let mut state = self.state.lock();
            if state.seen == versions && self.core.has_value() {
                self.settle(&mut state, epoch);
                return Ok(None);
            }
        }

        let previous = self.core.value();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let next = (self.calculate)()?;
            let changed = match &previous {
                Some(previous) => !(self.equality)(previous, &next),
                None => true,
            };
            Ok::<_, Failure>((next, changed))
        }));

        let (next, changed) = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(Failure::Absent(store))) => return Err(GraphError::Stale { store }),
            Ok(Err(Failure::Failed(reason))) => {
                return Err(GraphError::DerivationFailed {
                    store: self.id(),
                    reason,
                })
            }
            Err(payload) => {
                return Err(GraphError::DerivationFailed {
                    store: self.id(),
                    reason: panic_message(payload.as_ref()),
                })
            }
        };

        {
            let mut state = self.state.lock();
            state.seen = versions;
            self.settle(&mut state, epoch);
        }

        if !changed {
            return Ok(None);
        }
        self.core.replace(next.clone());
        Ok(Some((next, previous)))
    }

    fn settle(&self, state: &mut DeriveState, epoch: u64) {
        if state.epoch == epoch {
            state.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Atom;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn doubled(source: &Atom<i32>, runs: Arc<AtomicI32>) -> Derivation<i32> {
        let sources = (source.clone(),);
        Derivation::new(
            StoreKind::Computed,
            sources.upstream(),
            bind_infallible(sources, move |(value,)| {
                runs.fetch_add(1, Ordering::SeqCst);
                value * 2
            }),
            Box::new(|a: &i32, b: &i32| a == b),
        )
    }

    #[test]
    fn starts_dirty_without_value() {
        let source = Atom::new(1);
        let derivation = doubled(&source, Arc::new(AtomicI32::new(0)));

        assert!(derivation.is_dirty());
        assert!(!derivation.is_active());
        assert!(derivation.core.value().is_none());
        assert_eq!(derivation.source_count(), 1);
    }

    #[test]
    fn unchanged_versions_skip_calculation() {
        let source = Atom::new(1);
        let runs = Arc::new(AtomicI32::new(0));
        let derivation = doubled(&source, runs.clone());

        derivation.recompute().unwrap();
        derivation.recompute().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(derivation.core.value(), Some(2));

        source.set(4);
        derivation.recompute().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(derivation.core.value(), Some(8));
    }

    #[test]
    fn equal_result_keeps_version() {
        let source = Atom::new(1);
        let parity = Derivation::new(
            StoreKind::Computed,
            (source.clone(),).upstream(),
            bind_infallible((source.clone(),), |(value,)| value % 2),
            Box::new(|a: &i32, b: &i32| a == b),
        );

        parity.recompute().unwrap();
        let version = parity.core.version();

        source.set(3);
        parity.recompute().unwrap();
        assert_eq!(parity.core.version(), version);
        assert!(!parity.is_dirty());
    }

    #[test]
    fn failure_keeps_previous_value_and_dirty_flag() {
        let source = Atom::new(1);
        let sources = (source.clone(),);
        let derivation = Derivation::new(
            StoreKind::Computed,
            sources.upstream(),
            bind(sources, |(value,): (i32,)| {
                if value < 0 {
                    Err(format!("negative input {value}"))
                } else {
                    Ok(value)
                }
            }),
            Box::new(|a: &i32, b: &i32| a == b),
        );

        derivation.recompute().unwrap();
        source.set(-1);
        derivation.invalidate();

        match derivation.recompute() {
            Err(GraphError::DerivationFailed { reason, .. }) => assert_eq!(reason, "negative input -1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(derivation.is_dirty());
        assert_eq!(derivation.core.value(), Some(1));
    }

    #[test]
    fn pending_slot_is_claimed_once() {
        let source = Atom::new(1);
        let derivation = doubled(&source, Arc::new(AtomicI32::new(0)));

        assert!(derivation.claim_pending());
        assert!(!derivation.claim_pending());
        // Inactive: nothing to do even though dirty.
        assert!(!derivation.release_pending());
        assert!(derivation.claim_pending());
    }
}
