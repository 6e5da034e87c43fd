//! Transactions
//!
//! A transaction defers atom notifications until its scope ends, so that a
//! burst of writes produces at most one notification per atom.
//!
//! # How It Works
//!
//! Opening the outermost [`Transaction`] on a thread creates a ledger.
//! Atom writes made while the ledger exists still assign their value, but
//! instead of notifying they record the value the atom had *before the
//! transaction* (the first write wins; later writes keep that original).
//!
//! Nested transactions are inert guards: they neither create nor flush the
//! ledger, so nesting is expressed purely by scope.
//!
//! When the outermost guard commits, atoms whose current value still
//! differs from the recorded original are notified with
//! `(current, original)` in the order they were first written. If the scope
//! is abandoned (a panic unwinds through it, or [`Transaction::abort`]),
//! the ledger is discarded and nothing is notified. Values are never rolled
//! back: transactions control notification timing only.

use std::cell::RefCell;
use std::marker::PhantomData;

use indexmap::IndexMap;

use super::atom::Atom;
use super::store::Store;
use super::subscriber::StoreId;
use crate::error::isolate;

/// A write recorded in the ledger.
trait PendingWrite {
    fn store(&self) -> StoreId;

    /// Whether the atom ended up different from its original value.
    fn changed(&self) -> bool;

    fn emit(&self);
}

struct Recorded<T> {
    atom: Atom<T>,
    original: T,
}

impl<T> PendingWrite for Recorded<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn store(&self) -> StoreId {
        self.atom.id()
    }

    fn changed(&self) -> bool {
        self.atom.differs_from(&self.original)
    }

    fn emit(&self) {
        let current = self.atom.get();
        self.atom.emit(&current, &self.original);
    }
}

#[derive(Default)]
struct Ledger {
    writes: IndexMap<StoreId, Box<dyn PendingWrite>>,
}

thread_local! {
    static LEDGER: RefCell<Option<Ledger>> = const { RefCell::new(None) };
}

fn take_ledger() -> Option<Ledger> {
    LEDGER.with(|ledger| ledger.borrow_mut().take())
}

/// Whether a transaction is open on this thread.
pub fn in_transaction() -> bool {
    LEDGER.with(|ledger| ledger.borrow().is_some())
}

/// Record `original` as the pre-transaction value of `atom`.
///
/// Returns `false` when no transaction is open; the caller must then notify
/// on its own. Only the first call per atom and transaction is kept.
pub fn queue_for_transaction<T>(atom: &Atom<T>, original: T) -> bool
where
    T: Clone + Send + Sync + 'static,
{
    LEDGER.with(|ledger| match ledger.borrow_mut().as_mut() {
        Some(ledger) => {
            ledger
                .writes
                .entry(atom.id())
                .or_insert_with(|| Box::new(Recorded { atom: atom.clone(), original }));
            true
        }
        None => false,
    })
}

/// Scoped transaction guard.
///
/// Dropping the guard commits it, unless the thread is panicking, in which
/// case the pending notifications are discarded.
///
/// ```rust
/// use rivulet_core::{Atom, Transaction};
///
/// let a = Atom::new(0);
/// {
///     let _tx = Transaction::begin();
///     a.set(1);
///     a.set(2);
/// } // listeners of `a` are notified once here
/// assert_eq!(a.get(), 2);
/// ```
#[must_use = "a transaction commits as soon as its guard is dropped"]
pub struct Transaction {
    outermost: bool,
    settled: bool,
    // The ledger is thread-local; the guard must stay on its thread.
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    /// Open a transaction, nested in the current one if any.
    pub fn begin() -> Self {
        let outermost = LEDGER.with(|ledger| {
            let mut ledger = ledger.borrow_mut();
            if ledger.is_some() {
                false
            } else {
                *ledger = Some(Ledger::default());
                true
            }
        });
        if outermost {
            tracing::trace!("transaction opened");
        }

        Self {
            outermost,
            settled: false,
            _not_send: PhantomData,
        }
    }

    /// Whether this guard owns the ledger.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Close the scope and notify changed atoms (outermost guard only).
    pub fn commit(mut self) {
        self.settle(true);
    }

    /// Close the scope without notifying anything.
    ///
    /// Aborting a nested guard has no effect on the enclosing transaction.
    pub fn abort(mut self) {
        self.settle(false);
    }

    fn settle(&mut self, notify: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        if !self.outermost {
            return;
        }

        let Some(ledger) = take_ledger() else {
            return;
        };

        if !notify {
            tracing::debug!(discarded = ledger.writes.len(), "transaction aborted");
            return;
        }

        // Decide what changed before notifying anyone, so listeners that
        // write again cannot affect which atoms are reported.
        let changed: Vec<Box<dyn PendingWrite>> = ledger
            .writes
            .into_values()
            .filter(|write| isolate(write.store(), "equality", || write.changed()).unwrap_or(true))
            .collect();

        tracing::debug!(changed = changed.len(), "transaction committed");
        for write in changed {
            isolate(write.store(), "transaction flush", || write.emit());
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let notify = !std::thread::panicking();
        self.settle(notify);
    }
}

/// Run `f` in a transaction and return its result.
///
/// If `f` panics the panic propagates and no notification is sent, though
/// writes made before the panic stay applied.
pub fn batch<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let tx = Transaction::begin();
    let result = f();
    tx.commit();
    result
}

/// Like [`batch`], but an `Err` from `f` suppresses notification.
pub fn try_batch<R, E, F>(f: F) -> Result<R, E>
where
    F: FnOnce() -> Result<R, E>,
{
    let tx = Transaction::begin();
    match f() {
        Ok(value) => {
            tx.commit();
            Ok(value)
        }
        Err(err) => {
            tx.abort();
            Err(err)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
