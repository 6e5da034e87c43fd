//! Rivulet Core
//!
//! This crate provides a reactive value graph. It implements:
//!
//! - Atoms: writable values with change listeners
//! - Computed stores: values derived on read, cached between changes
//! - Batched stores: derived values recomputed once per scheduler tick
//! - Transactions that coalesce notifications
//! - Lifecycle hooks and path/key listener matching for containers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: stores, derivation and transactions
//! - `events`: lifecycle hooks and the path/key listener registry
//! - `scheduler`: the deferred queue that drives batched stores
//!
//! Store handles are `Send + Sync`, but transactions, the evaluation stack
//! and the deferred queue are per thread: each thread drives its own
//! updates.
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{batch, tick, Atom, Batched, Computed};
//!
//! let count = Atom::new(1);
//! let doubled = Computed::new((count.clone(),), |(count,)| count * 2);
//! let total = Batched::new((count.clone(), doubled.clone()), |(c, d)| c + d);
//!
//! let _sub = doubled.subscribe(|value, old| println!("doubled: {old:?} -> {value:?}"));
//! let _total = total.listen(|value, _| println!("total: {value:?}"));
//!
//! batch(|| {
//!     count.set(2);
//!     count.set(3);
//! }); // prints "doubled: Some(2) -> Some(6)" once
//!
//! tick(); // prints "total: Some(9)"
//! assert_eq!(total.get(), Some(9));
//! ```

mod error;

pub mod events;
pub mod reactive;
pub mod scheduler;

pub use error::{GraphError, Result};
pub use reactive::{
    batch, in_transaction, queue_for_transaction, try_batch, Atom, Batched, Computed, SameValue,
    Sources, Store, StoreId, StoreKind, Subscription, Transaction,
};
pub use scheduler::tick;
