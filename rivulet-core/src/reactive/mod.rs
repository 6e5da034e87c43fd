//! Reactive Primitives
//!
//! This module implements the value graph: atoms, computed stores and
//! batched stores, plus transactions that group atom writes.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is a container for mutable state and the only store that can be
//! written. Writing a value that is equal to the current one (by the atom's
//! equality) is a no-op.
//!
//! ## Computed
//!
//! A Computed store derives its value from an explicit list of sources. It
//! is lazy: nothing runs until the value is read or someone subscribes.
//! While observed it recomputes as soon as a source changes.
//!
//! ## Batched
//!
//! A Batched store derives its value the same way, but recomputes on the
//! deferred queue, so any number of source changes between two
//! [`tick`](crate::scheduler::tick)s cost one recomputation.
//!
//! ## Transactions
//!
//! [`batch`] (or a [`Transaction`] guard) holds back atom notifications
//! until the outermost scope closes, then notifies each changed atom once
//! with its pre-transaction value as `old`.
//!
//! # Implementation Notes
//!
//! Dependencies are explicit: a derived store subscribes to its sources
//! only while it has listeners of its own, and releases them when the last
//! listener leaves. Unobserved stores hold no subscriptions and re-check
//! their sources' versions on read.

mod atom;
mod batched;
mod computed;
mod context;
mod derive;
mod equality;
mod node;
mod sources;
mod store;
mod subscriber;
mod transaction;

pub use atom::Atom;
pub use batched::Batched;
pub use computed::Computed;
pub use equality::SameValue;
pub use sources::Sources;
pub use store::{Store, StoreKind};
pub use subscriber::{StoreId, Subscription};
pub use transaction::{batch, in_transaction, queue_for_transaction, try_batch, Transaction};

pub(crate) use subscriber::ListenerId;
