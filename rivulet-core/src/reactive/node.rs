//! Type-erased view of a store as seen by the stores derived from it.
//!
//! A derived store keeps its sources as a list of [`Upstream`] values. The
//! variant says how a source may be brought up to date before it is read:
//! atoms are always current, computed stores can be refreshed on the spot,
//! and batched stores cannot be forced, so a dirty one aborts the read.

use std::sync::Arc;

use super::derive::report;
use super::store::StoreKind;
use super::subscriber::{StoreId, Subscription};
use crate::error::{GraphError, Result};

/// Change callback registered by a dependent store.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Operations every store exposes to its dependents.
pub trait Node: Send + Sync {
    fn id(&self) -> StoreId;

    /// Bumped whenever the store's value changes.
    fn version(&self) -> u64;

    /// Register `on_change` as a value listener without an initial call.
    fn watch(self: Arc<Self>, on_change: ChangeCallback) -> Subscription;
}

/// Extra operations of computed and batched stores.
pub trait DerivedNode: Node {
    /// Bring the cached value up to date, recomputing if needed.
    fn refresh(&self) -> Result<()>;

    fn is_dirty(&self) -> bool;
}

/// A source of a derived store.
#[derive(Clone)]
pub enum Upstream {
    Atom(Arc<dyn Node>),
    Computed(Arc<dyn DerivedNode>),
    Batched(Arc<dyn DerivedNode>),
}

impl Upstream {
    pub fn id(&self) -> StoreId {
        match self {
            Upstream::Atom(node) => node.id(),
            Upstream::Computed(node) | Upstream::Batched(node) => node.id(),
        }
    }

    pub fn kind(&self) -> StoreKind {
        match self {
            Upstream::Atom(_) => StoreKind::Atom,
            Upstream::Computed(_) => StoreKind::Computed,
            Upstream::Batched(_) => StoreKind::Batched,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Upstream::Atom(node) => node.version(),
            Upstream::Computed(node) | Upstream::Batched(node) => node.version(),
        }
    }

    pub fn watch(&self, on_change: ChangeCallback) -> Subscription {
        match self {
            Upstream::Atom(node) => Arc::clone(node).watch(on_change),
            Upstream::Computed(node) | Upstream::Batched(node) => Arc::clone(node).watch(on_change),
        }
    }

    /// Make the source's cached value current, or report why it can't be.
    ///
    /// A computed source whose calculation fails is read like `get` reads
    /// it: through its last good value.
    pub fn resolve(&self) -> Result<()> {
        match self {
            Upstream::Atom(_) => Ok(()),
            Upstream::Computed(node) => match node.refresh() {
                Err(err @ GraphError::DerivationFailed { .. }) => {
                    report(node.id(), &err);
                    Ok(())
                }
                other => other,
            },
            Upstream::Batched(node) if node.is_dirty() => Err(GraphError::Stale { store: node.id() }),
            Upstream::Batched(_) => Ok(()),
        }
    }
}
