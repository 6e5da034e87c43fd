//! Error types for the reactive graph.
//!
//! Nothing in the graph is fatal. Listener panics are caught and logged,
//! failed derivations leave the previous value in place, and transaction
//! bodies that fail simply suppress notification. The variants below are
//! what the fallible entry points (`Computed::try_get`, `try_batch`) surface.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::reactive::StoreId;

/// Errors produced while deriving values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A derivation re-entered a store that is already being evaluated.
    ///
    /// The path lists the stores on the evaluation stack, ending with the
    /// store that closed the loop.
    #[error("dependency cycle detected: {}", join_path(.path))]
    Cycle {
        /// Stores forming the cycle, outermost first.
        path: Vec<StoreId>,
    },

    /// A source has no settled value yet (a dirty batched store, or a
    /// derived store that has never been computed).
    #[error("{store} has no settled value yet")]
    Stale {
        /// The store that could not be resolved.
        store: StoreId,
    },

    /// The calculation panicked or returned an error.
    #[error("derivation of {store} failed: {reason}")]
    DerivationFailed {
        /// The derived store whose calculation failed.
        store: StoreId,
        /// Panic payload or error message.
        reason: String,
    },
}

/// Convenience alias used across the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;

fn join_path(path: &[StoreId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Run user code, swallowing a panic.
///
/// Returns `None` if `f` panicked. The panic is logged against `store` so a
/// failing listener can still be traced back to where it was registered.
pub(crate) fn isolate<R>(store: StoreId, what: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::warn!(
                %store,
                callback = what,
                panic = %panic_message(payload.as_ref()),
                "callback panicked; ignoring"
            );
            None
        }
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
