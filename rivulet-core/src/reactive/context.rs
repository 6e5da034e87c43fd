//! Evaluation Context
//!
//! Tracks which derived stores are currently being evaluated on this thread.
//!
//! # Implementation
//!
//! We use a thread-local stack of store IDs. Entering a derivation pushes
//! the store, and the returned guard pops it when dropped. Two things fall
//! out of this:
//!
//! - Cycle detection: entering a store that is already on the stack means a
//!   derivation reached itself again, which is reported as
//!   [`GraphError::Cycle`] instead of recursing forever.
//! - Re-entrancy: a store can ask whether it is mid-evaluation and, if so,
//!   only record a change notification instead of recomputing inside its
//!   own calculation.

use std::cell::RefCell;

use super::StoreId;
use crate::error::GraphError;

thread_local! {
    static EVALUATION_STACK: RefCell<Vec<StoreId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the evaluation stack when dropped.
///
/// This keeps the stack balanced even if a calculation panics.
pub(crate) struct EvaluationFrame {
    store: StoreId,
}

impl EvaluationFrame {
    /// Enter the evaluation of `store`.
    pub(crate) fn enter(store: StoreId) -> Result<Self, GraphError> {
        EVALUATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&store) {
                let mut path = stack.clone();
                path.push(store);
                return Err(GraphError::Cycle { path });
            }
            stack.push(store);
            Ok(Self { store })
        })
    }

    /// Check whether `store` is being evaluated right now.
    pub(crate) fn is_evaluating(store: StoreId) -> bool {
        EVALUATION_STACK.with(|stack| stack.borrow().contains(&store))
    }

    #[cfg(test)]
    pub(crate) fn depth() -> usize {
        EVALUATION_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for EvaluationFrame {
    fn drop(&mut self) {
        EVALUATION_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Frames are strictly nested; anything else is a bug.
            debug_assert_eq!(
                popped,
                Some(self.store),
                "EvaluationFrame mismatch: expected {:?}, got {:?}",
                self.store,
                popped
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_tracks_store() {
        let id = StoreId::next();

        assert!(!EvaluationFrame::is_evaluating(id));
        {
            let _frame = EvaluationFrame::enter(id).unwrap();
            assert!(EvaluationFrame::is_evaluating(id));
            assert_eq!(EvaluationFrame::depth(), 1);
        }

        // Frame should be cleaned up after drop
        assert!(!EvaluationFrame::is_evaluating(id));
        assert_eq!(EvaluationFrame::depth(), 0);
    }

    #[test]
    fn nested_frames() {
        let id1 = StoreId::next();
        let id2 = StoreId::next();

        {
            let _outer = EvaluationFrame::enter(id1).unwrap();
            {
                let _inner = EvaluationFrame::enter(id2).unwrap();
                assert_eq!(EvaluationFrame::depth(), 2);
            }

            // After inner frame drops, outer should still be active
            assert!(EvaluationFrame::is_evaluating(id1));
            assert!(!EvaluationFrame::is_evaluating(id2));
        }

        assert_eq!(EvaluationFrame::depth(), 0);
    }

    #[test]
    fn reentering_reports_cycle() {
        let id1 = StoreId::next();
        let id2 = StoreId::next();

        let _outer = EvaluationFrame::enter(id1).unwrap();
        let _inner = EvaluationFrame::enter(id2).unwrap();

        match EvaluationFrame::enter(id1) {
            Err(GraphError::Cycle { path }) => assert_eq!(path, vec![id1, id2, id1]),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("cycle was not detected"),
        }

        // The failed enter must not have pushed anything.
        assert_eq!(EvaluationFrame::depth(), 2);
    }
}
