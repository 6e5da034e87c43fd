//! Deferred Queue
//!
//! Batched stores do not recompute inside the write that invalidated them.
//! They enqueue one task here and the task runs at the next checkpoint,
//! which is whenever the host calls [`tick`].
//!
//! # Algorithm
//!
//! The queue is a thread-local FIFO. `tick` pops and runs tasks until the
//! queue is empty, so tasks enqueued by a running task (a batched store
//! feeding another batched store) are drained within the same tick. A
//! nested `tick` call from inside a task returns immediately; the outer
//! drain picks up anything left.
//!
//! There are no timers: nothing runs until `tick` is called.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Task>> = const { RefCell::new(VecDeque::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Enqueue a task for the next checkpoint.
pub(crate) fn defer<F>(task: F)
where
    F: FnOnce() + 'static,
{
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(task)));
}

/// Number of tasks waiting for the next checkpoint.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

/// Resets the draining flag even if a task unwinds.
struct DrainGuard;

impl DrainGuard {
    fn acquire() -> Option<Self> {
        DRAINING.with(|draining| {
            if draining.replace(true) {
                None
            } else {
                Some(DrainGuard)
            }
        })
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

/// Run every deferred task, including ones enqueued while draining.
///
/// Returns the number of tasks that ran.
pub fn tick() -> usize {
    let Some(_guard) = DrainGuard::acquire() else {
        return 0;
    };

    let mut ran = 0;
    loop {
        // Pop in its own statement so the queue is not borrowed while the
        // task runs; tasks enqueue more work.
        let next = QUEUE.with(|queue| queue.borrow_mut().pop_front());
        let Some(task) = next else {
            break;
        };
        task();
        ran += 1;
    }

    if ran > 0 {
        tracing::trace!(tasks = ran, "deferred queue drained");
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn tasks_wait_for_tick() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        defer(move || log_clone.borrow_mut().push(1));

        assert_eq!(pending(), 1);
        assert!(log.borrow().is_empty());

        assert_eq!(tick(), 1);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn tasks_enqueued_while_draining_run_in_same_tick() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        defer(move || {
            outer.borrow_mut().push("first");
            let inner = outer.clone();
            defer(move || inner.borrow_mut().push("second"));
        });

        assert_eq!(tick(), 2);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn nested_tick_is_a_no_op() {
        let nested = Rc::new(Cell::new(usize::MAX));
        let nested_clone = nested.clone();
        defer(move || nested_clone.set(tick()));
        defer(|| {});

        assert_eq!(tick(), 2);
        assert_eq!(nested.get(), 0);
    }
}
