//! Lifecycle hooks.
//!
//! Hooks are attached to a store independently of its value listeners:
//!
//! - **activate**: the store gained its first listener. The hook may
//!   return a cleanup (see [`ActivateOutcome`]) that runs on the matching
//!   deactivation.
//! - **deactivate**: the store lost its last listener.
//! - **pre-write**: an atom is about to notify about a write (atoms only).
//! - **post-notify**: listeners were just notified about a change.
//! - **mount**: like activate, but the hook may return a cleanup that runs
//!   on the matching deactivation.
//!
//! Each attach function returns a [`Subscription`] that detaches the hook.
//! Hooks run in attach order and are isolated from each other's panics.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::isolate;
use crate::reactive::{Atom, ListenerId, Store, StoreId, Subscription};

/// Cleanup returned by a mount hook, run on deactivation.
pub type Cleanup = Box<dyn FnOnce() + Send>;

type Hooks<F> = Arc<Mutex<IndexMap<ListenerId, Arc<F>>>>;

/// An ordered set of hooks of one kind.
struct HookSet<F: ?Sized> {
    hooks: Hooks<F>,
}

impl<F> HookSet<F>
where
    F: ?Sized + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            hooks: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    fn insert(&self, hook: Arc<F>) -> Subscription {
        let id = ListenerId::next();
        self.hooks.lock().insert(id, hook);

        let hooks: Weak<Mutex<IndexMap<ListenerId, Arc<F>>>> = Arc::downgrade(&self.hooks);
        Subscription::new(move || {
            if let Some(hooks) = hooks.upgrade() {
                hooks.lock().shift_remove(&id);
            }
        })
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.hooks.lock().values().cloned().collect()
    }
}

type ActivateHook = dyn Fn() -> Option<Cleanup> + Send + Sync;
type DeactivateHook = dyn Fn() + Send + Sync;
type PreWriteHook<T> = dyn Fn(&T, &T) + Send + Sync;
type PostNotifyHook<T> = dyn Fn(Option<&T>, Option<&T>) + Send + Sync;
type MountHook = dyn Fn() -> Option<Cleanup> + Send + Sync;

/// The lifecycle hook sets of one store.
pub struct Lifecycle<T> {
    activate: HookSet<ActivateHook>,
    deactivate: HookSet<DeactivateHook>,
    pre_write: HookSet<PreWriteHook<T>>,
    post_notify: HookSet<PostNotifyHook<T>>,
    mount: HookSet<MountHook>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl<T> Lifecycle<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            activate: HookSet::new(),
            deactivate: HookSet::new(),
            pre_write: HookSet::new(),
            post_notify: HookSet::new(),
            mount: HookSet::new(),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Run activate hooks, then mount hooks, keeping their cleanups.
    pub(crate) fn fire_activate(&self, store: StoreId) {
        tracing::debug!(%store, "store activated");
        for hook in self.activate.snapshot() {
            if let Some(Some(cleanup)) = isolate(store, "activate hook", || hook()) {
                self.cleanups.lock().push(cleanup);
            }
        }
        for hook in self.mount.snapshot() {
            if let Some(Some(cleanup)) = isolate(store, "mount hook", || hook()) {
                self.cleanups.lock().push(cleanup);
            }
        }
    }

    /// Run deactivate hooks, then the cleanups collected on activation.
    pub(crate) fn fire_deactivate(&self, store: StoreId) {
        tracing::debug!(%store, "store deactivated");
        for hook in self.deactivate.snapshot() {
            isolate(store, "deactivate hook", || hook());
        }
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            isolate(store, "activation cleanup", cleanup);
        }
    }

    pub(crate) fn fire_pre_write(&self, store: StoreId, new: &T, old: &T) {
        for hook in self.pre_write.snapshot() {
            isolate(store, "pre-write hook", || hook(new, old));
        }
    }

    pub(crate) fn fire_post_notify(&self, store: StoreId, new: Option<&T>, old: Option<&T>) {
        for hook in self.post_notify.snapshot() {
            isolate(store, "post-notify hook", || hook(new, old));
        }
    }
}

impl<T> Default for Lifecycle<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// What an activate hook may return: nothing, or a cleanup to run when
/// the store deactivates.
pub trait ActivateOutcome {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl ActivateOutcome for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl ActivateOutcome for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

impl ActivateOutcome for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

/// Run `hook` whenever `store` gains its first listener.
///
/// A returned [`Cleanup`] runs after the deactivate hooks of the matching
/// deactivation.
pub fn on_activate<S, F, R>(store: &S, hook: F) -> Subscription
where
    S: Store,
    F: Fn() -> R + Send + Sync + 'static,
    R: ActivateOutcome,
{
    let hook: Arc<ActivateHook> = Arc::new(move || hook().into_cleanup());
    store.lifecycle().activate.insert(hook)
}

/// Run `hook` whenever `store` loses its last listener.
pub fn on_deactivate<S, F>(store: &S, hook: F) -> Subscription
where
    S: Store,
    F: Fn() + Send + Sync + 'static,
{
    store.lifecycle().deactivate.insert(Arc::new(hook))
}

/// Run `hook` with `(new, old)` before listeners of `atom` are notified.
pub fn on_pre_write<T, F>(atom: &Atom<T>, hook: F) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T, &T) + Send + Sync + 'static,
{
    atom.lifecycle().pre_write.insert(Arc::new(hook))
}

/// Run `hook` with `(new, old)` after listeners of `store` were notified.
pub fn on_post_notify<S, F>(store: &S, hook: F) -> Subscription
where
    S: Store,
    F: Fn(Option<&S::Value>, Option<&S::Value>) + Send + Sync + 'static,
{
    store.lifecycle().post_notify.insert(Arc::new(hook))
}

/// Run `init` on activation; a returned cleanup runs on deactivation.
///
/// Mount hooks attached while the store is already active take effect on
/// its next activation.
pub fn on_mount<S, F>(store: &S, init: F) -> Subscription
where
    S: Store,
    F: Fn() -> Option<Cleanup> + Send + Sync + 'static,
{
    store.lifecycle().mount.insert(Arc::new(init))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counter() -> (Arc<AtomicI32>, impl Fn() + Send + Sync + 'static) {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        (calls, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn activate_and_deactivate_follow_listener_count() {
        let atom = Atom::new(0);
        let (activations, on_first) = counter();
        let (deactivations, on_last) = counter();
        let _a = on_activate(&atom, on_first);
        let _d = on_deactivate(&atom, on_last);

        let first = atom.subscribe(|_, _| {});
        let second = atom.subscribe(|_, _| {});
        assert_eq!(activations.load(Ordering::SeqCst), 1);

        first.unsubscribe();
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);
        second.unsubscribe();
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mount_cleanup_runs_on_deactivation() {
        let atom = Atom::new(0);
        let (cleanups, cleanup) = counter();
        let cleanup = Arc::new(cleanup);
        let _m = on_mount(&atom, move || {
            let cleanup = cleanup.clone();
            Some(Box::new(move || cleanup()) as Cleanup)
        });

        let subscription = atom.subscribe(|_, _| {});
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);

        subscription.unsubscribe();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        // Each activation gets its own cleanup.
        let again = atom.subscribe(|_, _| {});
        again.unsubscribe();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn activate_cleanup_runs_on_last_unsubscribe() {
        let atom = Atom::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let activate_log = log.clone();
        let _a = on_activate(&atom, move || {
            activate_log.lock().push("activate");
            let cleanup_log = activate_log.clone();
            Some(Box::new(move || cleanup_log.lock().push("cleanup")) as Cleanup)
        });
        let deactivate_log = log.clone();
        let _d = on_deactivate(&atom, move || deactivate_log.lock().push("deactivate"));

        let first = atom.subscribe(|_, _| {});
        let second = atom.subscribe(|_, _| {});
        first.unsubscribe();
        assert_eq!(*log.lock(), vec!["activate"]);

        second.unsubscribe();
        assert_eq!(*log.lock(), vec!["activate", "deactivate", "cleanup"]);

        // The cleanup belongs to one activation only.
        drop(atom.subscribe(|_, _| {}));
        assert_eq!(log.lock().iter().filter(|entry| **entry == "cleanup").count(), 2);
    }

    #[test]
    fn detached_hooks_stop_firing() {
        let atom = Atom::new(0);
        let (activations, on_first) = counter();
        let hook = on_activate(&atom, on_first);

        drop(atom.subscribe(|_, _| {}));
        hook.unsubscribe();
        drop(atom.subscribe(|_, _| {}));

        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pre_write_and_post_notify_bracket_listeners() {
        let atom = Atom::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        let pre_log = log.clone();
        let _pre = on_pre_write(&atom, move |new, old| pre_log.lock().push(format!("pre {new} {old}")));
        let listener_log = log.clone();
        let _sub = atom.listen(move |new, _| listener_log.lock().push(format!("listener {new}")));
        let post_log = log.clone();
        let _post = on_post_notify(&atom, move |new, old| {
            post_log.lock().push(format!("post {:?} {:?}", new, old));
        });

        atom.set(2);
        assert_eq!(
            *log.lock(),
            vec!["pre 2 1", "listener 2", "post Some(2) Some(1)"]
        );
    }

    #[test]
    fn panicking_hook_is_isolated() {
        let atom = Atom::new(0);
        fn failing_hook() {
            panic!("hook failure");
        }
        let _bad = on_activate(&atom, failing_hook);
        let (activations, on_first) = counter();
        let _good = on_activate(&atom, on_first);

        let _sub = atom.subscribe(|_, _| {});
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }
}
