//! Path and key listeners.
//!
//! Containers that hold structured values (objects, nested maps) report
//! *which part* of their value changed by calling [`emit_path_change`] with
//! the changed [`Path`] and a JSON snapshot of the whole value. This module
//! only does the matching:
//!
//! - a path listener fires when its registered path is a prefix of, or
//!   equal to, the changed path;
//! - a key listener fires when the first segment of the changed path is one
//!   of its keys.
//!
//! Matching is strict: a change to the root (empty path) reaches only
//! listeners registered on the root, and no key listener.
//!
//! # Registry
//!
//! Listeners live in a global registry indexed by [`StoreId`]. The registry
//! holds no store handles, so it never keeps a store alive; the entries of
//! a store are swept when the store is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::isolate;
use crate::reactive::{ListenerId, Store, StoreId, Subscription};

/// One step into a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array position.
    Index(usize),
    /// Object key.
    Key(String),
}

impl From<&str> for PathSegment {
    /// Digit-only strings become indices.
    fn from(segment: &str) -> Self {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = segment.parse() {
                return PathSegment::Index(index);
            }
        }
        PathSegment::Key(segment.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

/// A normalized location inside a structured value.
///
/// ```rust
/// use rivulet_core::events::{Path, PathSegment};
///
/// let path = Path::parse("user.address[0].zip");
/// assert_eq!(path.segments(), &[
///     PathSegment::Key("user".into()),
///     PathSegment::Key("address".into()),
///     PathSegment::Index(0),
///     PathSegment::Key("zip".into()),
/// ]);
/// assert_eq!(path.to_string(), "user.address[0].zip");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(SmallVec<[PathSegment; 4]>);

impl Path {
    /// The empty path, denoting the whole value.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse dotted / bracketed notation: `a.b[0].c`, `a.0.c` and
    /// `a[0][1]` are all accepted. Empty segments are skipped.
    pub fn parse(input: &str) -> Self {
        input
            .split(['.', '[', ']'])
            .filter(|segment| !segment.is_empty())
            .map(PathSegment::from)
            .collect()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first segment, if any.
    pub fn head(&self) -> Option<&PathSegment> {
        self.0.first()
    }

    /// Append a segment.
    pub fn push(&mut self, segment: impl Into<PathSegment>) {
        self.0.push(segment.into());
    }

    /// Whether `self` is a prefix of (or equal to) `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Look the path up in `value`.
    ///
    /// Keys index objects; indices index arrays, and objects by their
    /// decimal form.
    pub fn value_in<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(value, |current, segment| match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            _ => None,
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Index(index) => write!(f, "[{index}]")?,
                PathSegment::Key(key) if position == 0 => f.write_str(key)?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
            }
        }
        Ok(())
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl From<&str> for Path {
    fn from(input: &str) -> Self {
        Path::parse(input)
    }
}

impl From<String> for Path {
    fn from(input: String) -> Self {
        Path::parse(&input)
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Path(SmallVec::from_vec(segments))
    }
}

/// Each element is one segment, taken literally except for digit-only
/// strings.
impl<const N: usize> From<[&str; N]> for Path {
    fn from(segments: [&str; N]) -> Self {
        segments.into_iter().map(PathSegment::from).collect()
    }
}

/// What a path or key listener receives.
#[derive(Debug, Clone, Copy)]
pub struct PathEvent<'a> {
    /// The value at the changed path inside the snapshot.
    pub value: Option<&'a Value>,
    /// The changed path.
    pub path: &'a Path,
    /// The whole value after the change.
    pub snapshot: &'a Value,
}

type PathCallback = Arc<dyn Fn(PathEvent<'_>) + Send + Sync>;

enum Matcher {
    Path(Path),
    Keys(Vec<String>),
}

impl Matcher {
    fn matches(&self, changed: &Path) -> bool {
        match self {
            Matcher::Path(path) => path.is_prefix_of(changed),
            Matcher::Keys(keys) => match changed.head() {
                Some(PathSegment::Key(head)) => keys.iter().any(|key| key == head),
                Some(PathSegment::Index(head)) => {
                    let head = head.to_string();
                    keys.iter().any(|key| *key == head)
                }
                None => false,
            },
        }
    }
}

struct Entry {
    matcher: Matcher,
    callback: PathCallback,
}

type Listeners = HashMap<StoreId, IndexMap<ListenerId, Entry>>;

// Indexed by store ID so the registry never extends a store's lifetime.
static REGISTRY: OnceLock<RwLock<Listeners>> = OnceLock::new();

fn registry() -> &'static RwLock<Listeners> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn register(store: StoreId, matcher: Matcher, callback: PathCallback) -> Subscription {
    let id = ListenerId::next();
    registry()
        .write()
        .entry(store)
        .or_default()
        .insert(id, Entry { matcher, callback });

    Subscription::new(move || unregister(store, id))
}

fn unregister(store: StoreId, id: ListenerId) {
    let removed = {
        let mut listeners = registry().write();
        let Some(entries) = listeners.get_mut(&store) else {
            return;
        };
        let removed = entries.shift_remove(&id);
        if entries.is_empty() {
            listeners.remove(&store);
        }
        removed
    };
    // The callback may own the last handle of a store, whose drop
    // re-enters the registry.
    drop(removed);
}

/// Drop every listener registered against `store`.
pub(crate) fn forget(store: StoreId) {
    let Some(registry) = REGISTRY.get() else {
        return;
    };
    let removed = registry.write().remove(&store);
    if let Some(entries) = removed {
        tracing::trace!(%store, listeners = entries.len(), "path listeners swept");
    }
}

/// Listen for changes at or below `path` inside `store`'s value.
pub fn listen_path<S, P, F>(store: &S, path: P, listener: F) -> Subscription
where
    S: Store,
    P: Into<Path>,
    F: Fn(PathEvent<'_>) + Send + Sync + 'static,
{
    register(store.id(), Matcher::Path(path.into()), Arc::new(listener))
}

/// Listen for changes whose top-level key is one of `keys`.
pub fn listen_keys<S, I, K, F>(store: &S, keys: I, listener: F) -> Subscription
where
    S: Store,
    I: IntoIterator<Item = K>,
    K: Into<String>,
    F: Fn(PathEvent<'_>) + Send + Sync + 'static,
{
    let keys = keys.into_iter().map(Into::into).collect();
    register(store.id(), Matcher::Keys(keys), Arc::new(listener))
}

/// Report that `changed` changed inside `store`'s value and fire every
/// matching listener, in registration order.
///
/// Returns the number of listeners fired.
pub fn emit_path_change<S, P>(store: &S, changed: P, snapshot: &Value) -> usize
where
    S: Store,
    P: Into<Path>,
{
    let changed = changed.into();
    let store = store.id();

    let matching: Vec<PathCallback> = match registry().read().get(&store) {
        Some(entries) => entries
            .values()
            .filter(|entry| entry.matcher.matches(&changed))
            .map(|entry| entry.callback.clone())
            .collect(),
        None => Vec::new(),
    };
    if matching.is_empty() {
        return 0;
    }

    tracing::trace!(%store, path = %changed, listeners = matching.len(), "path change");
    let event = PathEvent {
        value: changed.value_in(snapshot),
        path: &changed,
        snapshot,
    };
    for callback in &matching {
        isolate(store, "path listener", || callback(event));
    }
    matching.len()
}
