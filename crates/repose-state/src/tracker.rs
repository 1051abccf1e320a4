//! Watches over a [`Store`](crate::Store).
//!
//! A [`Tracker`] groups watch entries for one consumer. Each entry caches the
//! last value of its selector and is re-evaluated after every committed
//! transaction; callbacks only fire for relevant changes where the selected
//! value actually differs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::change::{ChangeKind, ChangeRecord};
use crate::dispose::{Dispose, OwnerId};
use crate::panic::isolate;
use crate::path::Path;
use crate::store::{Notify, StoreInner, TrackerKey};

/// How far below the selector's target a change may be and still count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackingScope {
    /// Only assignments to the target itself (or membership changes when the
    /// target is a collection).
    #[default]
    Root,
    /// Anything in the subtree under the target.
    Deep,
}

type SelectFn<T, V> = dyn Fn(&T) -> V + Send + Sync;
pub(crate) type Predicate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;
pub(crate) type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// A derived value of the state, optionally tagged with the path it reads.
///
/// Without a path every committed transaction is considered relevant and
/// only the equality check filters notifications.
pub struct Selector<T, V> {
    path: Option<Path>,
    select: Arc<SelectFn<T, V>>,
}

impl<T, V> Selector<T, V> {
    pub fn new(select: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        Self {
            path: None,
            select: Arc::new(select),
        }
    }

    pub fn at(path: impl Into<Path>, select: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        Self {
            path: Some(path.into()),
            select: Arc::new(select),
        }
    }

    /// Selector over a top-level property.
    pub fn field(name: &'static str, select: impl Fn(&T) -> V + Send + Sync + 'static) -> Self {
        Self::at(Path::field(name), select)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn select(&self, state: &T) -> V {
        (self.select)(state)
    }
}

impl<T, V> Clone for Selector<T, V> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            select: self.select.clone(),
        }
    }
}

impl<T, V> fmt::Debug for Selector<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector").field("path", &self.path).finish()
    }
}

/// Decides whether a transaction's records can affect a selector at `target`.
pub fn is_relevant(target: Option<&Path>, scope: TrackingScope, changes: &[ChangeRecord]) -> bool {
    let Some(target) = target else {
        return !changes.is_empty();
    };
    changes.iter().any(|c| {
        // Replacing a parent replaces everything below it.
        if c.path.is_ancestor_of(target) {
            return true;
        }
        if matches!(c.kind, ChangeKind::Insert | ChangeKind::Remove) && c.path.shifts(target) {
            return true;
        }
        match scope {
            TrackingScope::Root => c.path == *target || c.path.is_slot_of(target),
            TrackingScope::Deep => c.path.starts_with(target),
        }
    })
}

pub(crate) enum Evaluation {
    Unchanged,
    Changed(Option<Notify>),
}

pub(crate) trait WatchSlot<T>: Send + Sync {
    fn id(&self) -> u64;
    fn tracker(&self) -> TrackerKey;
    fn evaluate(&self, state: &T, changes: &[ChangeRecord]) -> Evaluation;
}

static NEXT_WATCH: AtomicU64 = AtomicU64::new(1);

pub(crate) struct WatchEntry<T, V> {
    id: u64,
    tracker: TrackerKey,
    selector: Selector<T, V>,
    predicate: Option<Predicate<V>>,
    callback: Option<Callback<V>>,
    scope: TrackingScope,
    last: Mutex<V>,
}

impl<T, V> WatchSlot<T> for WatchEntry<T, V>
where
    T: Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn tracker(&self) -> TrackerKey {
        self.tracker
    }

    fn evaluate(&self, state: &T, changes: &[ChangeRecord]) -> Evaluation {
        if !is_relevant(self.selector.path(), self.scope, changes) {
            return Evaluation::Unchanged;
        }
        let next = self.selector.select(state);
        {
            let mut last = self.last.lock();
            if *last == next {
                return Evaluation::Unchanged;
            }
            *last = next.clone();
        }
        if let Some(pred) = &self.predicate
            && !pred(&next)
        {
            return Evaluation::Unchanged;
        }
        let notify = self.callback.clone().map(|cb| {
            Box::new(move || {
                isolate("watch callback", || cb(&next));
            }) as Notify
        });
        Evaluation::Changed(notify)
    }
}

/// A consumer's set of watches over one store.
pub struct Tracker<T> {
    store: Weak<StoreInner<T>>,
    key: TrackerKey,
    owner: Option<OwnerId>,
}

impl<T> Clone for Tracker<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key,
            owner: self.owner,
        }
    }
}

impl<T> Tracker<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(store: Weak<StoreInner<T>>, key: TrackerKey, owner: Option<OwnerId>) -> Self {
        Self { store, key, owner }
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    /// Watch `selector`; `callback` receives each new value.
    pub fn watch<V>(
        &self,
        selector: Selector<T, V>,
        callback: impl Fn(&V) + Send + Sync + 'static,
        scope: TrackingScope,
    ) -> Dispose
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.register(selector, None, Some(Arc::new(callback)), scope)
    }

    /// Like [`Tracker::watch`], but the callback only runs when `predicate`
    /// accepts the new value.
    pub fn watch_when<V>(
        &self,
        selector: Selector<T, V>,
        predicate: impl Fn(&V) -> bool + Send + Sync + 'static,
        callback: impl Fn(&V) + Send + Sync + 'static,
        scope: TrackingScope,
    ) -> Dispose
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.register(selector, Some(Arc::new(predicate)), Some(Arc::new(callback)), scope)
    }

    /// Watch without a callback; changes only reach `on_change` listeners.
    pub fn observe<V>(&self, selector: Selector<T, V>, scope: TrackingScope) -> Dispose
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        self.register(selector, None, None, scope)
    }

    /// Runs once per transaction in which any of this tracker's watches changed.
    pub fn on_change(&self, listener: impl Fn() + Send + Sync + 'static) {
        if let Some(store) = self.store.upgrade() {
            store.add_change_listener(self.key, Arc::new(listener));
        }
    }

    pub(crate) fn register<V>(
        &self,
        selector: Selector<T, V>,
        predicate: Option<Predicate<V>>,
        callback: Option<Callback<V>>,
        scope: TrackingScope,
    ) -> Dispose
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        let Some(store) = self.store.upgrade() else {
            log::warn!("watch registered on a dropped store; ignoring");
            return Dispose::noop();
        };
        let id = NEXT_WATCH.fetch_add(1, Ordering::Relaxed);
        let tracker = self.key;
        let inserted = store.insert_watch(tracker, |state| {
            Arc::new(WatchEntry {
                id,
                tracker,
                last: Mutex::new(selector.select(state)),
                selector,
                predicate,
                callback,
                scope,
            }) as Arc<dyn WatchSlot<T>>
        });
        if !inserted {
            return Dispose::noop();
        }
        let weak = self.store.clone();
        Dispose::new(move || {
            if let Some(store) = weak.upgrade() {
                store.remove_watch(id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.store
            .upgrade()
            .map(|s| s.tracker_watch_count(self.key))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.store
            .upgrade()
            .is_none_or(|s| !s.has_tracker(self.key))
    }

    /// Drops every watch and listener of this tracker in one step.
    pub fn dispose(&self) {
        if let Some(store) = self.store.upgrade() {
            store.remove_tracker(self.key);
        }
    }
}

impl<T> fmt::Debug for Tracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}
