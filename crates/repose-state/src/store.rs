use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::change::ChangeRecord;
use crate::dispose::OwnerId;
use crate::error::StateError;
use crate::panic::{isolate, panic_message};
use crate::proxy::{Proxy, Tracked};
use crate::tracker::{Evaluation, Tracker, WatchSlot};

new_key_type! {
    pub struct TrackerKey;
}

pub(crate) type Notify = Box<dyn FnOnce() + Send>;
type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

static NEXT_STORE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Stores with a transaction open on this thread.
    static OPEN_TXNS: RefCell<SmallVec<[StoreId; 4]>> = RefCell::new(SmallVec::new());
}

struct TxnGuard(StoreId);

impl TxnGuard {
    fn enter(id: StoreId) -> Result<Self, StateError> {
        OPEN_TXNS.with(|open| {
            let mut open = open.borrow_mut();
            if open.contains(&id) {
                return Err(StateError::TransactionMisuse { store: id });
            }
            open.push(id);
            Ok(TxnGuard(id))
        })
    }
}

impl Drop for TxnGuard {
    fn drop(&mut self) {
        OPEN_TXNS.with(|open| {
            let mut open = open.borrow_mut();
            if let Some(pos) = open.iter().rposition(|id| *id == self.0) {
                open.remove(pos);
            }
        });
    }
}

/// Result of a transaction.
#[derive(Debug)]
pub struct Updated<R> {
    /// Whatever the mutator returned.
    pub value: R,
    /// Store version after the transaction.
    pub version: u64,
    /// Records collected by the transaction; empty if nothing changed.
    pub changes: Arc<[ChangeRecord]>,
}

impl<R> Updated<R> {
    pub fn committed(&self) -> bool {
        !self.changes.is_empty()
    }
}

struct TrackerSlot {
    owner: Option<OwnerId>,
    listeners: Vec<Listener>,
}

struct Watchers<T> {
    trackers: SlotMap<TrackerKey, TrackerSlot>,
    // Registration order.
    entries: Vec<Arc<dyn WatchSlot<T>>>,
}

/// Callbacks waiting to run, in commit order. At most one thread drains at
/// a time.
#[derive(Default)]
struct Delivery {
    queue: VecDeque<Notify>,
    draining: bool,
}

pub(crate) struct StoreInner<T> {
    id: StoreId,
    txn: Mutex<()>,
    current: RwLock<Arc<T>>,
    version: AtomicU64,
    watchers: Mutex<Watchers<T>>,
    delivery: Mutex<Delivery>,
}

/// Owner of one change-tracked state value.
///
/// Reads hand out immutable snapshots; the only way to change the value is
/// [`Store::update`], which runs the mutator against a [`Proxy`], commits the
/// recorded changes and re-evaluates the watches of every [`Tracker`].
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default + Clone + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Store<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: StoreId(NEXT_STORE.fetch_add(1, Ordering::Relaxed)),
                txn: Mutex::new(()),
                current: RwLock::new(Arc::new(value)),
                version: AtomicU64::new(0),
                watchers: Mutex::new(Watchers {
                    trackers: SlotMap::with_key(),
                    entries: Vec::new(),
                }),
                delivery: Mutex::new(Delivery::default()),
            }),
        }
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Snapshot of the last committed value.
    pub fn value(&self) -> Arc<T> {
        self.inner.current.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value())
    }

    /// Number of committed transactions.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Runs one transaction.
    ///
    /// The mutator edits a private copy through a [`Proxy`]. If it recorded
    /// anything the copy becomes the new value and the version is bumped;
    /// then every watch is evaluated against that snapshot and the resulting
    /// callbacks are queued behind those of earlier commits.
    ///
    /// Callbacks run outside the transaction lock, always in commit order. The
    /// calling thread delivers the queue unless another thread is already
    /// doing so, in which case that thread also delivers this commit's
    /// callbacks and `update` may return before they ran. A callback that
    /// calls `update` on the same store has its own callbacks delivered after
    /// it returns.
    ///
    /// A panic in the mutator leaves the store untouched.
    pub fn update<R>(
        &self,
        mutator: impl FnOnce(&mut Proxy<'_, T>) -> R,
    ) -> Result<Updated<R>, StateError> {
        let updated = {
            let _open = TxnGuard::enter(self.inner.id)?;
            let _txn = self.inner.txn.lock();

            let mut working = Tracked::new(T::clone(&self.value()));
            let value = {
                let mut proxy = working.edit();
                mutator(&mut proxy)
            };
            let changes: Arc<[ChangeRecord]> = working.take_changes().into();
            if changes.is_empty() {
                let updated = Updated {
                    value,
                    version: self.version(),
                    changes,
                };
                return Ok(updated);
            }

            let snapshot = Arc::new(working.into_inner());
            *self.inner.current.write() = snapshot.clone();
            let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
            log::debug!(
                "{} committed v{version} ({} change(s))",
                self.inner.id,
                changes.len()
            );

            let notify = self.inner.evaluate(&snapshot, &changes);
            self.inner.delivery.lock().queue.extend(notify);
            Updated {
                value,
                version,
                changes,
            }
        };

        self.inner.deliver();
        Ok(updated)
    }

    /// Whole-value transaction: `f` builds the next state from the current one.
    pub fn replace_with(&self, f: impl FnOnce(&T) -> T) -> Result<Updated<()>, StateError> {
        self.update(|p| {
            let next = f(p.get());
            p.replace(next);
        })
    }

    pub fn create_tracker(&self) -> Tracker<T> {
        self.make_tracker(None)
    }

    pub fn tracker_for(&self, owner: OwnerId) -> Tracker<T> {
        self.make_tracker(Some(owner))
    }

    fn make_tracker(&self, owner: Option<OwnerId>) -> Tracker<T> {
        let key = self.inner.watchers.lock().trackers.insert(TrackerSlot {
            owner,
            listeners: Vec::new(),
        });
        Tracker::new(Arc::downgrade(&self.inner), key, owner)
    }

    /// Removes every tracker (and its watches) registered for `owner`.
    pub fn unwatch_owner(&self, owner: OwnerId) -> usize {
        let mut w = self.inner.watchers.lock();
        let keys: SmallVec<[TrackerKey; 4]> = w
            .trackers
            .iter()
            .filter(|(_, slot)| slot.owner == Some(owner))
            .map(|(k, _)| k)
            .collect();
        for k in &keys {
            w.trackers.remove(*k);
        }
        let before = w.entries.len();
        w.entries.retain(|e| !keys.contains(&e.tracker()));
        before - w.entries.len()
    }

    /// Live watch entries across all trackers.
    pub fn watch_count(&self) -> usize {
        self.inner.watchers.lock().entries.len()
    }

    pub fn tracker_count(&self) -> usize {
        self.inner.watchers.lock().trackers.len()
    }
}

impl<T> StoreInner<T>
where
    T: Send + Sync + 'static,
{
    /// Evaluates every entry against one post-commit snapshot and returns the
    /// callbacks to run, in registration order, followed by tracker listeners.
    fn evaluate(&self, snapshot: &T, changes: &[ChangeRecord]) -> Vec<Notify> {
        let entries = self.watchers.lock().entries.clone();

        let mut notify = Vec::new();
        let mut touched: SmallVec<[TrackerKey; 4]> = SmallVec::new();
        for entry in &entries {
            let eval = catch_unwind(AssertUnwindSafe(|| entry.evaluate(snapshot, changes)));
            match eval {
                Ok(Evaluation::Unchanged) => {}
                Ok(Evaluation::Changed(callback)) => {
                    notify.extend(callback);
                    if !touched.contains(&entry.tracker()) {
                        touched.push(entry.tracker());
                    }
                }
                Err(err) => {
                    log::error!(
                        "selector of watch #{} panicked: {}",
                        entry.id(),
                        panic_message(err.as_ref())
                    );
                }
            }
        }

        let w = self.watchers.lock();
        for key in touched {
            let Some(slot) = w.trackers.get(key) else {
                continue;
            };
            for listener in &slot.listeners {
                let listener = listener.clone();
                notify.push(Box::new(move || {
                    isolate("tracker change listener", || listener());
                }));
            }
        }
        notify
    }

    /// Runs queued callbacks until the queue is empty, unless another thread
    /// is already draining it.
    fn deliver(&self) {
        {
            let mut d = self.delivery.lock();
            if d.draining {
                return;
            }
            d.draining = true;
        }
        loop {
            let next = {
                let mut d = self.delivery.lock();
                match d.queue.pop_front() {
                    Some(n) => n,
                    None => {
                        d.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }

    pub(crate) fn insert_watch(
        &self,
        tracker: TrackerKey,
        make: impl FnOnce(&T) -> Arc<dyn WatchSlot<T>>,
    ) -> bool {
        let mut w = self.watchers.lock();
        if !w.trackers.contains_key(tracker) {
            return false;
        }
        let current = self.current.read().clone();
        w.entries.push(make(&current));
        true
    }

    pub(crate) fn remove_watch(&self, id: u64) {
        self.watchers.lock().entries.retain(|e| e.id() != id);
    }

    pub(crate) fn add_change_listener(&self, tracker: TrackerKey, listener: Listener) {
        if let Some(slot) = self.watchers.lock().trackers.get_mut(tracker) {
            slot.listeners.push(listener);
        }
    }

    pub(crate) fn remove_tracker(&self, tracker: TrackerKey) {
        let mut w = self.watchers.lock();
        if w.trackers.remove(tracker).is_some() {
            w.entries.retain(|e| e.tracker() != tracker);
        }
    }

    pub(crate) fn has_tracker(&self, tracker: TrackerKey) -> bool {
        self.watchers.lock().trackers.contains_key(tracker)
    }

    pub(crate) fn tracker_watch_count(&self, tracker: TrackerKey) -> usize {
        self.watchers
            .lock()
            .entries
            .iter()
            .filter(|e| e.tracker() == tracker)
            .count()
    }
}
