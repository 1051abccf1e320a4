use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use repose_actions::{Action, ActionDispatcher, CancelToken, DispatchFault, DispatchOutcome, StatusSet};
use repose_state::{Dispose, OwnerId, Selector, Store, StoreId, Tracker, TrackingScope};

use crate::flux::Flux;

trait OwnedTracker: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dispose(&self);
}

impl<T> OwnedTracker for Tracker<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dispose(&self) {
        Tracker::dispose(self)
    }
}

struct OwnerInner {
    id: OwnerId,
    flux: Flux,
    trackers: Mutex<HashMap<StoreId, Box<dyn OwnedTracker>>>,
    children: Mutex<Vec<Owner>>,
    disposers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    disposed: AtomicBool,
}

/// A consumer of actions and state: everything it subscribes to or watches
/// is torn down together by [`Owner::dispose`], or when the last handle is
/// dropped.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    pub fn new(flux: Flux) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::next(),
                flux,
                trackers: Mutex::new(HashMap::new()),
                children: Mutex::new(Vec::new()),
                disposers: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn flux(&self) -> &Flux {
        &self.inner.flux
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// This owner's tracker for `store`, created on first use. A disposed
    /// owner hands out a tracker that is already disposed.
    pub fn tracker<T>(&self, store: &Store<T>) -> Tracker<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut trackers = self.inner.trackers.lock();
        // Teardown sets the flag before it takes this map.
        if self.is_disposed() {
            drop(trackers);
            let tracker = store.tracker_for(self.inner.id);
            tracker.dispose();
            return tracker;
        }
        if let Some(existing) = trackers
            .get(&store.id())
            .and_then(|t| t.as_any().downcast_ref::<Tracker<T>>())
        {
            return existing.clone();
        }
        let tracker = store.tracker_for(self.inner.id);
        trackers.insert(store.id(), Box::new(tracker.clone()));
        tracker
    }

    pub fn watch<T, V>(
        &self,
        store: &Store<T>,
        selector: Selector<T, V>,
        callback: impl Fn(&V) + Send + Sync + 'static,
        scope: TrackingScope,
    ) -> Dispose
    where
        T: Clone + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        if self.refuse("watch") {
            return Dispose::noop();
        }
        self.tracker(store).watch(selector, callback, scope)
    }

    pub fn watch_when<T, V>(
        &self,
        store: &Store<T>,
        selector: Selector<T, V>,
        predicate: impl Fn(&V) -> bool + Send + Sync + 'static,
        callback: impl Fn(&V) + Send + Sync + 'static,
        scope: TrackingScope,
    ) -> Dispose
    where
        T: Clone + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        if self.refuse("watch") {
            return Dispose::noop();
        }
        self.tracker(store).watch_when(selector, predicate, callback, scope)
    }

    /// Runs `f` once per transaction that changed anything this owner
    /// watches on `store`.
    pub fn on_state_changed<T>(&self, store: &Store<T>, f: impl Fn() + Send + Sync + 'static)
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.refuse("state listener") {
            return;
        }
        self.tracker(store).on_change(f)
    }

    pub fn subscribe_action<A: Action>(
        &self,
        statuses: StatusSet,
        f: impl Fn(&A, Option<&DispatchFault>) + Send + Sync + 'static,
    ) -> Dispose {
        if self.refuse("subscription") {
            return Dispose::noop();
        }
        let handle = self.flux().bus().subscribe::<A, _>(self.inner.id, statuses, f);
        // Disposed meanwhile: teardown may already have swept the bus.
        if self.is_disposed() {
            handle.run();
        }
        handle
    }

    pub fn on_succeeded<A: Action>(&self, f: impl Fn(&A) + Send + Sync + 'static) -> Dispose {
        self.subscribe_action::<A>(StatusSet::SUCCEEDED, move |a, _| f(a))
    }

    pub fn on_completed<A: Action>(
        &self,
        f: impl Fn(&A, Option<&DispatchFault>) + Send + Sync + 'static,
    ) -> Dispose {
        self.subscribe_action::<A>(StatusSet::RAN_TO_COMPLETION, f)
    }

    pub fn dispatch_action<A: Action>(&self, action: A) {
        self.dispatcher().dispatch(action)
    }

    pub fn dispatch_action_with<A: Action>(&self, action: A, token: CancelToken) {
        self.dispatcher().dispatch_with(action, token)
    }

    pub async fn dispatch_action_async<A: Action>(&self, action: A, token: CancelToken) -> DispatchOutcome {
        self.dispatcher().dispatch_async(action, token).await
    }

    pub fn add_disposer(&self, disposer: impl FnOnce() + Send + 'static) {
        let mut disposers = self.inner.disposers.lock();
        if self.is_disposed() {
            drop(disposers);
            disposer();
            return;
        }
        disposers.push(Box::new(disposer));
    }

    /// A nested owner disposed together with this one.
    pub fn child(&self) -> Owner {
        let child = Owner::new(self.inner.flux.clone());
        let mut children = self.inner.children.lock();
        if self.is_disposed() {
            drop(children);
            child.dispose();
        } else {
            children.push(child.clone());
        }
        child
    }

    /// Children first, then bus subscriptions, trackers and disposers.
    /// Later calls do nothing.
    pub fn dispose(&self) {
        self.inner.teardown();
    }

    fn dispatcher(&self) -> &ActionDispatcher {
        self.inner.flux.dispatcher()
    }

    fn refuse(&self, what: &str) -> bool {
        let disposed = self.is_disposed();
        if disposed {
            log::warn!("{what} requested on disposed {}; ignoring", self.inner.id);
        }
        disposed
    }
}

impl OwnerInner {
    fn teardown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.dispose();
        }

        let removed = self.flux.bus().unsubscribe(self.id);
        let trackers = std::mem::take(&mut *self.trackers.lock());
        for tracker in trackers.values() {
            tracker.dispose();
        }
        log::debug!(
            "{} disposed ({removed} subscription(s), {} tracker(s))",
            self.id,
            trackers.len()
        );

        let disposers = std::mem::take(&mut *self.disposers.lock());
        for disposer in disposers {
            disposer();
        }
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
