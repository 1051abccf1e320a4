use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use repose_state::panic::isolate;
use repose_state::{Dispose, OwnerId};

use crate::action::{Action, ActionDispatchStatus, ActionType, StatusSet};
use crate::error::DispatchFault;

/// One status change of one dispatch, as seen by subscribers.
#[derive(Clone, Copy)]
pub struct ActionEvent<'a> {
    pub action: &'a (dyn Any + Send + Sync),
    pub action_type: ActionType,
    pub status: ActionDispatchStatus,
    pub fault: Option<&'a DispatchFault>,
}

impl<'a> ActionEvent<'a> {
    pub fn downcast<A: Action>(&self) -> Option<&'a A> {
        self.action.downcast_ref::<A>()
    }
}

impl fmt::Debug for ActionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEvent")
            .field("action_type", &self.action_type)
            .field("status", &self.status)
            .field("fault", &self.fault.map(|x| x.to_string()))
            .finish()
    }
}

type Callback = Arc<dyn Fn(&ActionEvent<'_>) + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: u64,
    owner: OwnerId,
    action_type: Option<TypeId>,
    statuses: StatusSet,
    callback: Callback,
}

impl Entry {
    fn accepts(&self, event: &ActionEvent<'_>) -> bool {
        self.statuses.contains(event.status.into())
            && self.action_type.is_none_or(|t| t == event.action_type.id())
    }
}

struct BusInner {
    entries: RwLock<Arc<Vec<Entry>>>,
    next_id: AtomicU64,
}

/// Status subscriptions keyed by owner.
///
/// Publishing iterates a snapshot, so callbacks may subscribe or unsubscribe
/// (including themselves) without affecting the delivery in progress.
#[derive(Clone)]
pub struct ActionBus {
    inner: Arc<BusInner>,
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                entries: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Calls `f` for every dispatch of `A` whose status is in `statuses`.
    pub fn subscribe<A, F>(&self, owner: OwnerId, statuses: StatusSet, f: F) -> Dispose
    where
        A: Action,
        F: Fn(&A, Option<&DispatchFault>) + Send + Sync + 'static,
    {
        self.insert(
            owner,
            Some(TypeId::of::<A>()),
            statuses,
            Arc::new(move |event: &ActionEvent<'_>| {
                if let Some(action) = event.downcast::<A>() {
                    f(action, event.fault)
                }
            }),
        )
    }

    /// Like [`ActionBus::subscribe`] but untyped. `None` matches every action type.
    pub fn subscribe_any(
        &self,
        owner: OwnerId,
        action_type: Option<ActionType>,
        statuses: StatusSet,
        f: impl Fn(&ActionEvent<'_>) + Send + Sync + 'static,
    ) -> Dispose {
        self.insert(owner, action_type.map(|t| t.id()), statuses, Arc::new(f))
    }

    /// Runs `f` after every successful dispatch of `A`.
    pub fn on_succeeded<A: Action>(&self, owner: OwnerId, f: impl Fn(&A) + Send + Sync + 'static) -> Dispose {
        self.subscribe::<A, _>(owner, StatusSet::SUCCEEDED, move |a, _| f(a))
    }

    /// Runs `f` once per dispatch of `A`, after its outcome, with the fault if any.
    pub fn on_completed<A: Action>(
        &self,
        owner: OwnerId,
        f: impl Fn(&A, Option<&DispatchFault>) + Send + Sync + 'static,
    ) -> Dispose {
        self.subscribe::<A, _>(owner, StatusSet::RAN_TO_COMPLETION, f)
    }

    /// Drops every subscription of `owner`. Returns how many were removed.
    pub fn unsubscribe(&self, owner: OwnerId) -> usize {
        self.retain(|e| e.owner != owner)
    }

    pub fn subscription_count(&self, owner: OwnerId) -> usize {
        self.inner.entries.read().iter().filter(|e| e.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub(crate) fn publish(&self, event: &ActionEvent<'_>) {
        let snapshot = self.inner.entries.read().clone();
        for entry in snapshot.iter().filter(|e| e.accepts(event)) {
            isolate("action subscriber", || (entry.callback)(event));
        }
    }

    fn insert(
        &self,
        owner: OwnerId,
        action_type: Option<TypeId>,
        statuses: StatusSet,
        callback: Callback,
    ) -> Dispose {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut entries = self.inner.entries.write();
            let mut next = Vec::clone(&entries);
            next.push(Entry {
                id,
                owner,
                action_type,
                statuses,
                callback,
            });
            *entries = Arc::new(next);
        }
        let bus = Arc::downgrade(&self.inner);
        Dispose::new(move || {
            if let Some(inner) = bus.upgrade() {
                ActionBus { inner }.retain(|e| e.id != id);
            }
        })
    }

    fn retain(&self, keep: impl Fn(&Entry) -> bool) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        let next: Vec<Entry> = entries.iter().filter(|e| keep(e)).cloned().collect();
        let removed = before - next.len();
        if removed > 0 {
            *entries = Arc::new(next);
        }
        removed
    }
}

impl fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBus")
            .field("subscriptions", &self.len())
            .finish()
    }
}
