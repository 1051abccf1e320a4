use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

/// Anything that can be dispatched. Routing is by concrete type.
pub trait Action: Any + Send + Sync {}

impl<T: Any + Send + Sync> Action for T {}

/// Type-erased action as it travels through the dispatcher.
pub type ActionRef = Arc<dyn Any + Send + Sync>;

/// Runtime identity of an action type.
#[derive(Clone, Copy)]
pub struct ActionType {
    id: TypeId,
    name: &'static str,
}

impl ActionType {
    pub fn of<A: Action>() -> Self {
        Self {
            id: TypeId::of::<A>(),
            name: std::any::type_name::<A>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ActionType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActionType {}

impl Hash for ActionType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({})", self.name)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Lifecycle of one dispatch: `Pending`, then exactly one of
/// `Succeeded`/`Faulted`/`Canceled`, then `RanToCompletion`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionDispatchStatus {
    Pending,
    Succeeded,
    Faulted,
    Canceled,
    RanToCompletion,
}

impl ActionDispatchStatus {
    pub fn is_outcome(self) -> bool {
        matches!(self, Self::Succeeded | Self::Faulted | Self::Canceled)
    }
}

bitflags! {
    /// Set of statuses a subscription listens to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StatusSet: u8 {
        const PENDING = 1 << 0;
        const SUCCEEDED = 1 << 1;
        const FAULTED = 1 << 2;
        const CANCELED = 1 << 3;
        const RAN_TO_COMPLETION = 1 << 4;
        const OUTCOME = Self::SUCCEEDED.bits() | Self::FAULTED.bits() | Self::CANCELED.bits();
    }
}

impl From<ActionDispatchStatus> for StatusSet {
    fn from(status: ActionDispatchStatus) -> Self {
        match status {
            ActionDispatchStatus::Pending => StatusSet::PENDING,
            ActionDispatchStatus::Succeeded => StatusSet::SUCCEEDED,
            ActionDispatchStatus::Faulted => StatusSet::FAULTED,
            ActionDispatchStatus::Canceled => StatusSet::CANCELED,
            ActionDispatchStatus::RanToCompletion => StatusSet::RAN_TO_COMPLETION,
        }
    }
}
