use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::action::{ActionDispatchStatus, ActionType};
use crate::handler::ParamKind;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("handler {handler} takes {param} ({kind:?}) but the resolver cannot provide it")]
    Unresolved {
        handler: String,
        param: &'static str,
        kind: ParamKind,
    },
}

/// One handler's failure during a dispatch.
#[derive(Debug)]
pub struct HandlerFault {
    pub handler: String,
    pub error: anyhow::Error,
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.handler, self.error)
    }
}

/// Every handler failure of one dispatch, in handler order.
///
/// Displays as the first failure; the rest stay reachable through
/// [`DispatchFault::faults`].
#[derive(Debug, Error)]
#[error("{action} faulted in {}", .faults[0])]
pub struct DispatchFault {
    action: ActionType,
    faults: Vec<HandlerFault>,
}

impl DispatchFault {
    pub(crate) fn new(action: ActionType, faults: Vec<HandlerFault>) -> Option<Self> {
        if faults.is_empty() {
            None
        } else {
            Some(Self { action, faults })
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.action
    }

    pub fn first(&self) -> &HandlerFault {
        &self.faults[0]
    }

    pub fn faults(&self) -> &[HandlerFault] {
        &self.faults
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Final result of a dispatch.
#[derive(Clone, Debug)]
pub enum DispatchOutcome {
    Succeeded,
    Faulted(Arc<DispatchFault>),
    Canceled,
}

impl DispatchOutcome {
    pub fn status(&self) -> ActionDispatchStatus {
        match self {
            Self::Succeeded => ActionDispatchStatus::Succeeded,
            Self::Faulted(_) => ActionDispatchStatus::Faulted,
            Self::Canceled => ActionDispatchStatus::Canceled,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn fault(&self) -> Option<&DispatchFault> {
        match self {
            Self::Faulted(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<(), DispatchError> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Faulted(f) => Err(DispatchError::Faulted(f)),
            Self::Canceled => Err(DispatchError::Canceled),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Faulted(Arc<DispatchFault>),
    #[error("dispatch canceled")]
    Canceled,
}
