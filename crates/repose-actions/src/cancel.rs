use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct CancelState {
    canceled: AtomicBool,
    parent: Option<CancelToken>,
}

/// Cooperative cancellation flag shared between a caller and a dispatch.
///
/// Cancelling stops the dispatcher from starting further handlers; it does
/// not interrupt a handler that is already running.
#[derive(Clone, Default)]
pub struct CancelToken(Option<Arc<CancelState>>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Some(Arc::new(CancelState {
            canceled: AtomicBool::new(false),
            parent: None,
        })))
    }

    /// A token that can never be canceled.
    pub fn none() -> Self {
        Self(None)
    }

    /// A token that is canceled when either it or `self` is.
    pub fn child(&self) -> Self {
        Self(Some(Arc::new(CancelState {
            canceled: AtomicBool::new(false),
            parent: Some(self.clone()),
        })))
    }

    pub fn cancel(&self) {
        if let Some(state) = &self.0 {
            state.canceled.store(true, Ordering::Release);
        }
    }

    pub fn is_canceled(&self) -> bool {
        match &self.0 {
            None => false,
            Some(state) => {
                state.canceled.load(Ordering::Acquire)
                    || state.parent.as_ref().is_some_and(|p| p.is_canceled())
            }
        }
    }

    pub fn can_be_canceled(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
