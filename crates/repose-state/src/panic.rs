use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

/// Runs an observer callback, containing any panic to this call site.
///
/// Returns `false` if the callback panicked.
pub fn isolate(what: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(err) => {
            log::error!("{what} panicked: {}", panic_message(err.as_ref()));
            false
        }
    }
}
