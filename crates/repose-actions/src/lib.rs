//! # Actions
//!
//! Typed actions, the handlers that react to them, and a bus that reports
//! how each dispatch went.
//!
//! Handlers are declared on a [`HandlerTable`] and bound against a
//! [`Resolver`] when the [`HandlerRegistry`] is built. A missing store or
//! dependency is reported then, not at dispatch time.
//!
//! ```rust
//! use std::sync::Arc;
//! use repose_actions::*;
//! use repose_state::{OwnerId, Store};
//!
//! #[derive(Clone, Default)]
//! struct Counter { count: i32 }
//! struct Increment;
//!
//! let store = Store::new(Counter::default());
//! let services = Services::new();
//! services.insert_store(store.clone());
//!
//! let table = HandlerTable::new().on::<Increment, _>(
//!     "Counter",
//!     "increment",
//!     |_: &Increment, store: Store<Counter>| {
//!         store.update(|s| s.field("count", |c| &mut c.count).modify(|n| *n += 1))
//!     },
//! );
//! let registry = HandlerRegistry::build(table, Arc::new(services)).unwrap();
//! let dispatcher = ActionDispatcher::new(Arc::new(registry), ActionBus::new());
//!
//! let outcome = pollster::block_on(dispatcher.dispatch_async(Increment, CancelToken::none()));
//! assert!(outcome.is_succeeded());
//! assert_eq!(store.value().count, 1);
//! ```
//!
//! ## Lifecycle
//!
//! Every dispatch publishes `Pending`, then exactly one of `Succeeded`,
//! `Faulted` or `Canceled`, then `RanToCompletion`. Handlers run in
//! registration order; a failing handler does not stop the ones after it.
//! Cancellation is checked before each handler and wins over faults.

pub mod action;
pub mod bus;
pub mod cancel;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod registry;
pub mod resolve;

#[cfg(test)]
mod tests;

pub use action::*;
pub use bus::*;
pub use cancel::*;
pub use dispatch::*;
pub use error::*;
pub use handler::*;
pub use registry::*;
pub use resolve::*;
