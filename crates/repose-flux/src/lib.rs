//! # Repose Flux
//!
//! One-directional state flow: components dispatch actions, handlers mutate
//! [`Store`]s inside transactions, and watches and action subscriptions
//! report back. This crate wires [`repose_state`] and [`repose_actions`]
//! together and adds [`Owner`], the unit of teardown for a consumer.
//!
//! ```rust
//! use repose_flux::prelude::*;
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Clone, Default)]
//! struct Counter { count: i32 }
//! struct Increment;
//!
//! let store = Store::new(Counter::default());
//! let services = Services::new();
//! services.insert_store(store.clone());
//!
//! let flux = Flux::builder()
//!     .services(services)
//!     .handlers(HandlerTable::new().on::<Increment, _>(
//!         "Counter",
//!         "increment",
//!         |_: &Increment, s: Store<Counter>| {
//!             s.update(|p| p.field("count", |c| &mut c.count).modify(|n| *n += 1))
//!         },
//!     ))
//!     .build()
//!     .unwrap();
//!
//! let owner = flux.owner();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! owner.watch(
//!     &store,
//!     Selector::field("count", |s: &Counter| s.count),
//!     move |v| sink.lock().unwrap().push(*v),
//!     TrackingScope::Root,
//! );
//!
//! owner.dispatch_action(Increment);
//! owner.dispatch_action(Increment);
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
//!
//! owner.dispose();
//! owner.dispatch_action(Increment);
//! assert_eq!(seen.lock().unwrap().len(), 2);
//! ```

pub mod flux;
pub mod owner;

#[cfg(test)]
mod tests;

pub use flux::{Flux, FluxBuilder};
pub use owner::Owner;

pub use repose_actions;
pub use repose_state;

pub use repose_actions::{
    Action, ActionBus, ActionDispatchStatus, ActionDispatcher, ActionEvent, ActionType, CancelToken, Dep,
    DispatchError, DispatchFault, DispatchOutcome, DispatcherOptions, HandlerDescriptor, HandlerFault,
    HandlerRegistry, HandlerTable, RegistryError, Resolver, Services, StatusSet,
};
pub use repose_state::{
    ChangeKind, ChangeRecord, Dispose, OwnerId, Path, PathSegment, Proxy, Selector, StateError, Store, Tracked,
    Tracker, TrackingScope, Updated,
};

pub mod prelude {
    pub use crate::{
        Action, ActionDispatchStatus, ActionDispatcher, CancelToken, Dep, DispatchOutcome, Dispose, Flux,
        HandlerTable, Owner, Proxy, Selector, Services, StatusSet, Store, TrackingScope,
    };
}
