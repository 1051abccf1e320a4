//! # Change-tracked state
//!
//! `repose-state` holds application state behind a transactional API and
//! tells observers when the part they care about changed. There are three
//! main pieces:
//!
//! - [`Proxy`] / [`Tracked`]: a mutable view that records every write as a
//!   [`ChangeRecord`] with its full path (`items[2].value`).
//! - [`Store<T>`]: owns one value; [`Store::update`] is the only way to
//!   change it.
//! - [`Tracker`]: a consumer's set of watches over a store.
//!
//! ## Updating
//!
//! ```rust
//! use repose_state::*;
//!
//! #[derive(Clone, Default)]
//! struct Counter { count: i32 }
//!
//! let store = Store::new(Counter::default());
//! store
//!     .update(|s| s.field("count", |c| &mut c.count).modify(|n| *n += 1))
//!     .unwrap();
//! assert_eq!(store.value().count, 1);
//! assert_eq!(store.version(), 1);
//! ```
//!
//! The mutator works on a private copy. If it records nothing the transaction
//! is dropped and the version stays the same; if it panics the store is left
//! as it was.
//!
//! ## Watching
//!
//! ```rust
//! use repose_state::*;
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Clone, Default)]
//! struct Counter { count: i32, label: String }
//!
//! let store = Store::new(Counter::default());
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let tracker = store.create_tracker();
//! tracker.watch(
//!     Selector::field("count", |s: &Counter| s.count),
//!     {
//!         let seen = seen.clone();
//!         move |v| seen.lock().unwrap().push(*v)
//!     },
//!     TrackingScope::Root,
//! );
//!
//! store.update(|s| s.field("label", |c| &mut c.label).set("x".into())).unwrap();
//! store.update(|s| s.field("count", |c| &mut c.count).set(5)).unwrap();
//! assert_eq!(*seen.lock().unwrap(), vec![5]);
//! ```
//!
//! - `Root` scope reacts to writes of the selected property itself.
//! - `Deep` scope also reacts to writes anywhere below it.
//! - A selector without a declared path is re-checked after every commit.
//!
//! Callbacks fire at most once per transaction, in registration order, after
//! all entries were evaluated against the same snapshot. A callback may call
//! `update` again; that simply starts the next transaction.

pub mod change;
pub mod dispose;
pub mod error;
pub mod panic;
pub mod path;
pub mod proxy;
pub mod store;
pub mod tracker;


pub use change::*;
pub use dispose::*;
pub use error::*;
pub use path::*;
pub use proxy::*;
pub use store::*;
pub use tracker::*;
