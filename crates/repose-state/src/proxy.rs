//! Change-tracking proxy.
//!
//! A [`Proxy`] is a `&mut T` that knows where it sits in the state tree and
//! which [`ChangeLog`] it writes to. Every setter and every mutating
//! collection operation goes through it and appends a [`ChangeRecord`].
//!
//! Nested values are wrapped on demand with [`Proxy::field`], [`Proxy::at`]
//! or [`Proxy::entry_at`], so a write anywhere in the tree lands in the root
//! log with its full path:
//!
//! ```rust
//! use repose_state::*;
//!
//! #[derive(Clone, Default)]
//! struct Item { value: i32 }
//! #[derive(Clone, Default)]
//! struct Board { title: String, items: Vec<Item> }
//!
//! let mut board = Tracked::new(Board::default());
//! {
//!     let mut p = board.edit();
//!     p.field("title", |b| &mut b.title).set("todo".to_string());
//!     let mut items = p.field("items", |b| &mut b.items);
//!     items.push(Item { value: 1 });
//!     if let Some(mut first) = items.at(0) {
//!         first.field("value", |i| &mut i.value).set(2);
//!     }
//! }
//! let paths: Vec<String> = board.changes().iter().map(|c| c.path.to_string()).collect();
//! assert_eq!(paths, ["title", "items[0]", "items[0].value"]);
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::ops::Deref;

use crate::change::{ChangeKind, ChangeLog, ChangeRecord, ChangeValue};
use crate::path::Path;

pub struct Proxy<'tx, T> {
    target: &'tx mut T,
    path: Path,
    log: &'tx mut ChangeLog,
}

impl<'tx, T> Proxy<'tx, T> {
    pub(crate) fn new(target: &'tx mut T, path: Path, log: &'tx mut ChangeLog) -> Self {
        Self { target, path, log }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &T {
        self.target
    }

    /// Changes recorded so far in this transaction (whole tree, not just this node).
    pub fn changes(&self) -> &[ChangeRecord] {
        self.log.records()
    }

    /// Wraps the nested value returned by `access` under `self.path.name`.
    pub fn field<U>(
        &mut self,
        name: &'static str,
        access: impl FnOnce(&mut T) -> &mut U,
    ) -> Proxy<'_, U> {
        Proxy {
            target: access(&mut *self.target),
            path: self.path.join_field(name),
            log: &mut *self.log,
        }
    }

    fn record(&mut self, path: Path, kind: ChangeKind, old: Option<ChangeValue>, new: Option<ChangeValue>) {
        self.log.push(ChangeRecord {
            path,
            kind,
            old,
            new,
        });
    }
}

impl<T> Proxy<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Assigns unconditionally and records a `Set`, returning the old value.
    pub fn replace(&mut self, value: T) -> T {
        let old = std::mem::replace(self.target, value);
        let new = ChangeValue::new(self.target.clone());
        let path = self.path.clone();
        self.record(path, ChangeKind::Set, Some(ChangeValue::new(old.clone())), Some(new));
        old
    }
}

impl<T> Proxy<'_, T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Assigns and records a `Set` if the value actually differs.
    pub fn set(&mut self, value: T) -> bool {
        if *self.target == value {
            return false;
        }
        self.replace(value);
        true
    }

    /// Edits in place; records a `Set` if the edit changed the value.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        let before = self.target.clone();
        let out = f(self.target);
        if *self.target != before {
            let new = ChangeValue::new(self.target.clone());
            let path = self.path.clone();
            self.record(path, ChangeKind::Set, Some(ChangeValue::new(before)), Some(new));
        }
        out
    }
}

impl<T> Proxy<'_, Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.target.iter()
    }

    pub fn push(&mut self, value: T) {
        let index = self.target.len();
        self.insert(index, value);
    }

    /// Panics like `Vec::insert` when `index > len`.
    pub fn insert(&mut self, index: usize, value: T) {
        let new = ChangeValue::new(value.clone());
        self.target.insert(index, value);
        let path = self.path.join_index(index);
        self.record(path, ChangeKind::Insert, None, Some(new));
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.target.len() {
            return None;
        }
        let old = self.target.remove(index);
        let path = self.path.join_index(index);
        self.record(path, ChangeKind::Remove, Some(ChangeValue::new(old.clone())), None);
        Some(old)
    }

    pub fn pop(&mut self) -> Option<T> {
        match self.target.len() {
            0 => None,
            n => self.remove(n - 1),
        }
    }

    pub fn clear(&mut self) {
        if self.target.is_empty() {
            return;
        }
        let old = std::mem::take(self.target);
        let path = self.path.clone();
        self.record(path, ChangeKind::Clear, Some(ChangeValue::new(old)), None);
    }

    /// Wraps element `index` so writes below it carry `path[index]`.
    pub fn at(&mut self, index: usize) -> Option<Proxy<'_, T>> {
        let path = self.path.join_index(index);
        let log = &mut *self.log;
        self.target
            .get_mut(index)
            .map(|target| Proxy { target, path, log })
    }
}

impl<T> Proxy<'_, Vec<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Index assignment. Returns false when out of bounds or unchanged.
    pub fn set_at(&mut self, index: usize, value: T) -> bool {
        match self.at(index) {
            Some(mut slot) => slot.set(value),
            None => false,
        }
    }
}

impl<K, V> Proxy<'_, HashMap<K, V>>
where
    K: Eq + Hash + Display + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// `Insert` for a new key, `Set` when overwriting.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let path = self.path.join_key(&key);
        let new = ChangeValue::new(value.clone());
        let old = self.target.insert(key, value);
        let kind = if old.is_some() {
            ChangeKind::Set
        } else {
            ChangeKind::Insert
        };
        let old_value = old.clone().map(ChangeValue::new);
        self.record(path, kind, old_value, Some(new));
        old
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let old = self.target.remove(key)?;
        let path = self.path.join_key(key);
        self.record(path, ChangeKind::Remove, Some(ChangeValue::new(old.clone())), None);
        Some(old)
    }

    pub fn clear(&mut self) {
        if self.target.is_empty() {
            return;
        }
        self.target.clear();
        let path = self.path.clone();
        self.record(path, ChangeKind::Clear, None, None);
    }

    pub fn entry_at(&mut self, key: &K) -> Option<Proxy<'_, V>> {
        let path = self.path.join_key(key);
        let log = &mut *self.log;
        self.target
            .get_mut(key)
            .map(|target| Proxy { target, path, log })
    }
}

impl<T> Proxy<'_, Option<T>>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn put(&mut self, value: T) -> Option<T> {
        let new = ChangeValue::new(value.clone());
        let old = self.target.replace(value);
        let path = self.path.clone();
        self.record(path, ChangeKind::Set, old.clone().map(ChangeValue::new), Some(new));
        old
    }

    pub fn take(&mut self) -> Option<T> {
        let old = self.target.take()?;
        let path = self.path.clone();
        self.record(path, ChangeKind::Set, Some(ChangeValue::new(old.clone())), None);
        Some(old)
    }

    pub fn as_some(&mut self) -> Option<Proxy<'_, T>> {
        let path = self.path.clone();
        let log = &mut *self.log;
        self.target
            .as_mut()
            .map(|target| Proxy { target, path, log })
    }
}

/// A value that is only mutable through a [`Proxy`] and remembers what changed
/// until [`Tracked::accept_changes`] is called.
#[derive(Clone, Debug, Default)]
pub struct Tracked<T> {
    value: T,
    log: ChangeLog,
}

impl<T> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            log: ChangeLog::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn edit(&mut self) -> Proxy<'_, T> {
        Proxy::new(&mut self.value, Path::root(), &mut self.log)
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        self.log.records()
    }

    pub fn is_dirty(&self) -> bool {
        self.log.is_dirty()
    }

    pub fn is_dirty_at(&self, path: &Path) -> bool {
        self.log.is_dirty_at(path)
    }

    /// Re-baselines: drops the dirty markers without notifying anyone.
    pub fn accept_changes(&mut self) {
        self.log.accept_changes();
    }

    pub(crate) fn take_changes(&mut self) -> Vec<ChangeRecord> {
        self.log.take()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}
