use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::path::Path;

/// Type-erased copy of a value taken at mutation time.
#[derive(Clone)]
pub struct ChangeValue(Arc<dyn Any + Send + Sync>);

impl ChangeValue {
    pub fn new<V: Any + Send + Sync>(value: V) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<V: Any>(&self) -> Option<&V> {
        self.0.downcast_ref::<V>()
    }

    pub fn is<V: Any>(&self) -> bool {
        self.0.is::<V>()
    }
}

impl fmt::Debug for ChangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeValue(..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// A property or slot was assigned.
    Set,
    /// An element was added to the collection at `path`.
    Insert,
    /// An element was removed from the collection at `path`.
    Remove,
    /// The collection at `path` was emptied.
    Clear,
}

/// One recorded mutation inside a transaction.
#[derive(Clone, Debug)]
pub struct ChangeRecord {
    pub path: Path,
    pub kind: ChangeKind,
    pub old: Option<ChangeValue>,
    pub new: Option<ChangeValue>,
}

impl ChangeRecord {
    pub fn old_as<V: Any>(&self) -> Option<&V> {
        self.old.as_ref().and_then(|v| v.downcast_ref())
    }

    pub fn new_as<V: Any>(&self) -> Option<&V> {
        self.new.as_ref().and_then(|v| v.downcast_ref())
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.path)
    }
}

/// Ordered set of change records plus the dirty markers derived from them.
#[derive(Clone, Debug, Default)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: ChangeRecord) {
        log::trace!("change recorded: {record}");
        self.records.push(record);
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        !self.records.is_empty()
    }

    /// True if anything at, under or above `path` was touched.
    pub fn is_dirty_at(&self, path: &Path) -> bool {
        self.records
            .iter()
            .any(|r| r.path.starts_with(path) || r.path.is_ancestor_of(path))
    }

    /// Clears dirty markers. No notification is raised.
    pub fn accept_changes(&mut self) {
        self.records.clear();
    }

    pub fn take(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.records)
    }
}
