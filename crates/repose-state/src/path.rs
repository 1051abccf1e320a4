use std::fmt;

use smallvec::SmallVec;

/// One step from a parent value to a child value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(&'static str),
    Index(usize),
    Key(String),
}

/// Dotted/indexed location of a value inside a state tree, e.g. `items[2].value`.
///
/// The empty path is the root of the state.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(SmallVec<[PathSegment; 4]>);

impl Path {
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn field(name: &'static str) -> Self {
        Self::root().join_field(name)
    }

    pub fn join(&self, segment: PathSegment) -> Self {
        let mut next = self.clone();
        next.0.push(segment);
        next
    }

    pub fn join_field(&self, name: &'static str) -> Self {
        self.join(PathSegment::Field(name))
    }

    pub fn join_index(&self, index: usize) -> Self {
        self.join(PathSegment::Index(index))
    }

    pub fn join_key(&self, key: impl fmt::Display) -> Self {
        self.join(PathSegment::Key(key.to_string()))
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        let mut p = self.clone();
        p.0.pop();
        Some(p)
    }

    /// True when `self` equals `other` or lies underneath it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }

    /// Strict ancestor: `self` is above `other` and not equal to it.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.starts_with(self)
    }

    /// `self` is `parent[j]` and `other` is at or under `parent[i]` with
    /// `i >= j`: inserting or removing at `self` moves what `other` points at.
    pub fn shifts(&self, other: &Path) -> bool {
        let Some((PathSegment::Index(j), parent)) = self.0.split_last() else {
            return false;
        };
        other.0.len() > parent.len()
            && other.0[..parent.len()] == *parent
            && matches!(other.0[parent.len()], PathSegment::Index(i) if i >= *j)
    }

    /// `self` is `other[i]` for some index or key, i.e. a direct collection slot.
    pub fn is_slot_of(&self, other: &Path) -> bool {
        self.0.len() == other.0.len() + 1
            && self.starts_with(other)
            && matches!(
                self.0.last(),
                Some(PathSegment::Index(_)) | Some(PathSegment::Key(_))
            )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSegment::Field(name) if i == 0 => f.write_str(name)?,
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                PathSegment::Key(key) => write!(f, "[{key:?}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl From<&'static str> for Path {
    fn from(name: &'static str) -> Self {
        Path::field(name)
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
