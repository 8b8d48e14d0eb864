//! Dataset path handling.
//!
//! ZFS addresses datasets with `/`-delimited paths rooted at a pool name,
//! with `@` separating a snapshot name from its filesystem
//! (`rpool/ROOT/default@backup`). [`DatasetPath`] is a validated value
//! type over that wire format so higher layers never build paths by raw
//! string concatenation.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A validated ZFS dataset path.
///
/// Covers filesystems/volumes (`pool/some/dataset`) and snapshots
/// (`pool/some/dataset@snap`). Construction rejects structurally broken
/// paths; existence is a separate question answered by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetPath(String);

impl DatasetPath {
    /// Validate and wrap a dataset path.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate(&path)?;
        Ok(Self(path))
    }

    /// The path in ZFS wire format.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First path segment: the pool this dataset lives in.
    pub fn pool(&self) -> &str {
        self.0
            .split(['/', '@'])
            .next()
            .unwrap_or(self.0.as_str())
    }

    /// Last `/`-separated segment. For a snapshot this keeps the
    /// `name@snap` form, which is how origins are displayed.
    pub fn child_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(self.0.as_str())
    }

    /// Parent in the dataset namespace: the enclosing filesystem for a
    /// snapshot, the enclosing dataset otherwise. `None` at pool level.
    pub fn parent(&self) -> Option<Self> {
        if self.is_snapshot() {
            return self.snapshot_parent();
        }
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// Whether this path names a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.0.contains('@')
    }

    /// The filesystem a snapshot belongs to; `None` for non-snapshots.
    pub fn snapshot_parent(&self) -> Option<Self> {
        self.0
            .split_once('@')
            .map(|(fs, _)| Self(fs.to_string()))
    }

    /// The part after `@`; `None` for non-snapshots.
    pub fn snapshot_name(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, snap)| snap)
    }

    /// Append a relative child path (may contain `/`).
    pub fn child(&self, name: &str) -> Result<Self> {
        Self::new(format!("{}/{name}", self.0))
    }

    /// Snapshot of this filesystem with the given name.
    pub fn snapshot(&self, name: &str) -> Result<Self> {
        Self::new(format!("{}@{name}", self.0))
    }

    /// Whether `other` is this dataset, a descendant of it, or a snapshot
    /// of either. Segment-aware: `rpool/ROOT/default` does not contain
    /// `rpool/ROOT/default-2`.
    pub fn contains(&self, other: &Self) -> bool {
        let other_fs = other.0.split('@').next().unwrap_or(other.0.as_str());
        other_fs == self.0 || other_fs.starts_with(&format!("{}/", self.0))
    }

    /// Path of this dataset relative to `ancestor`: `Some("")` for the
    /// ancestor itself, `Some("a/b")` for a descendant, `None` otherwise.
    pub fn relative_to<'a>(&'a self, ancestor: &Self) -> Option<&'a str> {
        if self.0 == ancestor.0 {
            return Some("");
        }
        self.0
            .strip_prefix(ancestor.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

fn validate(path: &str) -> Result<()> {
    let fail = |reason| Err(Error::InvalidPath {
        path: path.to_string(),
        reason,
    });

    if path.is_empty() {
        return fail("empty path");
    }
    if path.starts_with('/') || path.ends_with('/') {
        return fail("leading or trailing '/'");
    }
    if path.contains("//") {
        return fail("empty path segment");
    }
    if path.chars().any(char::is_whitespace) {
        return fail("whitespace in path");
    }
    if path.matches('@').count() > 1 {
        return fail("more than one '@'");
    }
    if let Some((fs, snap)) = path.split_once('@') {
        if fs.is_empty() {
            return fail("missing filesystem before '@'");
        }
        if snap.is_empty() {
            return fail("empty snapshot name");
        }
        if snap.contains('/') {
            return fail("'/' after '@'");
        }
    }
    Ok(())
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for DatasetPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
