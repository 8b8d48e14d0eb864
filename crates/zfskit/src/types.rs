//! Shared types for dataset queries and mutations.

use std::fmt;

use crate::error::{Error, Result};

/// Kind of dataset, as reported and filtered by `zfs list -t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    /// A mountable filesystem dataset.
    Filesystem,
    /// An immutable `fs@name` snapshot.
    Snapshot,
    /// A block-device volume.
    Volume,
}

impl DatasetKind {
    /// All kinds, in the order `zfs list -t` accepts them.
    pub const ALL: [Self; 3] = [Self::Filesystem, Self::Snapshot, Self::Volume];

    /// Wire-format name used with `-t`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Snapshot => "snapshot",
            Self::Volume => "volume",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a property value comes from, for `zfs get -s` filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySource {
    /// Set directly on the dataset.
    Local,
    /// Received through `zfs recv`.
    Received,
    /// ZFS built-in default.
    Default,
    /// Inherited from an ancestor.
    Inherited,
    /// Temporary (mount-time) override.
    Temporary,
}

impl PropertySource {
    /// Wire-format name used with `-s`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Received => "received",
            Self::Default => "default",
            Self::Inherited => "inherited",
            Self::Temporary => "temporary",
        }
    }
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `name=value` pair for `zfs set`, `zfs clone -o`, and `zpool set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property name, e.g. `canmount` or `org.zedenv:bootloader`.
    pub name: String,
    /// Property value.
    pub value: String,
}

impl Property {
    /// Build a property pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `name=value` string. The value may contain `=`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok(Self::new(name, value)),
            _ => Err(Error::InvalidProperty(s.to_string())),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Options for `zfs list`.
///
/// `columns` maps to `-o` (callers always request at least `name`);
/// empty `kinds` leaves the tool's default type filter in place.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Recurse into descendants (`-r`).
    pub recursive: bool,
    /// Limit recursion depth (`-d`).
    pub depth: Option<u32>,
    /// Dataset kinds to include (`-t`).
    pub kinds: Vec<DatasetKind>,
    /// Properties to sort ascending by, in order (`-s`, repeatable).
    pub sort_ascending: Vec<String>,
    /// Properties to sort descending by (`-S`, repeatable).
    pub sort_descending: Vec<String>,
    /// Columns to output (`-o`).
    pub columns: Vec<String>,
}

/// Options for `zfs get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Recurse into descendants (`-r`).
    pub recursive: bool,
    /// Limit recursion depth (`-d`).
    pub depth: Option<u32>,
    /// Dataset kinds to include (`-t`).
    pub kinds: Vec<DatasetKind>,
    /// Restrict to values from these sources (`-s`).
    pub sources: Vec<PropertySource>,
    /// Columns to output (`-o`); empty means the full
    /// name/property/value/source set.
    pub columns: Vec<String>,
}
