//! Storage backends.
//!
//! Two implementations of [`ZfsBackend`]:
//! - Real execution via the `zfs`/`zpool` binaries ([`zfs::ZfsCli`])
//! - In-memory graph model for tests ([`mock::MockZfs`])

pub mod mock;
pub mod zfs;

use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorCategory, Result};
use crate::path::DatasetPath;
use crate::types::{DatasetKind, GetOptions, ListOptions, Property};

/// Interface to ZFS dataset and pool operations.
///
/// Everything the boot-environment engines need from the storage layer
/// goes through this trait, so the same code runs against a real pool or
/// against [`mock::MockZfs`] in tests. All operations are synchronous and
/// blocking; a returned `Ok` means the underlying command completed.
pub trait ZfsBackend: Send + Sync {
    // =========================================================================
    // Queries
    // =========================================================================

    /// `zfs list` rows for `target`, one row per dataset, cells in the
    /// requested column order.
    fn list(&self, target: &DatasetPath, opts: &ListOptions) -> Result<Vec<Vec<String>>>;

    /// `zfs get` rows, one per (dataset, property) pair. Pass `["all"]`
    /// to enumerate every property.
    fn get(
        &self,
        target: &DatasetPath,
        properties: &[&str],
        opts: &GetOptions,
    ) -> Result<Vec<Vec<String>>>;

    /// Pool property value (`zpool get -H -o value`). Returns the `-`
    /// sentinel when unset.
    fn pool_property(&self, pool: &str, property: &str) -> Result<String>;

    /// Dataset currently mounted at `mountpoint`, if it is a ZFS mount.
    fn mounted_dataset(&self, mountpoint: &Path) -> Result<Option<DatasetPath>>;

    /// Where `dataset` is currently mounted, if anywhere.
    fn dataset_mountpoint(&self, dataset: &DatasetPath) -> Result<Option<PathBuf>>;

    // =========================================================================
    // Mutations
    // =========================================================================

    /// `zfs set name=value` on a dataset.
    fn set(&self, dataset: &DatasetPath, property: &Property) -> Result<()>;

    /// Create a snapshot; with `recursive`, one per descendant dataset.
    fn snapshot(&self, snapshot: &DatasetPath, recursive: bool) -> Result<()>;

    /// Clone `snapshot` into `target` with the given properties applied.
    fn clone(
        &self,
        snapshot: &DatasetPath,
        target: &DatasetPath,
        properties: &[Property],
    ) -> Result<()>;

    /// Promote a clone so it no longer depends on its origin.
    fn promote(&self, dataset: &DatasetPath) -> Result<()>;

    /// `zfs destroy -r`: the dataset, its descendants, and their
    /// snapshots. Fails with dependent-clones when an outside clone still
    /// references a snapshot in the subtree.
    fn destroy_recursive(&self, dataset: &DatasetPath) -> Result<()>;

    /// Destroy a single snapshot; fails with dependent-clones when a
    /// clone still has it as origin.
    fn destroy_snapshot(&self, snapshot: &DatasetPath) -> Result<()>;

    /// `zfs rename`, carrying descendants and snapshots along.
    fn rename(&self, from: &DatasetPath, to: &DatasetPath) -> Result<()>;

    /// `zpool set name=value` on a pool.
    fn pool_set(&self, pool: &str, property: &Property) -> Result<()>;

    /// `zfs mount` at the dataset's configured mountpoint.
    fn mount(&self, dataset: &DatasetPath) -> Result<()>;

    /// Manual mount at an explicit path (`mount -t zfs`), independent of
    /// the configured mountpoint.
    fn mount_at(&self, dataset: &DatasetPath, mountpoint: &Path) -> Result<()>;

    /// Unmount a mounted dataset.
    fn unmount(&self, dataset: &DatasetPath) -> Result<()>;

    // =========================================================================
    // Provided helpers
    // =========================================================================

    /// Single property value for one dataset, as printed by
    /// `zfs get -H -o value` (`-` when unset).
    fn property(&self, dataset: &DatasetPath, property: &str) -> Result<String> {
        let opts = GetOptions {
            columns: vec!["value".to_string()],
            ..GetOptions::default()
        };
        let rows = self.get(dataset, &[property], &opts)?;
        rows.into_iter()
            .next()
            .and_then(|mut row| (!row.is_empty()).then(|| row.remove(0)))
            .ok_or_else(|| Error::UnexpectedOutput {
                what: "zfs get",
                detail: format!("no value for {property} on {dataset}"),
            })
    }

    /// Whether `target` exists, optionally constrained to a kind. Any
    /// lookup failure counts as absent, which is how the CLI probes.
    fn exists(&self, target: &DatasetPath, kind: Option<DatasetKind>) -> bool {
        let kinds = match kind {
            Some(k) => vec![k],
            None if target.is_snapshot() => vec![DatasetKind::Snapshot],
            None => vec![DatasetKind::Filesystem, DatasetKind::Volume],
        };
        let opts = ListOptions {
            kinds,
            columns: vec!["name".to_string()],
            ..ListOptions::default()
        };
        self.list(target, &opts)
            .map(|rows| !rows.is_empty())
            .unwrap_or(false)
    }

    /// Whether `dataset` is a clone (has an origin snapshot). A missing
    /// dataset is simply not a clone.
    fn is_clone(&self, dataset: &DatasetPath) -> Result<bool> {
        match self.property(dataset, "origin") {
            Ok(origin) => Ok(origin != "-"),
            Err(e) if e.category() == ErrorCategory::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Origin snapshot of a clone; `None` for non-clones.
    fn origin(&self, dataset: &DatasetPath) -> Result<Option<DatasetPath>> {
        let value = self.property(dataset, "origin")?;
        if value == "-" {
            Ok(None)
        } else {
            Ok(Some(DatasetPath::new(value)?))
        }
    }
}
