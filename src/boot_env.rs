//! Boot environment registry.
//!
//! Discovers the BE root from the dataset mounted at `/`, answers status
//! questions (active at next boot, currently booted), and owns the naming
//! conventions shared by the engines: snapshot suffixes, the boot-pool
//! mirror scheme, and the property carry-over rules for clones.

use std::path::Path;

use anyhow::{Context as AnyhowContext, Result, bail};
use chrono::{Local, NaiveDateTime};
use log::warn;
use zfskit::{
    DatasetKind, DatasetPath, GetOptions, ListOptions, Property, PropertySource, ZfsBackend,
};

use crate::config;

/// Prefix on snapshots taken by the creation engine.
pub const SNAP_PREFIX: &str = "ze";

/// Timestamp layout encoded into snapshot suffixes,
/// e.g. `2020-01-01-00-0000`.
pub const SNAP_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M%S";

/// Layout of the `creation` property as printed by the storage layer,
/// e.g. `Wed Jan  1 00:05 2020`.
pub const CREATION_FORMAT: &str = "%a %b %e %H:%M %Y";

/// Dataset name prefix mirroring BEs onto a separate boot pool.
pub const BOOT_MIRROR_PREFIX: &str = "zedenv-";

/// Slack allowed between a snapshot's creation time and the timestamp in
/// its name. The creation property only has minute resolution while
/// suffixes carry seconds.
const SYNTHETIC_TOLERANCE_SECS: i64 = 60;

// ============================================================================
// Root discovery
// ============================================================================

/// The dataset currently mounted as `/`, i.e. the booted BE.
pub fn current_dataset(zfs: &dyn ZfsBackend) -> Result<DatasetPath> {
    zfs.mounted_dataset(Path::new("/"))?
        .context("System is not booting off a ZFS root dataset.")
}

/// Parent dataset all boot environments live under, e.g. `rpool/ROOT`.
pub fn root(zfs: &dyn ZfsBackend) -> Result<DatasetPath> {
    let current = current_dataset(zfs)?;
    current
        .parent()
        .with_context(|| format!("Dataset '{current}' mounted at '/' has no parent"))
}

/// Mirror root on a separate boot pool, when `/boot` is a ZFS dataset of
/// its own named `zedenv-<be>`. `None` on single-pool systems.
pub fn boot_mirror_root(zfs: &dyn ZfsBackend) -> Result<Option<DatasetPath>> {
    let Some(boot) = zfs.mounted_dataset(Path::new("/boot"))? else {
        return Ok(None);
    };
    let Some(parent) = boot.parent() else {
        return Ok(None);
    };
    if parent == root(zfs)? {
        // /boot lives inside the BE tree, not on a separate pool.
        return Ok(None);
    }
    if !boot.child_name().starts_with(BOOT_MIRROR_PREFIX) {
        warn!("Failed to determine a valid path from '{boot}'");
        return Ok(None);
    }
    Ok(Some(parent))
}

/// Mirror dataset for a BE on the boot pool: `{mirrorRoot}/zedenv-{name}`.
pub fn boot_mirror_path(mirror_root: &DatasetPath, name: &str) -> Result<DatasetPath> {
    Ok(mirror_root.child(&format!("{BOOT_MIRROR_PREFIX}{name}"))?)
}

// ============================================================================
// Activation status
// ============================================================================

/// The pool's bootfs dataset. Errors when none is set.
pub fn bootfs_for_pool(zfs: &dyn ZfsBackend, pool: &str) -> Result<DatasetPath> {
    let bootfs = zfs.pool_property(pool, "bootfs")?;
    if config::is_unset(&bootfs) {
        bail!("No bootfs has been set on zpool '{pool}'.");
    }
    Ok(DatasetPath::new(bootfs)?)
}

/// Name of the BE the pool will boot next, from the bootfs child name.
pub fn active_boot_environment(zfs: &dyn ZfsBackend, pool: &str) -> Result<String> {
    Ok(bootfs_for_pool(zfs, pool)?.child_name().to_string())
}

/// Whether `dataset` is its pool's next-boot target.
pub fn is_active(zfs: &dyn ZfsBackend, dataset: &DatasetPath) -> bool {
    bootfs_for_pool(zfs, dataset.pool()).is_ok_and(|bootfs| bootfs == *dataset)
}

/// Whether `dataset` is both mounted as `/` and the next-boot target.
pub fn is_current(zfs: &dyn ZfsBackend, dataset: &DatasetPath) -> Result<bool> {
    let mounted = zfs.mounted_dataset(Path::new("/"))?;
    Ok(mounted.as_ref() == Some(dataset) && is_active(zfs, dataset))
}

// ============================================================================
// Snapshot naming
// ============================================================================

/// Suffix for a snapshot taken now, e.g. `ze-2020-01-01-00-0000`.
pub fn snapshot_suffix() -> String {
    format!(
        "{SNAP_PREFIX}-{}",
        Local::now().format(SNAP_TIME_FORMAT)
    )
}

/// Recover the timestamp a suffix encodes. Tries the whole name first,
/// then everything after the first `-` to skip a prefix.
pub fn parse_snapshot_suffix(suffix: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(suffix, SNAP_TIME_FORMAT)
        .ok()
        .or_else(|| {
            let (_, rest) = suffix.split_once('-')?;
            NaiveDateTime::parse_from_str(rest, SNAP_TIME_FORMAT).ok()
        })
}

/// Parse a `creation` property value such as `Wed Jan  1 00:05 2020`.
pub fn parse_creation(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, CREATION_FORMAT).ok()
}

/// Creation column as shown by `zedenv list`: the raw storage value with
/// whitespace collapsed to dashes, e.g. `Wed-Jan-1-00:05-2020`.
pub fn display_creation(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Whether an origin snapshot looks synthetic: taken by the creation
/// engine at the moment its name encodes. A mismatch, or a name carrying
/// no timestamp at all, means a user snapshot that must be preserved.
pub fn origin_is_synthetic(suffix: &str, creation: NaiveDateTime) -> bool {
    match parse_snapshot_suffix(suffix) {
        Some(encoded) => (creation - encoded).num_seconds().abs() <= SYNTHETIC_TOLERANCE_SECS,
        None => false,
    }
}

// ============================================================================
// Listing
// ============================================================================

/// One row per dataset directly under `target`, skipping `target`
/// itself, sorted by creation ascending. `columns` must start with
/// `name`.
///
/// An absent target yields an empty listing: an empty BE root is the
/// valid pre-first-run state.
pub fn list_datasets(
    zfs: &dyn ZfsBackend,
    target: &DatasetPath,
    columns: &[&str],
) -> Result<Vec<Vec<String>>> {
    let opts = ListOptions {
        recursive: false,
        depth: Some(1),
        kinds: DatasetKind::ALL.to_vec(),
        sort_ascending: vec!["creation".to_string()],
        sort_descending: Vec::new(),
        columns: columns.iter().map(ToString::to_string).collect(),
    };

    let rows = match zfs.list(target, &opts) {
        Ok(rows) => rows,
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to get properties of '{target}'"));
        }
    };

    Ok(rows
        .into_iter()
        .filter(|row| row.first().map(String::as_str) != Some(target.as_str()))
        .collect())
}

/// Namespaced property value, `None` when the dataset or property is
/// unreadable.
pub fn get_property(zfs: &dyn ZfsBackend, dataset: &DatasetPath, property: &str) -> Option<String> {
    zfs.property(dataset, property).ok()
}

// ============================================================================
// Clone property carry-over
// ============================================================================

/// Local and received properties of `dataset`, prepared for cloning:
/// any pool `altroot` prefix is stripped from mountpoints (so clones made
/// from inside a chroot come out right), and `canmount=noauto` is forced
/// so new clones never auto-mount at the next real boot.
pub fn properties_for_clone(
    zfs: &dyn ZfsBackend,
    dataset: &DatasetPath,
) -> Result<Vec<Property>> {
    let opts = GetOptions {
        recursive: false,
        depth: None,
        kinds: vec![DatasetKind::Filesystem],
        sources: vec![PropertySource::Local, PropertySource::Received],
        columns: vec!["property".to_string(), "value".to_string()],
    };
    let rows = zfs
        .get(dataset, &["all"], &opts)
        .with_context(|| format!("Failed to get properties of '{dataset}'"))?;

    let altroot = zfs
        .pool_property(dataset.pool(), "altroot")
        .ok()
        .filter(|v| !config::is_unset(v));

    let mut props = Vec::new();
    for row in rows {
        let (Some(name), Some(value)) = (row.first(), row.get(1)) else {
            continue;
        };
        if name == "canmount" {
            continue;
        }
        let value = if name == "mountpoint" {
            strip_altroot(value, altroot.as_deref())
        } else {
            value.clone()
        };
        props.push(Property::new(name, value));
    }
    props.push(Property::new("canmount", "noauto"));

    Ok(props)
}

fn strip_altroot(mountpoint: &str, altroot: Option<&str>) -> String {
    let Some(altroot) = altroot else {
        return mountpoint.to_string();
    };
    match mountpoint.strip_prefix(altroot) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => mountpoint.to_string(),
    }
}

// ============================================================================
// Child mounts
// ============================================================================

/// A descendant dataset with its configured mountpoint.
pub struct ChildMount {
    /// Full dataset path.
    pub dataset: DatasetPath,
    /// Configured mountpoint value (may be `none` or `legacy`).
    pub mountpoint: String,
    /// Where the mountpoint setting comes from (`local`,
    /// `inherited from ...`, ...).
    pub source: String,
}

/// Descendants of a BE with their mountpoints, the BE itself excluded.
pub fn list_child_mountpoints(
    zfs: &dyn ZfsBackend,
    be: &DatasetPath,
) -> Result<Vec<ChildMount>> {
    let opts = ListOptions {
        recursive: true,
        depth: None,
        kinds: vec![DatasetKind::Filesystem],
        sort_ascending: Vec::new(),
        sort_descending: Vec::new(),
        columns: vec!["name".to_string(), "mountpoint".to_string()],
    };
    let rows = zfs.list(be, &opts)?;

    let source_opts = GetOptions {
        recursive: false,
        depth: None,
        kinds: vec![DatasetKind::Filesystem],
        sources: Vec::new(),
        columns: vec!["source".to_string()],
    };

    let mut children = Vec::new();
    for row in rows {
        let (Some(name), Some(mountpoint)) = (row.first(), row.get(1)) else {
            continue;
        };
        if name == be.as_str() {
            continue;
        }
        let dataset = DatasetPath::new(name.clone())?;
        let source = zfs
            .get(&dataset, &["mountpoint"], &source_opts)?
            .into_iter()
            .next()
            .and_then(|r| r.into_iter().next())
            .unwrap_or_else(|| "-".to_string());
        children.push(ChildMount {
            dataset,
            mountpoint: mountpoint.clone(),
            source,
        });
    }

    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use zfskit::MockZfs;

    fn booted_mock() -> MockZfs {
        let zfs = MockZfs::with_pool("rpool");
        zfs.add_filesystem("rpool/ROOT", 0);
        zfs.add_filesystem("rpool/ROOT/default", 0);
        zfs.set_mounted("rpool/ROOT/default", "/");
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/default");
        zfs
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .unwrap()
    }

    #[test]
    fn test_root_is_parent_of_mounted_dataset() {
        let zfs = booted_mock();
        assert_eq!(root(&zfs).unwrap().as_str(), "rpool/ROOT");
        assert_eq!(
            current_dataset(&zfs).unwrap().as_str(),
            "rpool/ROOT/default"
        );
    }

    #[test]
    fn test_root_requires_zfs_mount() {
        let zfs = MockZfs::with_pool("rpool");
        assert!(root(&zfs).is_err());
    }

    #[test]
    fn test_bootfs_for_pool_requires_value() {
        let zfs = MockZfs::with_pool("rpool");
        let err = bootfs_for_pool(&zfs, "rpool").unwrap_err();
        assert!(err.to_string().contains("No bootfs has been set"));
    }

    #[test]
    fn test_active_boot_environment_is_bootfs_child() {
        let zfs = booted_mock();
        assert_eq!(active_boot_environment(&zfs, "rpool").unwrap(), "default");

        let default = DatasetPath::new("rpool/ROOT/default").unwrap();
        assert!(is_active(&zfs, &default));
        assert!(is_current(&zfs, &default).unwrap());

        let other = DatasetPath::new("rpool/ROOT/other").unwrap();
        assert!(!is_active(&zfs, &other));
        assert!(!is_current(&zfs, &other).unwrap());
    }

    #[test]
    fn test_boot_mirror_root_found() {
        let zfs = booted_mock();
        zfs.add_pool("bpool");
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        let mirror = boot_mirror_root(&zfs).unwrap().unwrap();
        assert_eq!(mirror.as_str(), "bpool/boot");
        assert_eq!(
            boot_mirror_path(&mirror, "default-2").unwrap().as_str(),
            "bpool/boot/zedenv-default-2"
        );
    }

    #[test]
    fn test_boot_mirror_root_absent_without_separate_pool() {
        let zfs = booted_mock();
        assert!(boot_mirror_root(&zfs).unwrap().is_none());

        // Mounted, but not following the zedenv- naming scheme.
        zfs.add_pool("bpool");
        zfs.add_filesystem("bpool/sys", 0);
        zfs.add_filesystem("bpool/sys/boot", 0);
        zfs.set_mounted("bpool/sys/boot", "/boot");
        assert!(boot_mirror_root(&zfs).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_suffix_round_trips() {
        let suffix = snapshot_suffix();
        assert!(suffix.starts_with("ze-"));

        let encoded = parse_snapshot_suffix(&suffix).unwrap();
        let now = Local::now().naive_local();
        assert!((now - encoded).num_seconds().abs() < 120);
    }

    #[test]
    fn test_parse_snapshot_suffix_strips_prefix() {
        assert_eq!(
            parse_snapshot_suffix("ze-2020-01-01-00-0000"),
            Some(ts(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            parse_snapshot_suffix("2020-01-01-00-0530"),
            Some(ts(2020, 1, 1, 0, 5, 30))
        );
    }

    #[test]
    fn test_parse_snapshot_suffix_rejects_user_names() {
        assert_eq!(parse_snapshot_suffix("before-upgrade"), None);
        assert_eq!(parse_snapshot_suffix("mysnap"), None);
        assert_eq!(parse_snapshot_suffix("ze-notadate"), None);
    }

    #[test]
    fn test_parse_creation_handles_padded_day() {
        assert_eq!(
            parse_creation("Wed Jan  1 00:05 2020"),
            Some(ts(2020, 1, 1, 0, 5, 0))
        );
        assert_eq!(parse_creation("not a date"), None);
    }

    #[test]
    fn test_display_creation_collapses_whitespace() {
        assert_eq!(
            display_creation("Wed Jan  1 00:05 2020"),
            "Wed-Jan-1-00:05-2020"
        );
    }

    #[test]
    fn test_origin_is_synthetic_within_tolerance() {
        let encoded = ts(2020, 1, 1, 0, 5, 30);
        assert!(origin_is_synthetic(
            "ze-2020-01-01-00-0530",
            encoded - Duration::seconds(30)
        ));
        assert!(origin_is_synthetic("ze-2020-01-01-00-0530", encoded));
        assert!(!origin_is_synthetic(
            "ze-2020-01-01-00-0530",
            encoded + Duration::hours(2)
        ));
    }

    #[test]
    fn test_origin_without_timestamp_is_real() {
        assert!(!origin_is_synthetic("before-upgrade", ts(2020, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_list_datasets_skips_target_and_sorts() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/default-2", 5);

        let be_root = DatasetPath::new("rpool/ROOT").unwrap();
        let rows = list_datasets(&zfs, &be_root, &["name", "creation"]).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec!["rpool/ROOT/default", "rpool/ROOT/default-2"]);
    }

    #[test]
    fn test_list_datasets_empty_for_missing_root() {
        let zfs = MockZfs::with_pool("rpool");
        let be_root = DatasetPath::new("rpool/ROOT").unwrap();
        assert!(list_datasets(&zfs, &be_root, &["name"]).unwrap().is_empty());
    }

    #[test]
    fn test_properties_for_clone_forces_noauto_and_strips_altroot() {
        let zfs = booted_mock();
        zfs.set_local_property("rpool/ROOT/default", "canmount", "on");
        zfs.set_local_property("rpool/ROOT/default", "compression", "lz4");
        zfs.set_local_property("rpool/ROOT/default", "mountpoint", "/mnt/usr");
        zfs.set_pool_property("rpool", "altroot", "/mnt");

        let default = DatasetPath::new("rpool/ROOT/default").unwrap();
        let props = properties_for_clone(&zfs, &default).unwrap();

        let find = |name: &str| {
            props
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.as_str())
        };
        assert_eq!(find("canmount"), Some("noauto"));
        assert_eq!(find("compression"), Some("lz4"));
        assert_eq!(find("mountpoint"), Some("/usr"));
        assert_eq!(props.iter().filter(|p| p.name == "canmount").count(), 1);
    }

    #[test]
    fn test_strip_altroot_is_segment_aware() {
        assert_eq!(strip_altroot("/mnt", Some("/mnt")), "/");
        assert_eq!(strip_altroot("/mnt/usr", Some("/mnt")), "/usr");
        assert_eq!(strip_altroot("/mnt2/usr", Some("/mnt")), "/mnt2/usr");
        assert_eq!(strip_altroot("/usr", None), "/usr");
    }

    #[test]
    fn test_list_child_mountpoints_excludes_the_be() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/default/usr", 1);
        zfs.set_local_property("rpool/ROOT/default/usr", "mountpoint", "/usr");

        let default = DatasetPath::new("rpool/ROOT/default").unwrap();
        let children = list_child_mountpoints(&zfs, &default).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].dataset.as_str(), "rpool/ROOT/default/usr");
        assert_eq!(children[0].mountpoint, "/usr");
        assert_eq!(children[0].source, "local");
    }
}
