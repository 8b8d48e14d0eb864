use crate::Context;
use crate::boot_env;
use crate::config;
use crate::plugins::{self, Bootloader, PluginContext};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use dialoguer::Confirm;
use log::debug;
use zfskit::{DatasetKind, DatasetPath, ListOptions, ZfsBackend};

pub fn run(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    boot_environment: &str,
    bootloader: Option<&str>,
    noconfirm: bool,
    noop: bool,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    destroy_environment(
        ctx,
        zfs,
        &be_root,
        boot_environment,
        bootloader,
        noconfirm,
        noop,
    )
}

/// What the origin snapshot of a destroyed clone is to its lineage.
enum OriginKind {
    /// Taken automatically at create time; a leftover once the clone is
    /// gone.
    Synthetic(DatasetPath),
    /// Pre-existing history the user made on purpose.
    Real(DatasetPath),
    /// Not a clone.
    None,
}

pub(crate) fn destroy_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    target: &str,
    bootloader: Option<&str>,
    noconfirm: bool,
    noop: bool,
) -> Result<()> {
    // `name@snapshot` destroys a single snapshot of an environment.
    let dataset = be_root.child(target)?;
    if !zfs.exists(&dataset, None) {
        bail!("The destroy target {target} does not exist.");
    }

    let current_be = boot_env::active_boot_environment(zfs, be_root.pool())
        .context("Failed to get active boot environment")?;
    if current_be == target {
        bail!("Cannot destroy current active environment '{target}'.");
    }
    if zfs.dataset_mountpoint(&dataset)?.as_deref() == Some(std::path::Path::new("/")) {
        bail!("Cannot destroy current root dataset environment '{target}'.");
    }

    if !noconfirm {
        let prompt = format!(
            "Do you really want to destroy '{target}'?\nThis action will be permanent.\n\nDestroy '{dataset}'?"
        );
        let confirmed = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            return Ok(());
        }
    }

    // Fall back to the bootloader recorded on the target itself, so an
    // environment created with a plugin cleans up after that plugin.
    let bootloader_name = match bootloader {
        Some(bl) => Some(bl.to_string()),
        None => boot_env::get_property(zfs, &dataset, &config::core_key("bootloader"))
            .filter(|value| !config::is_unset(value)),
    };
    let mut plugin = match &bootloader_name {
        Some(bl) => {
            let instance = plugins::resolve(
                bl,
                PluginContext {
                    zfs,
                    boot_environment: target.to_string(),
                    old_boot_environment: current_be,
                    be_root: be_root.clone(),
                    noconfirm,
                    noop,
                },
            )?;
            if !ctx.quiet {
                ui::info(&format!("Using plugin {bl}"));
            }
            Some((bl.clone(), instance))
        }
        None => None,
    };

    destroy_element(ctx, zfs, target, &dataset, noconfirm, noop)?;

    if let Some(mirror_root) = boot_env::boot_mirror_root(zfs)? {
        let mirror = boot_env::boot_mirror_path(&mirror_root, target)?;
        if zfs.exists(&mirror, None) {
            destroy_element(ctx, zfs, target, &mirror, noconfirm, noop)?;
        } else {
            ui::warn(&format!("No boot dataset {mirror} to destroy, skipping."));
        }
    }

    if let Some((bl, instance)) = plugin.as_mut() {
        plugins::run_hook(instance.post_destroy(target), bl, "post destroy", "destroy")?;
    }

    if !ctx.quiet {
        ui::success(&format!("Destroyed boot environment {target} successfully."));
    }
    Ok(())
}

/// Destroys one dataset (root-pool BE or its boot-pool mirror), keeping
/// the snapshot/clone graph consistent: dependents are promoted onto a
/// live origin first, and synthetic create-time origin snapshots are
/// cleaned up afterwards when confirmed.
fn destroy_element(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    target: &str,
    dataset: &DatasetPath,
    noconfirm: bool,
    noop: bool,
) -> Result<()> {
    if dataset.is_snapshot() {
        if !noop {
            zfs.destroy_snapshot(dataset)
                .with_context(|| format!("Failed to destroy {dataset}"))
                .context("Snapshot may be origin for other boot environment.")?;
        }
        if !ctx.quiet {
            ui::info(&format!("Destroyed {dataset}."));
        }
        return Ok(());
    }

    promote_dependents(ctx, zfs, dataset, noop)?;

    // Promotions can re-point this dataset's own origin, so read it after.
    let origin_snaps = origin_snapshots(zfs, dataset)?;
    let destroy_origins = match classify_origin(zfs, dataset)? {
        OriginKind::Synthetic(origin) => confirm_origin_destroy(ctx, target, &origin, noconfirm)?,
        OriginKind::Real(origin) => {
            debug!("Keeping origin snapshot {origin}.");
            false
        }
        OriginKind::None => false,
    };

    if !noop {
        zfs.destroy_recursive(dataset)
            .with_context(|| format!("Failed to destroy {dataset}"))?;
    }
    if !ctx.quiet {
        ui::info(&format!("Destroyed {dataset}."));
    }

    repair_origins(ctx, zfs, dataset, &origin_snaps, noop)?;
    if destroy_origins {
        destroy_origin_snapshots(ctx, zfs, &origin_snaps, noop)?;
    }
    Ok(())
}

/// Promotes every clone whose origin snapshot lives inside the doomed
/// subtree, so the recursive destroy cannot take shared history with it.
fn promote_dependents(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    dataset: &DatasetPath,
    noop: bool,
) -> Result<()> {
    for (clone, origin) in pool_origins(zfs, dataset.pool())? {
        let Some(origin_fs) = origin.snapshot_parent() else {
            continue;
        };
        if !dataset.contains(&origin_fs) {
            continue;
        }
        if !noop {
            zfs.promote(&clone)
                .with_context(|| format!("Failed to promote {clone}"))?;
        }
        if !ctx.quiet {
            ui::info(&format!("Promoted {clone}."));
        }
    }
    Ok(())
}

/// Promotes clones still referencing one of the destroyed environment's
/// origin snapshots. Promotion moves the snapshot under the surviving
/// clone, which also takes it off the cleanup list by name.
fn repair_origins(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    dataset: &DatasetPath,
    origin_snaps: &[DatasetPath],
    noop: bool,
) -> Result<()> {
    if origin_snaps.is_empty() {
        return Ok(());
    }
    for (clone, origin) in pool_origins(zfs, dataset.pool())? {
        // Under noop the subtree is still listed; a real destroy removed it.
        if dataset.contains(&clone) {
            continue;
        }
        if !origin_snaps.contains(&origin) {
            continue;
        }
        if !noop {
            zfs.promote(&clone)
                .with_context(|| format!("Failed to promote {clone}"))?;
        }
        if !ctx.quiet {
            ui::info(&format!("Promoted {clone}."));
        }
    }
    Ok(())
}

/// Every (clone, origin) pair in the pool.
fn pool_origins(zfs: &dyn ZfsBackend, pool: &str) -> Result<Vec<(DatasetPath, DatasetPath)>> {
    let pool_root = DatasetPath::new(pool)?;
    let opts = ListOptions {
        recursive: true,
        kinds: DatasetKind::ALL.to_vec(),
        columns: vec!["name".to_string(), "origin".to_string()],
        ..ListOptions::default()
    };
    let rows = zfs
        .list(&pool_root, &opts)
        .with_context(|| format!("Failed to get list of datasets for '{pool}'"))?;

    let mut pairs = Vec::new();
    for row in rows {
        let (Some(name), Some(origin)) = (row.first(), row.get(1)) else {
            continue;
        };
        if origin == "-" {
            continue;
        }
        pairs.push((DatasetPath::new(name.clone())?, DatasetPath::new(origin.clone())?));
    }
    Ok(pairs)
}

/// Origin snapshots referenced by datasets in the subtree, deduplicated.
fn origin_snapshots(zfs: &dyn ZfsBackend, dataset: &DatasetPath) -> Result<Vec<DatasetPath>> {
    let opts = ListOptions {
        recursive: true,
        kinds: vec![DatasetKind::Filesystem, DatasetKind::Volume],
        columns: vec!["name".to_string(), "origin".to_string()],
        ..ListOptions::default()
    };
    let rows = zfs
        .list(dataset, &opts)
        .with_context(|| format!("Failed to list origin snapshots for '{dataset}'"))?;

    let mut origins = Vec::new();
    for row in rows {
        let Some(origin) = row.get(1) else {
            continue;
        };
        if origin == "-" {
            continue;
        }
        let origin = DatasetPath::new(origin.clone())?;
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }
    Ok(origins)
}

/// Whether the origin snapshot was taken by create for this clone: its
/// name encodes a timestamp matching the snapshot's own creation time.
fn classify_origin(zfs: &dyn ZfsBackend, dataset: &DatasetPath) -> Result<OriginKind> {
    let Some(origin) = zfs.origin(dataset)? else {
        return Ok(OriginKind::None);
    };
    let synthetic = match origin.snapshot_name() {
        Some(suffix) => {
            let creation = zfs
                .property(&origin, "creation")
                .with_context(|| format!("Failed to get creation of {origin}"))?;
            boot_env::parse_creation(&creation)
                .is_some_and(|created| boot_env::origin_is_synthetic(suffix, created))
        }
        None => false,
    };
    Ok(if synthetic {
        OriginKind::Synthetic(origin)
    } else {
        OriginKind::Real(origin)
    })
}

fn confirm_origin_destroy(
    ctx: &Context,
    target: &str,
    origin: &DatasetPath,
    noconfirm: bool,
) -> Result<bool> {
    if noconfirm {
        return Ok(true);
    }
    let suffix = origin.snapshot_name().unwrap_or("");
    println!(
        "The origin snapshot '{suffix}' for the boot environment '{target}' still exists, do you want to destroy it? This action will be permanent.\n"
    );
    let destroy = Confirm::new()
        .with_prompt(format!("Destroy '{origin}'?"))
        .default(false)
        .interact()
        .context("Failed to read confirmation")?;
    if !destroy && !ctx.quiet {
        ui::info(&format!("The origin snapshot '{suffix}' will be kept."));
    }
    Ok(destroy)
}

fn destroy_origin_snapshots(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    origin_snaps: &[DatasetPath],
    noop: bool,
) -> Result<()> {
    for snap in origin_snaps {
        // A repair promotion moved the snapshot under the surviving clone,
        // leaving nothing behind at the old name.
        if !zfs.exists(snap, Some(DatasetKind::Snapshot)) {
            continue;
        }
        if !noop {
            zfs.destroy_snapshot(snap)
                .with_context(|| format!("Failed to destroy {snap}"))?;
        }
        if !ctx.quiet {
            ui::info(&format!("Destroyed {snap}."));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfskit::{MockCall, MockZfs};

    fn booted_mock() -> MockZfs {
        let zfs = MockZfs::with_pool("rpool");
        zfs.add_filesystem("rpool", 0);
        zfs.add_filesystem("rpool/ROOT", 0);
        zfs.add_filesystem("rpool/ROOT/default", 0);
        zfs.set_mounted("rpool/ROOT/default", "/");
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/default");
        zfs
    }

    fn ctx() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    fn be_root() -> DatasetPath {
        DatasetPath::new("rpool/ROOT").unwrap()
    }

    fn destroy(zfs: &MockZfs, target: &str, noop: bool) -> Result<()> {
        destroy_environment(&ctx(), zfs, &be_root(), target, None, true, noop)
    }

    #[test]
    fn test_rejects_missing_target() {
        let zfs = booted_mock();
        let err = destroy(&zfs, "nope", false).unwrap_err();
        assert!(err.to_string().contains("The destroy target nope does not exist."));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_rejects_active_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/other");

        let err = destroy(&zfs, "other", false).unwrap_err();
        assert!(err.to_string().contains("Cannot destroy current active environment 'other'."));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_rejects_mounted_root_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/other");

        let err = destroy(&zfs, "default", false).unwrap_err();
        assert!(
            err.to_string()
                .contains("Cannot destroy current root dataset environment 'default'.")
        );
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_promotes_dependents_before_destroy() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/a", 0);
        zfs.add_snapshot("rpool/ROOT/a@s1", 1);
        zfs.add_clone("rpool/ROOT/a@s1", "rpool/ROOT/b", 5);
        zfs.add_snapshot("rpool/ROOT/b@sb", 6);
        zfs.add_clone("rpool/ROOT/b@sb", "rpool/ROOT/c", 8);
        zfs.set_mounted("rpool/ROOT/b", "/");
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/b");

        destroy(&zfs, "a", false).unwrap();

        let mutations = zfs.mutations();
        let promote = mutations
            .iter()
            .position(|c| *c == MockCall::Promote("rpool/ROOT/b".to_string()))
            .unwrap();
        let destroyed = mutations
            .iter()
            .position(|c| *c == MockCall::DestroyRecursive("rpool/ROOT/a".to_string()))
            .unwrap();
        assert!(promote < destroyed);

        assert!(!zfs.contains("rpool/ROOT/a"));
        // History transferred to the promoted clone, dependents intact.
        assert!(zfs.contains("rpool/ROOT/b@s1"));
        assert_eq!(zfs.origin_of("rpool/ROOT/c"), Some("rpool/ROOT/b@sb".to_string()));
    }

    #[test]
    fn test_synthetic_origin_destroyed_with_noconfirm() {
        let zfs = booted_mock();
        zfs.add_snapshot("rpool/ROOT/default@ze-2020-01-01-00-0500", 5);
        zfs.add_clone(
            "rpool/ROOT/default@ze-2020-01-01-00-0500",
            "rpool/ROOT/default-2",
            5,
        );

        destroy(&zfs, "default-2", false).unwrap();

        assert!(!zfs.contains("rpool/ROOT/default-2"));
        assert!(!zfs.contains("rpool/ROOT/default@ze-2020-01-01-00-0500"));
    }

    #[test]
    fn test_real_origin_preserved() {
        let zfs = booted_mock();
        zfs.add_snapshot("rpool/ROOT/default@before-upgrade", 5);
        zfs.add_clone("rpool/ROOT/default@before-upgrade", "rpool/ROOT/default-2", 5);

        destroy(&zfs, "default-2", false).unwrap();

        assert!(!zfs.contains("rpool/ROOT/default-2"));
        assert!(zfs.contains("rpool/ROOT/default@before-upgrade"));
        assert!(
            !zfs
                .mutations()
                .iter()
                .any(|c| matches!(c, MockCall::DestroySnapshot(_)))
        );
    }

    #[test]
    fn test_shared_origin_moves_to_surviving_sibling() {
        let zfs = booted_mock();
        zfs.add_snapshot("rpool/ROOT/default@ze-2020-01-01-00-0500", 5);
        zfs.add_clone("rpool/ROOT/default@ze-2020-01-01-00-0500", "rpool/ROOT/b1", 5);
        zfs.add_clone("rpool/ROOT/default@ze-2020-01-01-00-0500", "rpool/ROOT/b2", 6);

        destroy(&zfs, "b1", false).unwrap();

        assert!(!zfs.contains("rpool/ROOT/b1"));
        assert!(zfs.contains("rpool/ROOT/b2"));
        // The snapshot survives under the promoted sibling instead of
        // being destroyed with the old name.
        assert!(zfs.contains("rpool/ROOT/b2@ze-2020-01-01-00-0500"));
        assert!(!zfs.contains("rpool/ROOT/default@ze-2020-01-01-00-0500"));
        assert!(
            !zfs
                .mutations()
                .iter()
                .any(|c| matches!(c, MockCall::DestroySnapshot(_)))
        );
        assert_eq!(
            zfs.origin_of("rpool/ROOT/default"),
            Some("rpool/ROOT/b2@ze-2020-01-01-00-0500".to_string())
        );
    }

    #[test]
    fn test_noop_performs_no_mutations() {
        let zfs = booted_mock();
        zfs.add_snapshot("rpool/ROOT/default@ze-2020-01-01-00-0500", 5);
        zfs.add_clone(
            "rpool/ROOT/default@ze-2020-01-01-00-0500",
            "rpool/ROOT/default-2",
            5,
        );

        destroy(&zfs, "default-2", true).unwrap();

        assert!(zfs.mutations().is_empty());
        assert!(zfs.contains("rpool/ROOT/default-2"));
        assert!(zfs.contains("rpool/ROOT/default@ze-2020-01-01-00-0500"));
    }

    #[test]
    fn test_destroys_single_snapshot() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/default-2", 2);
        zfs.add_snapshot("rpool/ROOT/default-2@old", 3);

        destroy(&zfs, "default-2@old", false).unwrap();

        assert!(!zfs.contains("rpool/ROOT/default-2@old"));
        assert!(zfs.contains("rpool/ROOT/default-2"));
        assert_eq!(
            zfs.mutations(),
            vec![MockCall::DestroySnapshot("rpool/ROOT/default-2@old".to_string())]
        );
    }

    #[test]
    fn test_mirror_destroyed_with_main_dataset() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/default-2", 5);
        zfs.add_filesystem("bpool", 0);
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default-2", 5);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        destroy(&zfs, "default-2", false).unwrap();

        assert!(!zfs.contains("rpool/ROOT/default-2"));
        assert!(!zfs.contains("bpool/boot/zedenv-default-2"));
        assert!(zfs.contains("bpool/boot/zedenv-default"));
    }
}
