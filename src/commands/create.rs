use crate::Context;
use crate::boot_env;
use crate::plugins::{self, Bootloader, PluginContext};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use zfskit::{DatasetKind, DatasetPath, ErrorCategory, ListOptions, ZfsBackend};

pub fn run(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    boot_environment: &str,
    existing: Option<&str>,
    bootloader: Option<&str>,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    create_environment(ctx, zfs, &be_root, boot_environment, existing, bootloader)
}

/// Where a new boot environment is cloned from.
struct CloneSource {
    dataset: DatasetPath,
    /// Snapshot suffix to clone at; `None` means take a fresh one.
    suffix: Option<String>,
}

pub(crate) fn create_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    name: &str,
    existing: Option<&str>,
    bootloader: Option<&str>,
) -> Result<()> {
    let current_be = boot_env::active_boot_environment(zfs, be_root.pool())
        .context("Failed to get active boot environment")?;

    let mut plugin = bootloader
        .map(|bl| -> Result<(&str, Box<dyn Bootloader + '_>)> {
            let instance = plugins::resolve(
                bl,
                PluginContext {
                    zfs,
                    boot_environment: name.to_string(),
                    old_boot_environment: current_be.clone(),
                    be_root: be_root.clone(),
                    noconfirm: false,
                    noop: false,
                },
            )?;
            if !ctx.quiet {
                ui::info(&format!("Using plugin {bl}"));
            }
            Ok((bl, instance))
        })
        .transpose()?;

    let target = be_root.child(name)?;
    if zfs.exists(&target, None) {
        bail!("Failed to create {target}, already exists.");
    }

    let source = resolve_clone_source(zfs, be_root, existing)?;
    let suffix = match source.suffix {
        Some(suffix) => suffix,
        None => take_source_snapshot(zfs, &source.dataset)?,
    };

    clone_subtree(zfs, &source.dataset, &suffix, &target)?;

    if let Some(mirror_root) = boot_env::boot_mirror_root(zfs)? {
        mirror_boot_environment(
            zfs,
            &mirror_root,
            source.dataset.child_name(),
            name,
            &suffix,
        )?;
    }

    if let Some((bl, instance)) = plugin.as_mut() {
        plugins::run_hook(instance.post_create(), bl, "post create", "creation")?;
    }

    if !ctx.quiet {
        ui::success(&format!("Created boot environment {name}"));
    }
    Ok(())
}

/// Defaults to the currently booted dataset. `existing` selects another
/// boot environment, optionally pinned to one of its snapshots with
/// `name@snapshot`.
fn resolve_clone_source(
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    existing: Option<&str>,
) -> Result<CloneSource> {
    let Some(existing) = existing else {
        return Ok(CloneSource {
            dataset: boot_env::current_dataset(zfs)?,
            suffix: None,
        });
    };

    let (be_name, suffix) = match existing.split_once('@') {
        Some((be_name, suffix)) => (be_name, Some(suffix)),
        None => (existing, None),
    };
    if be_name.contains('/') {
        bail!("Existing boot environment name {be_name} should not contain '/'");
    }
    let dataset = be_root.child(be_name)?;

    match suffix {
        Some(suffix) => {
            let snapshot = dataset.snapshot(suffix)?;
            if !zfs.exists(&snapshot, Some(DatasetKind::Snapshot)) {
                bail!("The dataset {snapshot} doesn't exist.");
            }
            Ok(CloneSource {
                dataset,
                suffix: Some(suffix.to_string()),
            })
        }
        None => {
            if !zfs.exists(&dataset, Some(DatasetKind::Filesystem)) {
                bail!("The dataset {dataset} doesn't exist.");
            }
            Ok(CloneSource {
                dataset,
                suffix: None,
            })
        }
    }
}

/// Takes a recursive timestamped snapshot of the source and returns its
/// suffix. Suffixes have minute resolution, so an immediate retry after a
/// create can collide with the snapshot just taken.
fn take_source_snapshot(zfs: &dyn ZfsBackend, source: &DatasetPath) -> Result<String> {
    let suffix = boot_env::snapshot_suffix();
    let snapshot = source.snapshot(&suffix)?;
    match zfs.snapshot(&snapshot, true) {
        Ok(()) => Ok(suffix),
        Err(err) if err.category() == ErrorCategory::AlreadyExists => {
            bail!("Snapshot {snapshot} already exists, retry in a moment.")
        }
        Err(err) => Err(err).with_context(|| format!("Failed to take snapshot {snapshot}")),
    }
}

/// Clones `source` and every filesystem under it at `@suffix` into the
/// matching position under `target`, carrying local properties over and
/// forcing `canmount=noauto`.
fn clone_subtree(
    zfs: &dyn ZfsBackend,
    source: &DatasetPath,
    suffix: &str,
    target: &DatasetPath,
) -> Result<()> {
    let opts = ListOptions {
        recursive: true,
        kinds: vec![DatasetKind::Filesystem],
        columns: vec!["name".to_string()],
        ..ListOptions::default()
    };
    // Unsorted output comes back parents-first, which is also clone order.
    let rows = zfs
        .list(source, &opts)
        .with_context(|| format!("Failed to get properties of '{source}'"))?;

    for row in rows {
        let Some(name) = row.into_iter().next() else {
            continue;
        };
        let child = DatasetPath::new(name)?;
        let snapshot = child.snapshot(suffix)?;
        if !zfs.exists(&snapshot, Some(DatasetKind::Snapshot)) {
            bail!("Failed to find snapshot {snapshot}.");
        }

        let destination = match child.relative_to(source) {
            Some("") => target.clone(),
            Some(rest) => target.child(rest)?,
            None => continue,
        };

        let properties = boot_env::properties_for_clone(zfs, &child)?;
        zfs.clone(&snapshot, &destination, &properties)
            .with_context(|| format!("Failed to create {destination} from {snapshot}"))?;
    }
    Ok(())
}

/// Clones the matching `zedenv-` dataset on the boot pool using the same
/// snapshot suffix as the root pool clone, so the two halves of a boot
/// environment stay identifiable as one unit.
fn mirror_boot_environment(
    zfs: &dyn ZfsBackend,
    mirror_root: &DatasetPath,
    source_name: &str,
    name: &str,
    suffix: &str,
) -> Result<()> {
    let mirror_source = boot_env::boot_mirror_path(mirror_root, source_name)?;
    if !zfs.exists(&mirror_source, Some(DatasetKind::Filesystem)) {
        ui::warn(&format!("No boot dataset {mirror_source} to clone, skipping."));
        return Ok(());
    }

    let snapshot = mirror_source.snapshot(suffix)?;
    if !zfs.exists(&snapshot, Some(DatasetKind::Snapshot)) {
        zfs.snapshot(&snapshot, true)
            .with_context(|| format!("Failed to take snapshot {snapshot}"))?;
    }

    let mirror_target = boot_env::boot_mirror_path(mirror_root, name)?;
    clone_subtree(zfs, &mirror_source, suffix, &mirror_target)
}
