use crate::Context;
use crate::boot_env;
use crate::plugins::{self, Bootloader, HookResult, PluginContext};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use log::debug;
use std::path::Path;
use zfskit::{DatasetKind, DatasetPath, ListOptions, Property, ZfsBackend};

pub fn run(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    boot_environment: &str,
    bootloader: Option<&str>,
    noconfirm: bool,
    noop: bool,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    activate_environment(
        ctx,
        zfs,
        &be_root,
        boot_environment,
        bootloader,
        noconfirm,
        noop,
    )
}

pub(crate) fn activate_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    name: &str,
    bootloader: Option<&str>,
    noconfirm: bool,
    noop: bool,
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
                    noconfirm,
                    noop,
                },
            )?;
            if !ctx.quiet {
                ui::info(&format!("Using plugin {bl}"));
            }
            Ok((bl, instance))
        })
        .transpose()?;

    if let Some((bl, instance)) = plugin.as_mut() {
        plugins::run_hook(instance.pre_activate(), bl, "pre activate", "activation")?;
    }

    let requested = be_root.child(name)?;
    if !zfs.exists(&requested, Some(DatasetKind::Filesystem)) {
        bail!("Boot environment {name} doesn't exist");
    }

    if current_be == name {
        if !ctx.quiet {
            ui::info(&format!("Boot environment {name} is already active."));
        }
    } else if noop {
        if !ctx.quiet {
            ui::info(&format!("Would set bootfs to {requested}."));
        }
    } else {
        // An environment mounted anywhere but `/` gets unmounted, fixed
        // up through a temporary mount, and pointed back at `/`.
        let mountpoint = zfs.dataset_mountpoint(&requested)?;
        if mountpoint.as_deref() != Some(Path::new("/")) {
            if mountpoint.is_some() {
                zfs.unmount(&requested)
                    .with_context(|| format!("Failed unmounting dataset {requested}"))?;
            }
            customize_with_temporary_mount(zfs, &requested, &mut plugin)?;
        }

        zfs.pool_set(be_root.pool(), &Property::new("bootfs", requested.as_str()))
            .with_context(|| format!("Failed to set bootfs to {requested}"))?;
        if !ctx.quiet {
            ui::info(&format!("Set bootfs to {requested}"));
        }
    }

    if !noop {
        disable_sibling_automounts(ctx, zfs, be_root, &requested)?;
        configure_target(ctx, zfs, &requested)?;
    }

    if let Some(mirror_root) = boot_env::boot_mirror_root(zfs)? {
        let mirror = boot_env::boot_mirror_path(&mirror_root, name)?;
        if zfs.exists(&mirror, Some(DatasetKind::Filesystem)) {
            if !noop {
                disable_sibling_automounts(ctx, zfs, &mirror_root, &mirror)?;
                configure_target(ctx, zfs, &mirror)?;
            }
        } else {
            ui::warn(&format!("No boot dataset {mirror} to activate, skipping."));
        }
    }

    if let Some((bl, instance)) = plugin.as_mut() {
        plugins::run_hook(instance.post_activate(), bl, "post activate", "activation")?;
    }

    if !ctx.quiet {
        ui::success(&format!("Activated boot environment {name}."));
    }
    Ok(())
}

/// Mounts the target at a throwaway directory so the bootloader plugin
/// can edit files inside it, then unmounts and restores `mountpoint=/`.
/// The restore runs no matter how the mount window went.
fn customize_with_temporary_mount(
    zfs: &dyn ZfsBackend,
    requested: &DatasetPath,
    plugin: &mut Option<(&str, Box<dyn Bootloader + '_>)>,
) -> Result<()> {
    zfs.set(requested, &Property::new("canmount", "noauto"))
        .with_context(|| format!("Failed to set canmount=noauto on {requested}"))?;

    let tmpdir = tempfile::Builder::new()
        .prefix("zedenv-activate-")
        .tempdir()
        .context("Failed to create temporary mountpoint")?;
    zfs.set(
        requested,
        &Property::new("mountpoint", tmpdir.path().display().to_string()),
    )
    .with_context(|| format!("Failed to set mountpoint on {requested}"))?;

    let hook = (|| -> Result<Option<HookResult>> {
        zfs.mount(requested)
            .with_context(|| format!("Failed mounting dataset {requested}"))?;
        debug!("Mounted {requested} at {}.", tmpdir.path().display());
        let result = plugin
            .as_mut()
            .map(|(_, instance)| instance.mid_activate(tmpdir.path()));
        zfs.unmount(requested)
            .with_context(|| format!("Failed unmounting dataset {requested}"))?;
        Ok(result)
    })();

    let restore = zfs
        .set(requested, &Property::new("mountpoint", "/"))
        .with_context(|| format!("Failed to set mountpoint=/ on {requested}"));

    let hook = hook?;
    restore?;

    if let (Some(result), Some((bl, _))) = (hook, plugin.as_ref()) {
        plugins::run_hook(result, bl, "mid activate", "activation")?;
    }
    Ok(())
}

/// Turns off automount for everything under `root` except the requested
/// environment and its descendants, so only one environment comes up at
/// the next boot.
fn disable_sibling_automounts(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    root: &DatasetPath,
    requested: &DatasetPath,
) -> Result<()> {
    let opts = ListOptions {
        recursive: true,
        kinds: vec![DatasetKind::Filesystem],
        columns: vec!["name".to_string()],
        ..ListOptions::default()
    };
    let rows = zfs
        .list(root, &opts)
        .with_context(|| format!("Failed to get list of datasets for '{root}'"))?;

    for row in rows {
        let Some(name) = row.into_iter().next() else {
            continue;
        };
        let dataset = DatasetPath::new(name)?;
        if requested.contains(&dataset) || dataset == *root {
            continue;
        }
        zfs.set(&dataset, &Property::new("canmount", "noauto"))
            .with_context(|| format!("Failed to set canmount=noauto on {dataset}"))?;
        if !ctx.quiet {
            ui::info(&format!("Disabled automount for {dataset}"));
        }
    }
    Ok(())
}

/// Final dataset state for an activated environment: `canmount=noauto`,
/// and promoted out of clone status so its lineage can be destroyed later.
fn configure_target(ctx: &Context, zfs: &dyn ZfsBackend, requested: &DatasetPath) -> Result<()> {
    zfs.set(requested, &Property::new("canmount", "noauto"))
        .with_context(|| format!("Failed to set canmount=noauto on {requested}"))?;

    if zfs.is_clone(requested)? {
        zfs.promote(requested)
            .with_context(|| format!("Failed to promote BE {requested}"))?;
        if !ctx.quiet {
            ui::info(&format!("Promoted {requested}."));
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

    fn activate(zfs: &MockZfs, name: &str, noop: bool) -> Result<()> {
        activate_environment(&ctx(), zfs, &be_root(), name, None, true, noop)
    }

    fn bootfs_sets(zfs: &MockZfs) -> Vec<MockCall> {
        zfs.mutations()
            .into_iter()
            .filter(|c| matches!(c, MockCall::PoolSet { property, .. } if property == "bootfs"))
            .collect()
    }

    #[test]
    fn test_activates_new_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        activate(&zfs, "other", false).unwrap();

        assert_eq!(
            bootfs_sets(&zfs),
            vec![MockCall::PoolSet {
                pool: "rpool".to_string(),
                property: "bootfs".to_string(),
                value: "rpool/ROOT/other".to_string(),
            }]
        );
        // The previously active environment lost its automount.
        assert!(zfs.mutations().contains(&MockCall::Set {
            dataset: "rpool/ROOT/default".to_string(),
            property: "canmount".to_string(),
            value: "noauto".to_string(),
        }));
        // Temporary mount window was closed and the mountpoint restored.
        assert!(zfs.calls().contains(&MockCall::Unmount("rpool/ROOT/other".to_string())));
        assert_eq!(
            zfs.properties_of("rpool/ROOT/other").get("mountpoint"),
            Some(&"/".to_string())
        );
    }

    #[test]
    fn test_second_activation_skips_bootfs() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        activate(&zfs, "other", false).unwrap();
        zfs.clear_calls();
        activate(&zfs, "other", false).unwrap();

        assert!(bootfs_sets(&zfs).is_empty());
        assert!(
            !zfs
                .calls()
                .iter()
                .any(|c| matches!(c, MockCall::Mount(_) | MockCall::Unmount(_)))
        );
    }

    #[test]
    fn test_noop_performs_no_calls() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        activate(&zfs, "other", true).unwrap();

        assert!(zfs.calls().is_empty());
    }

    #[test]
    fn test_promotes_clone_on_activation() {
        let zfs = booted_mock();
        zfs.add_snapshot("rpool/ROOT/default@s", 1);
        zfs.add_clone("rpool/ROOT/default@s", "rpool/ROOT/other", 5);

        activate(&zfs, "other", false).unwrap();

        assert!(
            zfs
                .mutations()
                .contains(&MockCall::Promote("rpool/ROOT/other".to_string()))
        );
        assert_eq!(zfs.origin_of("rpool/ROOT/other"), None);
        assert_eq!(
            zfs.origin_of("rpool/ROOT/default"),
            Some("rpool/ROOT/other@s".to_string())
        );
    }

    #[test]
    fn test_sibling_disable_is_segment_aware() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("rpool/ROOT/other/usr", 5);
        zfs.add_filesystem("rpool/ROOT/other-2", 6);

        activate(&zfs, "other", false).unwrap();

        let disabled: Vec<String> = zfs
            .mutations()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Set {
                    dataset, property, ..
                } if property == "canmount" => Some(dataset),
                _ => None,
            })
            .collect();
        // The prefix-sharing sibling is disabled, the child is left alone.
        assert!(disabled.contains(&"rpool/ROOT/other-2".to_string()));
        assert!(!disabled.contains(&"rpool/ROOT/other/usr".to_string()));
    }

    #[test]
    fn test_missing_environment_fails() {
        let zfs = booted_mock();
        let err = activate(&zfs, "nope", false).unwrap_err();
        assert!(err.to_string().contains("Boot environment nope doesn't exist"));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_mirror_environment_configured() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("bpool", 0);
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.add_filesystem("bpool/boot/zedenv-other", 5);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        activate(&zfs, "other", false).unwrap();

        assert!(zfs.mutations().contains(&MockCall::Set {
            dataset: "bpool/boot/zedenv-default".to_string(),
            property: "canmount".to_string(),
            value: "noauto".to_string(),
        }));
        assert!(zfs.mutations().contains(&MockCall::Set {
            dataset: "bpool/boot/zedenv-other".to_string(),
            property: "canmount".to_string(),
            value: "noauto".to_string(),
        }));
    }
}
