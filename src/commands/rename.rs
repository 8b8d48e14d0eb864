use crate::Context;
use crate::boot_env;
use crate::plugins::{self, Bootloader, PluginContext};
use crate::ui;
use anyhow::{Context as _, Result, bail};
use zfskit::{DatasetPath, ZfsBackend};

pub fn run(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    boot_environment: &str,
    new_name: &str,
    bootloader: Option<&str>,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    rename_environment(ctx, zfs, &be_root, boot_environment, new_name, bootloader)
}

pub(crate) fn rename_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    old: &str,
    new: &str,
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
                    boot_environment: old.to_string(),
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

    let old_dataset = be_root.child(old)?;
    let new_dataset = be_root.child(new)?;

    if zfs.exists(&new_dataset, None) {
        bail!("Boot environment '{new}' already exists.");
    }
    if boot_env::is_current(zfs, &old_dataset)? {
        bail!("Cannot rename current boot environment '{old}'.");
    }
    if boot_env::is_active(zfs, &old_dataset) {
        bail!("Cannot rename active boot environment '{old}'.");
    }
    if let Some(mountpoint) = zfs.dataset_mountpoint(&old_dataset)? {
        bail!(
            "Dataset is mounted to '{}', unmount and try again",
            mountpoint.display()
        );
    }

    zfs.rename(&old_dataset, &new_dataset)
        .with_context(|| format!("Failed to rename {old_dataset} to {new_dataset}"))?;
    if !ctx.quiet {
        ui::info(&format!("Renamed {old_dataset} to {new_dataset}."));
    }

    if let Some(mirror_root) = boot_env::boot_mirror_root(zfs)? {
        let old_mirror = boot_env::boot_mirror_path(&mirror_root, old)?;
        let new_mirror = boot_env::boot_mirror_path(&mirror_root, new)?;
        if zfs.exists(&old_mirror, None) {
            // The root pool half is renamed at this point, so a failure
            // here leaves the two halves under different names.
            if let Err(err) = zfs.rename(&old_mirror, &new_mirror) {
                bail!(
                    "Failed to rename the boot dataset '{old_mirror}' to '{new_mirror}'. \
                     The following error occurred:\n\n{err}\nStopping rename."
                );
            }
            if !ctx.quiet {
                ui::info(&format!("Renamed {old_mirror} to {new_mirror}."));
            }
        } else {
            ui::warn(&format!("No boot dataset {old_mirror} to rename, skipping."));
        }
    }

    if let Some((bl, instance)) = plugin.as_mut() {
        plugins::run_hook(instance.post_rename(), bl, "post rename", "rename")?;
    }

    if !ctx.quiet {
        ui::success(&format!("Renamed boot environment {old} to {new}."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfskit::MockZfs;

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

    fn rename(zfs: &MockZfs, old: &str, new: &str) -> Result<()> {
        rename_environment(&ctx(), zfs, &be_root(), old, new, None)
    }

    #[test]
    fn test_renames_environment_round_trip() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_snapshot("rpool/ROOT/other@keep", 6);
        zfs.set_local_property("rpool/ROOT/other", "org.zedenv:bootloader", "systemdboot");

        rename(&zfs, "other", "renamed").unwrap();
        assert!(zfs.contains("rpool/ROOT/renamed"));
        assert!(zfs.contains("rpool/ROOT/renamed@keep"));
        assert!(!zfs.contains("rpool/ROOT/other"));
        assert_eq!(
            zfs.properties_of("rpool/ROOT/renamed").get("org.zedenv:bootloader"),
            Some(&"systemdboot".to_string())
        );

        rename(&zfs, "renamed", "other").unwrap();
        assert!(zfs.contains("rpool/ROOT/other@keep"));
        assert!(!zfs.contains("rpool/ROOT/renamed"));
    }

    #[test]
    fn test_rejects_existing_target() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        let err = rename(&zfs, "other", "default").unwrap_err();
        assert!(err.to_string().contains("Boot environment 'default' already exists."));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_rejects_current_environment() {
        let zfs = booted_mock();
        let err = rename(&zfs, "default", "renamed").unwrap_err();
        assert!(err.to_string().contains("Cannot rename current boot environment 'default'."));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_rejects_active_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.set_pool_property("rpool", "bootfs", "rpool/ROOT/other");

        let err = rename(&zfs, "other", "renamed").unwrap_err();
        assert!(err.to_string().contains("Cannot rename active boot environment 'other'."));
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_rejects_mounted_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.set_mounted("rpool/ROOT/other", "/mnt/be");

        let err = rename(&zfs, "other", "renamed").unwrap_err();
        assert!(
            err.to_string()
                .contains("Dataset is mounted to '/mnt/be', unmount and try again")
        );
        assert!(zfs.mutations().is_empty());
    }

    #[test]
    fn test_renames_boot_pool_mirror() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("bpool", 0);
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.add_filesystem("bpool/boot/zedenv-other", 5);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        rename(&zfs, "other", "renamed").unwrap();

        assert!(zfs.contains("bpool/boot/zedenv-renamed"));
        assert!(!zfs.contains("bpool/boot/zedenv-other"));
    }
}
