use crate::Context;
use crate::boot_env;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use zfskit::{DatasetKind, DatasetPath, ZfsBackend};

pub fn run(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    boot_environment: &str,
    mountpoint: Option<&str>,
) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    let path = mount_environment(ctx, zfs, &be_root, boot_environment, mountpoint)?;
    // The mount location is the command's output, so scripts can capture it.
    println!("{}", path.display());
    Ok(())
}

pub(crate) fn mount_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    name: &str,
    mountpoint: Option<&str>,
) -> Result<PathBuf> {
    let dataset = be_root.child(name)?;
    if !zfs.exists(&dataset, Some(DatasetKind::Filesystem)) {
        bail!("Boot environment doesn't exist {name}.");
    }
    if let Some(current) = zfs.dataset_mountpoint(&dataset)? {
        if current == Path::new("/") {
            bail!("Cannot mount root dataset.");
        }
        bail!("Dataset already mounted to {}", current.display());
    }

    let target = resolve_mountpoint(ctx, zfs, name, mountpoint)?;

    zfs.mount_at(&dataset, &target)
        .with_context(|| format!("Failed mounting dataset to '{}'", target.display()))?;
    if !ctx.quiet {
        ui::info(&format!("Mounted {dataset} to '{}'.", target.display()));
    }

    mount_children(ctx, zfs, &dataset, &target)?;
    mount_boot_mirror(zfs, name, &target)?;

    Ok(target)
}

fn resolve_mountpoint(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    name: &str,
    mountpoint: Option<&str>,
) -> Result<PathBuf> {
    let Some(given) = mountpoint else {
        let dir = tempfile::Builder::new()
            .prefix("zedenv-")
            .suffix(&format!("-{name}"))
            .tempdir()
            .context("Failed to create temporary mountpoint")?;
        // The mount outlives the command, so the directory has to as well.
        let path = dir.keep();
        if !ctx.quiet {
            ui::info(&format!(
                "No mountpoint given, using temporary directory '{}'.",
                path.display()
            ));
        }
        return Ok(path);
    };

    let path = PathBuf::from(shellexpand::tilde(given).into_owned());
    if zfs.mounted_dataset(&path)?.is_some() {
        bail!("There is already a file system mounted at {}", path.display());
    }
    if !path.is_dir() {
        bail!(
            "The path '{}' is not a directory, cannot be used as mountpoint.",
            path.display()
        );
    }
    Ok(path)
}

fn mount_children(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    dataset: &DatasetPath,
    base: &Path,
) -> Result<()> {
    let children = boot_env::list_child_mountpoints(zfs, dataset)
        .with_context(|| format!("Failed to get child datasets of '{dataset}'"))?;

    for child in children {
        if child.mountpoint == "none" || child.mountpoint == "legacy" {
            if !ctx.quiet {
                ui::info(&format!(
                    "Skipped mounting dataset {} since mountpoint is {}.",
                    child.dataset, child.mountpoint
                ));
            }
            continue;
        }
        // A locally set mountpoint names a path on the running system, so
        // remap it under the temporary root by the dataset's own name.
        let new_mount = if child.source == "local" {
            base.join(child.dataset.child_name().trim_start_matches('/'))
        } else {
            base.join(child.mountpoint.trim_start_matches('/'))
        };
        fs::create_dir_all(&new_mount)
            .with_context(|| format!("Failed to create directory '{}'", new_mount.display()))?;
        zfs.mount_at(&child.dataset, &new_mount)
            .with_context(|| {
                format!("Failed mounting child dataset to '{}'", new_mount.display())
            })?;
        if !ctx.quiet {
            ui::info(&format!(
                "Mounted dataset {} to '{}'.",
                child.dataset,
                new_mount.display()
            ));
        }
    }
    Ok(())
}

fn mount_boot_mirror(zfs: &dyn ZfsBackend, name: &str, base: &Path) -> Result<()> {
    let Some(mirror_root) = boot_env::boot_mirror_root(zfs)? else {
        return Ok(());
    };
    let mirror = boot_env::boot_mirror_path(&mirror_root, name)?;
    let target = base.join("boot");
    if let Err(err) = zfs.mount_at(&mirror, &target) {
        ui::warn(&format!(
            "Failed mounting boot dataset to '{}'.\n{err}",
            target.display()
        ));
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

    fn mount(zfs: &MockZfs, name: &str, mountpoint: Option<&str>) -> Result<PathBuf> {
        mount_environment(&ctx(), zfs, &be_root(), name, mountpoint)
    }

    #[test]
    fn test_mounts_environment_at_given_directory() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        let dir = tempfile::tempdir().unwrap();
        let path = mount(&zfs, "other", dir.path().to_str()).unwrap();

        assert_eq!(path, dir.path());
        assert_eq!(
            zfs.mounted_dataset(dir.path()).unwrap().unwrap().as_str(),
            "rpool/ROOT/other"
        );
    }

    #[test]
    fn test_creates_temporary_mountpoint_when_none_given() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        let path = mount(&zfs, "other", None).unwrap();

        assert!(path.is_dir());
        let dir_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(dir_name.starts_with("zedenv-"));
        assert!(dir_name.ends_with("-other"));
        assert_eq!(
            zfs.mounted_dataset(&path).unwrap().unwrap().as_str(),
            "rpool/ROOT/other"
        );
        let _ = fs::remove_dir_all(&path);
    }

    #[test]
    fn test_rejects_missing_environment() {
        let zfs = booted_mock();
        let err = mount(&zfs, "ghost", None).unwrap_err();
        assert!(err.to_string().contains("Boot environment doesn't exist ghost."));
    }

    #[test]
    fn test_rejects_root_dataset() {
        let zfs = booted_mock();
        let err = mount(&zfs, "default", None).unwrap_err();
        assert!(err.to_string().contains("Cannot mount root dataset."));
    }

    #[test]
    fn test_rejects_already_mounted_environment() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.set_mounted("rpool/ROOT/other", "/mnt/be");

        let err = mount(&zfs, "other", None).unwrap_err();
        assert!(err.to_string().contains("Dataset already mounted to /mnt/be"));
    }

    #[test]
    fn test_rejects_occupied_mountpoint() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        let dir = tempfile::tempdir().unwrap();
        zfs.set_mounted("rpool/ROOT/default", dir.path().to_str().unwrap());

        let err = mount(&zfs, "other", dir.path().to_str()).unwrap_err();
        assert!(
            err.to_string()
                .contains("There is already a file system mounted at")
        );
    }

    #[test]
    fn test_rejects_non_directory_mountpoint() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);

        let file = tempfile::NamedTempFile::new().unwrap();
        let err = mount(&zfs, "other", file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }

    #[test]
    fn test_mounts_children_under_mountpoint() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("rpool/ROOT/other/usr", 5);
        zfs.set_local_property("rpool/ROOT/other/usr", "mountpoint", "/usr");
        zfs.add_filesystem("rpool/ROOT/other/var", 5);
        zfs.seed_property(
            "rpool/ROOT/other/var",
            "mountpoint",
            "/var",
            "inherited from rpool/ROOT/other",
        );
        zfs.add_filesystem("rpool/ROOT/other/swap", 5);
        zfs.set_local_property("rpool/ROOT/other/swap", "mountpoint", "none");

        let dir = tempfile::tempdir().unwrap();
        mount(&zfs, "other", dir.path().to_str()).unwrap();

        assert_eq!(
            zfs.mounted_dataset(&dir.path().join("usr")).unwrap().unwrap().as_str(),
            "rpool/ROOT/other/usr"
        );
        assert_eq!(
            zfs.mounted_dataset(&dir.path().join("var")).unwrap().unwrap().as_str(),
            "rpool/ROOT/other/var"
        );
        let swap = DatasetPath::new("rpool/ROOT/other/swap").unwrap();
        assert_eq!(zfs.dataset_mountpoint(&swap).unwrap(), None);
    }

    #[test]
    fn test_mounts_boot_mirror_under_boot() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.add_filesystem("bpool/boot/zedenv-other", 5);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        let dir = tempfile::tempdir().unwrap();
        mount(&zfs, "other", dir.path().to_str()).unwrap();

        assert_eq!(
            zfs.mounted_dataset(&dir.path().join("boot")).unwrap().unwrap().as_str(),
            "bpool/boot/zedenv-other"
        );
    }

    #[test]
    fn test_missing_boot_mirror_only_warns() {
        let zfs = booted_mock();
        zfs.add_filesystem("rpool/ROOT/other", 5);
        zfs.add_filesystem("bpool/boot", 0);
        zfs.add_filesystem("bpool/boot/zedenv-default", 0);
        zfs.set_mounted("bpool/boot/zedenv-default", "/boot");

        let dir = tempfile::tempdir().unwrap();
        mount(&zfs, "other", dir.path().to_str()).unwrap();

        assert_eq!(zfs.mounted_dataset(&dir.path().join("boot")).unwrap(), None);
    }
}
