use crate::Context;
use crate::boot_env;
use crate::ui;
use anyhow::{Context as _, Result, bail};
use std::path::Path;
use zfskit::{DatasetKind, DatasetPath, ListOptions, ZfsBackend};

pub fn run(ctx: &Context, zfs: &dyn ZfsBackend, boot_environment: &str) -> Result<()> {
    let be_root = boot_env::root(zfs)?;
    unmount_environment(ctx, zfs, &be_root, boot_environment)
}

pub(crate) fn unmount_environment(
    ctx: &Context,
    zfs: &dyn ZfsBackend,
    be_root: &DatasetPath,
    name: &str,
) -> Result<()> {
    let dataset = be_root.child(name)?;
    if !zfs.exists(&dataset, Some(DatasetKind::Filesystem)) {
        bail!("Boot environment doesn't exist {name}.");
    }
    let mountpoint = match zfs.dataset_mountpoint(&dataset)? {
        Some(mp) if mp == Path::new("/") => bail!("Cannot unmount root dataset."),
        Some(mp) => mp,
        None => bail!("Boot environment already un-mounted"),
    };

    // The boot pool dataset sits on top at `<mountpoint>/boot`, so it has
    // to come off before the datasets underneath it.
    unmount_boot_mirror(zfs, &mountpoint)?;

    let opts = ListOptions {
        recursive: true,
        kinds: vec![DatasetKind::Filesystem],
        sort_descending: vec!["name".to_string()],
        columns: vec!["name".to_string()],
        ..ListOptions::default()
    };
    let rows = zfs
        .list(&dataset, &opts)
        .with_context(|| format!("Failed to get list of datasets for '{name}'"))?;

    // Descending name order unmounts children before their parents.
    for row in rows {
        let Some(ds) = row.first() else {
            continue;
        };
        let ds = DatasetPath::new(ds.clone())?;
        match zfs.dataset_mountpoint(&ds)? {
            Some(mp) => {
                zfs.unmount(&ds).with_context(|| {
                    format!("Failed un-mounting child dataset from '{}'", mp.display())
                })?;
                if !ctx.quiet {
                    ui::info(&format!("Unmounted {ds} from {}.", mp.display()));
                }
            }
            None => {
                if !ctx.quiet {
                    ui::info(&format!("Child dataset {ds} wasn't mounted, won't unmount."));
                }
            }
        }
    }

    if !ctx.quiet {
        ui::success(&format!("Unmounted boot environment {name}."));
    }
    Ok(())
}

fn unmount_boot_mirror(zfs: &dyn ZfsBackend, base: &Path) -> Result<()> {
    if boot_env::boot_mirror_root(zfs)?.is_none() {
        return Ok(());
    }
    let boot = base.join("boot");
    if let Some(mirror) = zfs.mounted_dataset(&boot)? {
        zfs.unmount(&mirror).with_context(|| {
            format!("Failed un-mounting boot dataset from '{}'", boot.display())
        })?;
    }
    Ok(())
}
