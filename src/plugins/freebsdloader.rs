//! FreeBSD loader integration.
//!
//! Points `vfs.root.mountfrom` in the target environment's loader
//! configuration at the new root dataset and carries the system's
//! `zpool.cache` into the environment. Environments that ship the
//! `zfsbe` rc script keep `canmount=noauto`; older systems get
//! `canmount=on` so the root dataset mounts at boot.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result};
use log::{debug, info};
use regex::Regex;
use zfskit::{DatasetPath, Property, ZfsBackend};

use crate::config::PropertyDefault;
use crate::plugins::{Bootloader, HookAction, HookError, HookResult, PluginContext, fatal};

const PLUGIN_NAME: &str = "freebsdloader";
const ZPOOL_CACHE: &str = "boot/zfs/zpool.cache";
const ZFS_BE_RC: &str = "etc/rc.d/zfsbe";
const LOADER_CONF: &str = "boot/loader.conf";
const LOADER_CONF_LOCAL: &str = "boot/loader.conf.local";

pub(super) const PROPERTIES: &[PropertyDefault] = &[];

pub(super) fn build<'a>(ctx: PluginContext<'a>) -> Result<Box<dyn Bootloader + 'a>> {
    Ok(Box::new(FreeBsdLoader {
        zfs: ctx.zfs,
        boot_environment: ctx.boot_environment,
        be_root: ctx.be_root,
        noop: ctx.noop,
        zfs_be: false,
    }))
}

struct FreeBsdLoader<'a> {
    zfs: &'a dyn ZfsBackend,
    boot_environment: String,
    be_root: DatasetPath,
    noop: bool,
    // Target ships the zfsbe rc script, detected during mid activate.
    zfs_be: bool,
}

impl Bootloader for FreeBsdLoader<'_> {
    fn mid_activate(&mut self, be_mountpoint: &Path) -> HookResult {
        debug!("Running {PLUGIN_NAME} mid activate.");

        let system_config = be_mountpoint.join(LOADER_CONF);
        if !system_config.is_file() {
            return Err(HookError::Warning(
                "System bootloader config does not exist.".to_string(),
            ));
        }

        self.zfs_be = be_mountpoint.join(ZFS_BE_RC).is_file();
        self.sync_zpool_cache(be_mountpoint)?;

        let mut configs = vec![system_config];
        let local_config = be_mountpoint.join(LOADER_CONF_LOCAL);
        if local_config.is_file() {
            configs.push(local_config);
        }
        self.update_loader_configs(&configs).map_err(fatal)?;

        Ok(HookAction::Ran)
    }

    fn post_activate(&mut self) -> HookResult {
        let target = self
            .be_root
            .child(&self.boot_environment)
            .map_err(|err| fatal(err.into()))?;
        let canmount = if self.zfs_be { "noauto" } else { "on" };

        if self.noop {
            info!("Would set canmount={canmount} for '{target}'.");
            return Ok(HookAction::Ran);
        }

        self.zfs
            .set(&target, &Property::new("canmount", canmount))
            .map_err(|err| {
                HookError::Fatal(format!("Failed to set canmount={canmount} for '{target}'\n{err}"))
            })?;
        debug!("Set canmount={canmount} for '{target}'.");
        Ok(HookAction::Ran)
    }
}

impl FreeBsdLoader<'_> {
    /// Copies the running system's `zpool.cache` into the target
    /// environment, or drops a stale copy when the system no longer has
    /// one. Permission failures are fatal, other IO failures warn.
    fn sync_zpool_cache(&self, be_mountpoint: &Path) -> std::result::Result<(), HookError> {
        let system_cache = Path::new("/").join(ZPOOL_CACHE);
        let be_cache = be_mountpoint.join(ZPOOL_CACHE);

        if self.noop {
            return Ok(());
        }

        if system_cache.is_file() {
            if let Some(parent) = be_cache.parent() {
                fs::create_dir_all(parent).map_err(|err| classify_io(&be_cache, &err))?;
            }
            fs::copy(&system_cache, &be_cache).map_err(|err| classify_io(&be_cache, &err))?;
            debug!("Copied '{}' to '{}'.", system_cache.display(), be_cache.display());
        } else if be_cache.is_file() {
            fs::remove_file(&be_cache).map_err(|err| classify_io(&be_cache, &err))?;
            debug!("Removed stale '{}'.", be_cache.display());
        }
        Ok(())
    }

    /// Rewrites every `vfs.root.mountfrom` line in the given configs to
    /// the new root dataset, keeping a `.bak` of each file it replaces.
    fn update_loader_configs(&self, configs: &[PathBuf]) -> Result<()> {
        let mountfrom = Regex::new(r"^vfs\.root\.mountfrom=.*$")
            .context("Failed to compile loader config pattern")?;
        let replacement = format!("vfs.root.mountfrom={}/{}", self.be_root, self.boot_environment);

        for config in configs {
            let contents = fs::read_to_string(config)
                .with_context(|| format!("Failed to read '{}'", config.display()))?;
            let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
            for line in &mut lines {
                if mountfrom.is_match(line) {
                    info!("Replacing '{line}' with '{replacement}' in '{}'.", config.display());
                    *line = replacement.clone();
                }
            }

            if self.noop {
                continue;
            }

            let backup = PathBuf::from(format!("{}.bak", config.display()));
            if backup.is_file() {
                fs::remove_file(&backup)
                    .with_context(|| format!("Failed to remove '{}'", backup.display()))?;
            }
            fs::rename(config, &backup).with_context(|| {
                format!("Failed to back up '{}' to '{}'", config.display(), backup.display())
            })?;
            info!("Backed up '{}' to '{}'.", config.display(), backup.display());

            let mut new_contents = lines.join("\n");
            new_contents.push('\n');
            fs::write(config, new_contents)
                .with_context(|| format!("Failed to write '{}'", config.display()))?;
        }
        Ok(())
    }
}

fn classify_io(path: &Path, err: &std::io::Error) -> HookError {
    let message = format!("Failed to update '{}'\n{err}", path.display());
    if err.kind() == ErrorKind::PermissionDenied {
        HookError::Fatal(message)
    } else {
        HookError::Warning(message)
    }
}
