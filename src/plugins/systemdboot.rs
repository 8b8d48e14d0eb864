//! systemd-boot integration.
//!
//! Keeps one loader entry and one kernel directory per boot environment
//! on the EFI system partition. Activation rewrites the environment's
//! fstab line for the kernel directory, stages ESP changes in a
//! temporary directory, moves them into place, then points the
//! `loader.conf` default at the new entry.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result, bail};
use dialoguer::{Confirm, Editor};
use log::{debug, info};
use regex::Regex;
use walkdir::WalkDir;
use zfskit::DatasetPath;

use crate::config::{self, PropertyDefault};
use crate::plugins::{Bootloader, HookAction, HookResult, PluginContext, fatal};

const PLUGIN_NAME: &str = "systemdboot";
const DEFAULT_ESP: &str = "/mnt/efi";

// Kernel directories live at {esp}/env/zedenv-{be}, mounted over /boot.
const ENV_DIR: &str = "env";
const ENTRY_PREFIX: &str = "zedenv";
const BOOT_MOUNTPOINT: &str = "/boot";

pub(super) const PROPERTIES: &[PropertyDefault] = &[PropertyDefault {
    property: "esp",
    default: DEFAULT_ESP,
    description: "Set location for esp.",
}];

pub(super) fn build<'a>(ctx: PluginContext<'a>) -> Result<Box<dyn Bootloader + 'a>> {
    let esp = ctx
        .old_be_property(PLUGIN_NAME, "esp")
        .unwrap_or_else(|| DEFAULT_ESP.to_string());
    debug!("esp set to {esp}");

    let esp = PathBuf::from(esp);
    if !esp.is_dir() {
        bail!(
            "To use the {PLUGIN_NAME} plugin, mount an esp at '{}' or set a different location.\n\
             To set it use the command 'zedenv set {}=<new mount>'.",
            esp.display(),
            config::plugin_key(PLUGIN_NAME, "esp"),
        );
    }

    Ok(Box::new(SystemdBoot {
        old_entry: format!("{ENTRY_PREFIX}-{}", ctx.old_boot_environment),
        new_entry: format!("{ENTRY_PREFIX}-{}", ctx.boot_environment),
        boot_environment: ctx.boot_environment,
        old_boot_environment: ctx.old_boot_environment,
        be_root: ctx.be_root,
        noconfirm: ctx.noconfirm,
        noop: ctx.noop,
        esp,
    }))
}

struct SystemdBoot {
    boot_environment: String,
    old_boot_environment: String,
    be_root: DatasetPath,
    noconfirm: bool,
    noop: bool,
    esp: PathBuf,
    old_entry: String,
    new_entry: String,
}

impl Bootloader for SystemdBoot {
    fn mid_activate(&mut self, be_mountpoint: &Path) -> HookResult {
        debug!("Running {PLUGIN_NAME} mid activate.");
        self.update_fstab(be_mountpoint).map_err(fatal)?;
        Ok(HookAction::Ran)
    }

    fn post_activate(&mut self) -> HookResult {
        info!(
            "Creating temporary working directory. \
             No changes will be made until the end of the {PLUGIN_NAME} configuration."
        );
        self.stage_and_apply().map_err(fatal)?;
        Ok(HookAction::Ran)
    }

    fn post_destroy(&mut self, target: &str) -> HookResult {
        self.remove_esp_entries(target).map_err(fatal)?;
        Ok(HookAction::Ran)
    }
}

impl SystemdBoot {
    // ========================================================================
    // fstab
    // ========================================================================

    /// Rewrites the kernel directory bind mount in the target
    /// environment's `/etc/fstab` to point at the new entry. The edited
    /// copy is staged next to the original as `fstab.zedenv.new` before
    /// it replaces `/etc/fstab`, and a `.bak` of the original is kept.
    fn update_fstab(&self, be_mountpoint: &Path) -> Result<()> {
        let fstab = be_mountpoint.join("etc/fstab");
        let staged = be_mountpoint.join("fstab.zedenv.new");
        fs::copy(&fstab, &staged).with_context(|| {
            format!("Failed to copy '{}' to '{}'", fstab.display(), staged.display())
        })?;

        let pattern = format!(
            r"(^{esp}/{ENV_DIR}/?)(.*)(\s.*{boot}\s.*$)",
            esp = regex::escape(&self.esp.to_string_lossy()),
            boot = regex::escape(BOOT_MOUNTPOINT),
        );
        let entry = Regex::new(&pattern).context("Failed to compile fstab entry pattern")?;

        let contents = fs::read_to_string(&staged)
            .with_context(|| format!("Failed to read '{}'", staged.display()))?;
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

        let mut replaced_any = false;
        for line in &mut lines {
            if let Some(caps) = entry.captures(line) {
                let new_line = format!("{}{}{}", &caps[1], self.new_entry, &caps[3]);
                info!(
                    "Replaced fstab entry:\n{line}\nWith new entry:\n{new_line}\n\
                     In the boot environment's '/etc/fstab'."
                );
                *line = new_line;
                replaced_any = true;
            }
        }
        if !replaced_any {
            info!(
                "Couldn't find directory to replace in fstab, \
                 your system may not be configured correctly for boot environments."
            );
        }

        let mut staged_contents = lines.join("\n");
        staged_contents.push('\n');
        fs::write(&staged, staged_contents)
            .with_context(|| format!("Failed to write '{}'", staged.display()))?;

        if self.noop {
            return Ok(());
        }

        let backup = be_mountpoint.join("etc/fstab.bak");
        fs::copy(&fstab, &backup).with_context(|| {
            format!("Failed to back up '{}' to '{}'", fstab.display(), backup.display())
        })?;

        if !self.noconfirm && confirm("Would you like to edit the generated 'fstab'?")? {
            edit_file(&staged)?;
        }

        fs::copy(&staged, &fstab)
            .with_context(|| format!("Failed to move '{}' into place", staged.display()))?;
        info!(
            "Moved new '/etc/fstab' into place. \
             A copy of the original '/etc/fstab' can be found at '/etc/fstab.bak'."
        );
        Ok(())
    }

    // ========================================================================
    // ESP staging
    // ========================================================================

    /// Builds the new kernel directory and loader entry in a scratch
    /// directory, then merges the result onto the ESP. Nothing on the
    /// ESP changes until staging has fully succeeded.
    fn stage_and_apply(&self) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix("zedenv-")
            .suffix("-systemdboot")
            .tempdir()
            .context("Failed to create temporary working directory")?;

        self.stage_kernel_directory(staging.path())?;
        self.stage_loader_entry(staging.path())?;
        recurse_move(staging.path(), &self.esp, false)?;
        self.update_loader_default()?;
        Ok(())
    }

    /// Copies the old environment's kernel directory to the staged path
    /// of the new one, or creates it empty when nothing is there yet.
    fn stage_kernel_directory(&self, staging: &Path) -> Result<()> {
        let kernel_root = self.esp.join(ENV_DIR);
        let old_kernels = kernel_root.join(&self.old_entry);
        let staged_new = staging.join(ENV_DIR).join(&self.new_entry);

        if !old_kernels.is_dir() {
            info!(
                "No directory for boot environment kernels found at '{}', creating empty directory.\n\
                 Don't forget to add your kernel to '{}'.",
                old_kernels.display(),
                kernel_root.join(&self.new_entry).display(),
            );
            if !self.noop {
                fs::create_dir_all(&staged_new)
                    .with_context(|| format!("Failed to create '{}'", staged_new.display()))?;
            }
            return Ok(());
        }

        if !self.noop {
            copy_tree(&old_kernels, &staged_new)?;
        }
        Ok(())
    }

    /// Stages a loader entry for the new environment, using the old
    /// entry as a template when one exists. Existing entries for the
    /// target name are never touched.
    fn stage_loader_entry(&self, staging: &Path) -> Result<()> {
        let real_entries = self.esp.join("loader/entries");
        let old_conf = real_entries.join(format!("{}.conf", self.old_entry));
        let new_conf_name = format!("{}.conf", self.new_entry);

        if old_conf.is_file() && self.old_entry == self.new_entry {
            info!(
                "Attempting to activate the same boot environment while config '{}' \
                 already exists. Will not modify the existing configuration.",
                old_conf.display()
            );
            return Ok(());
        }
        if real_entries.join(&new_conf_name).is_file() {
            info!(
                "Bootloader config '{new_conf_name}' already exists. \
                 Will not modify the existing configuration."
            );
            return Ok(());
        }

        let lines = if old_conf.is_file() {
            info!(
                "Using existing entry '{}' as a template for '{new_conf_name}'.",
                old_conf.display()
            );
            let contents = fs::read_to_string(&old_conf)
                .with_context(|| format!("Failed to read '{}'", old_conf.display()))?;
            contents
                .lines()
                .map(|line| line.replace(&self.old_boot_environment, &self.boot_environment))
                .collect::<Vec<_>>()
        } else {
            let guess = self.entry_guess();
            info!(
                "No matching bootloader entry found in '{}', \
                 taking best guess at creating '{new_conf_name}':\n{}",
                real_entries.display(),
                guess.join("\n")
            );
            guess
        };

        if self.noop {
            return Ok(());
        }

        let staged_entries = staging.join("loader/entries");
        fs::create_dir_all(&staged_entries)
            .with_context(|| format!("Failed to create '{}'", staged_entries.display()))?;
        let staged_conf = staged_entries.join(&new_conf_name);
        let mut contents = lines.join("\n");
        contents.push('\n');
        fs::write(&staged_conf, contents)
            .with_context(|| format!("Failed to write '{}'", staged_conf.display()))?;

        if !self.noconfirm && confirm("Would you like to edit the generated bootloader config?")? {
            edit_file(&staged_conf)?;
        }
        Ok(())
    }

    fn entry_guess(&self) -> Vec<String> {
        let be = &self.boot_environment;
        vec![
            format!("title           Boot Environment [{be}]"),
            format!("linux           /{ENV_DIR}/{}/vmlinuz-linux", self.new_entry),
            format!("initrd          /{ENV_DIR}/{}/initramfs-linux.img", self.new_entry),
            format!("options         zfs={}/{be}", self.be_root),
        ]
    }

    // ========================================================================
    // loader.conf
    // ========================================================================

    /// Points the `default` line of `loader.conf` at the new entry,
    /// keeping a `.bak` of the previous file. A missing `default` line
    /// is added rather than left out.
    fn update_loader_default(&self) -> Result<()> {
        let loader_conf = self.esp.join("loader/loader.conf");
        if !loader_conf.is_file() {
            bail!("Missing file: '{}'", loader_conf.display());
        }

        let contents = fs::read_to_string(&loader_conf)
            .with_context(|| format!("Failed to read '{}'", loader_conf.display()))?;
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();

        let default_line = format!("default    {}", self.new_entry);
        match lines
            .iter()
            .position(|line| line.split_whitespace().next() == Some("default"))
        {
            Some(index) => lines[index] = default_line,
            None => lines.push(default_line),
        }

        if self.noop {
            return Ok(());
        }

        let backup = self.esp.join("loader/loader.conf.bak");
        if backup.is_file() {
            fs::remove_file(&backup)
                .with_context(|| format!("Failed to remove '{}'", backup.display()))?;
        }
        fs::rename(&loader_conf, &backup).with_context(|| {
            format!("Failed to back up '{}' to '{}'", loader_conf.display(), backup.display())
        })?;
        info!("Backed up '{}' to '{}'.", loader_conf.display(), backup.display());

        let mut new_contents = lines.join("\n");
        new_contents.push('\n');
        fs::write(&loader_conf, new_contents)
            .with_context(|| format!("Failed to write '{}'", loader_conf.display()))?;

        if !self.noconfirm && confirm("Would you like to edit the generated 'loader.conf'?")? {
            edit_file(&loader_conf)?;
        }
        Ok(())
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Removes the kernel directory and loader entry of a destroyed
    /// boot environment from the ESP.
    fn remove_esp_entries(&self, target: &str) -> Result<()> {
        let kernel_dir = self.esp.join(ENV_DIR).join(format!("{ENTRY_PREFIX}-{target}"));
        if kernel_dir.is_dir() {
            if self.noop {
                info!("Would remove '{}'.", kernel_dir.display());
            } else {
                fs::remove_dir_all(&kernel_dir)
                    .with_context(|| format!("Failed to remove '{}'", kernel_dir.display()))?;
                info!("Removed '{}'.", kernel_dir.display());
            }
        }

        let entry_conf = self
            .esp
            .join("loader/entries")
            .join(format!("{ENTRY_PREFIX}-{target}.conf"));
        if entry_conf.is_file() {
            if self.noop {
                info!("Would remove '{}'.", entry_conf.display());
            } else {
                fs::remove_file(&entry_conf)
                    .with_context(|| format!("Failed to remove '{}'", entry_conf.display()))?;
                info!("Removed '{}'.", entry_conf.display());
            }
        }
        Ok(())
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn confirm(prompt: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .context("Failed to read confirmation")
}

fn edit_file(path: &Path) -> Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    if let Some(edited) = Editor::new()
        .edit(&contents)
        .context("Failed to launch editor")?
    {
        fs::write(path, edited)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
    }
    Ok(())
}

/// Copies a directory tree, creating missing parents along the way.
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| format!("Failed to walk '{}'", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("Walked outside the copy root")?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create '{}'", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create '{}'", parent.display()))?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy '{}' to '{}'",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Merges `source` into `dest`. Without `overwrite`, existing files are
/// kept and existing directories are descended into; with it, files are
/// replaced and whole directories are renamed to `.bak` first.
fn recurse_move(source: &Path, dest: &Path, overwrite: bool) -> Result<()> {
    let entries =
        fs::read_dir(source).with_context(|| format!("Failed to read '{}'", source.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read '{}'", source.display()))?;
        let target = dest.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to inspect '{}'", entry.path().display()))?;

        if file_type.is_dir() {
            if target.is_dir() && !overwrite {
                info!("Directory '{}' already exists, descending into it.", target.display());
                recurse_move(&entry.path(), &target, overwrite)?;
            } else {
                if target.is_dir() {
                    let backup = PathBuf::from(format!("{}.bak", target.display()));
                    info!(
                        "Directory '{}' already exists, backing it up to '{}'.",
                        target.display(),
                        backup.display()
                    );
                    if backup.exists() {
                        fs::remove_dir_all(&backup).with_context(|| {
                            format!("Failed to remove '{}'", backup.display())
                        })?;
                    }
                    fs::rename(&target, &backup).with_context(|| {
                        format!("Failed to back up '{}'", target.display())
                    })?;
                }
                copy_tree(&entry.path(), &target)?;
                info!("Copied directory '{}' to '{}'.", entry.path().display(), target.display());
            }
        } else if target.is_file() && !overwrite {
            info!("File '{}' already exists, will not modify.", target.display());
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy '{}' to '{}'",
                    entry.path().display(),
                    target.display()
                )
            })?;
            info!("Copied file '{}' to '{}'.", entry.path().display(), target.display());
        }
    }
    Ok(())
}
