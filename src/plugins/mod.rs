//! Bootloader plugin protocol and registry.
//!
//! Commands call fixed hook points around dataset operations. A plugin
//! implements the hooks it cares about and inherits no-ops for the rest,
//! reporting failures as warnings (operation continues) or fatal errors
//! (operation stops). Plugins are selected from a compile-time registry
//! keyed by bootloader name and filtered by platform.

pub mod freebsdloader;
pub mod systemdboot;

use std::path::Path;

use anyhow::{Result, bail};
use log::{debug, warn};
use thiserror::Error;
use zfskit::{DatasetPath, ZfsBackend};

use crate::boot_env;
use crate::config::{self, PropertyDefault};

// ============================================================================
// Hook results
// ============================================================================

/// What a hook did when it returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// The plugin handled the hook.
    Ran,
    /// The plugin does not implement this hook.
    Unimplemented,
}

/// A failed hook, split by the severity commands give it.
#[derive(Debug, Error)]
pub enum HookError {
    /// Logged, then the operation continues.
    #[error("{0}")]
    Warning(String),
    /// Aborts the operation.
    #[error("{0}")]
    Fatal(String),
}

/// Return type of every bootloader hook.
pub type HookResult = std::result::Result<HookAction, HookError>;

/// Wraps an error chain as a fatal hook failure.
pub(crate) fn fatal(err: anyhow::Error) -> HookError {
    HookError::Fatal(format!("{err:#}"))
}

/// Wraps an error chain as a warning-severity hook failure.
pub(crate) fn warning(err: anyhow::Error) -> HookError {
    HookError::Warning(format!("{err:#}"))
}

// ============================================================================
// Bootloader trait
// ============================================================================

/// Hook points commands call around dataset operations.
///
/// Every hook defaults to [`HookAction::Unimplemented`] so plugins only
/// override the stages they participate in.
pub trait Bootloader {
    /// Called before activation touches any dataset.
    fn pre_activate(&mut self) -> HookResult {
        Ok(HookAction::Unimplemented)
    }

    /// Called while the target boot environment is temporarily mounted,
    /// for edits inside the environment's own filesystem tree.
    fn mid_activate(&mut self, _be_mountpoint: &Path) -> HookResult {
        Ok(HookAction::Unimplemented)
    }

    /// Called after the pool bootfs points at the new boot environment.
    fn post_activate(&mut self) -> HookResult {
        Ok(HookAction::Unimplemented)
    }

    /// Called after a boot environment has been created.
    fn post_create(&mut self) -> HookResult {
        Ok(HookAction::Unimplemented)
    }

    /// Called after a boot environment has been renamed.
    fn post_rename(&mut self) -> HookResult {
        Ok(HookAction::Unimplemented)
    }

    /// Called after the named boot environment has been destroyed.
    fn post_destroy(&mut self, _target: &str) -> HookResult {
        Ok(HookAction::Unimplemented)
    }
}

impl std::fmt::Debug for dyn Bootloader + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Bootloader")
    }
}

// ============================================================================
// Plugin context
// ============================================================================

/// Everything a plugin gets to work with, built once per invocation.
pub struct PluginContext<'a> {
    /// Backend for property reads and dataset mutations.
    pub zfs: &'a dyn ZfsBackend,
    /// Boot environment the running command operates on.
    pub boot_environment: String,
    /// Boot environment that was active when the command started.
    pub old_boot_environment: String,
    /// Parent dataset of all boot environments.
    pub be_root: DatasetPath,
    /// Skip confirmation prompts.
    pub noconfirm: bool,
    /// Log instead of mutating.
    pub noop: bool,
}

impl PluginContext<'_> {
    /// Reads a plugin property from the previously active boot
    /// environment. The target environment may not exist yet, so plugin
    /// configuration always comes from the old one. Unset values report
    /// as `None` so defaults apply.
    pub fn old_be_property(&self, plugin: &str, property: &str) -> Option<String> {
        let old = self.be_root.child(&self.old_boot_environment).ok()?;
        let key = config::plugin_key(plugin, property);
        boot_env::get_property(self.zfs, &old, &key).filter(|value| !config::is_unset(value))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A registered bootloader integration.
pub struct PluginSpec {
    /// Name used with `--bootloader` and in property namespaces.
    pub name: &'static str,
    /// Operating systems the plugin supports.
    pub platforms: &'static [&'static str],
    /// Properties the plugin reads, listed by `zedenv get --defaults`.
    pub properties: &'static [PropertyDefault],
    /// Constructs an instance for one command invocation.
    pub build: for<'a> fn(PluginContext<'a>) -> Result<Box<dyn Bootloader + 'a>>,
}

/// All known bootloader plugins.
pub const REGISTRY: &[PluginSpec] = &[
    PluginSpec {
        name: "systemdboot",
        platforms: &["linux"],
        properties: systemdboot::PROPERTIES,
        build: systemdboot::build,
    },
    PluginSpec {
        name: "freebsdloader",
        platforms: &["freebsd"],
        properties: freebsdloader::PROPERTIES,
        build: freebsdloader::build,
    },
];

/// Looks up a plugin by bootloader name.
pub fn find(name: &str) -> Option<&'static PluginSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Builds the named plugin for this invocation, honoring its platform
/// allow-list.
pub fn resolve<'a>(name: &str, ctx: PluginContext<'a>) -> Result<Box<dyn Bootloader + 'a>> {
    resolve_for_os(name, ctx, std::env::consts::OS)
}

fn resolve_for_os<'a>(
    name: &str,
    ctx: PluginContext<'a>,
    os: &str,
) -> Result<Box<dyn Bootloader + 'a>> {
    let Some(spec) = find(name) else {
        bail!("bootloader type {name} does not exist\nCheck available plugins with 'zedenv plugins'");
    };
    if !spec.platforms.contains(&os) {
        bail!("The plugin {name} is not valid for {os}");
    }
    (spec.build)(ctx)
}

// ============================================================================
// Hook dispatch
// ============================================================================

/// Applies a hook result: warnings log and continue, fatal failures
/// abort `operation`, unimplemented hooks only leave a debug trace.
pub fn run_hook(result: HookResult, plugin: &str, hook: &str, operation: &str) -> Result<()> {
    match result {
        Ok(HookAction::Ran) => {
            debug!("Finished {plugin} {hook}.");
            Ok(())
        }
        Ok(HookAction::Unimplemented) => {
            debug!("Tried to run {plugin} '{hook}', not implemented.");
            Ok(())
        }
        Err(HookError::Warning(msg)) => {
            warn!("During {plugin} {hook} the following occurred:\n\n{msg}\nContinuing {operation}.");
            Ok(())
        }
        Err(HookError::Fatal(msg)) => {
            bail!("During {plugin} {hook} the following occurred:\n\n{msg}\nStopping {operation}.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zfskit::MockZfs;

    fn context(zfs: &MockZfs) -> PluginContext<'_> {
        PluginContext {
            zfs,
            boot_environment: "default-2".to_string(),
            old_boot_environment: "default".to_string(),
            be_root: "rpool/ROOT".parse().unwrap(),
            noconfirm: true,
            noop: false,
        }
    }

    #[test]
    fn test_registry_contains_known_plugins() {
        assert!(find("systemdboot").is_some());
        assert!(find("freebsdloader").is_some());
        assert!(find("grub").is_none());
    }

    #[test]
    fn test_resolve_unknown_plugin() {
        let zfs = MockZfs::with_pool("rpool");
        let err = resolve_for_os("syslinux", context(&zfs), "linux").unwrap_err();
        assert!(err.to_string().contains("bootloader type syslinux does not exist"));
        assert!(err.to_string().contains("zedenv plugins"));
    }

    #[test]
    fn test_resolve_rejects_wrong_platform() {
        let zfs = MockZfs::with_pool("rpool");
        let err = resolve_for_os("systemdboot", context(&zfs), "freebsd").unwrap_err();
        assert_eq!(err.to_string(), "The plugin systemdboot is not valid for freebsd");
    }

    #[test]
    fn test_run_hook_accepts_ran_and_unimplemented() {
        assert!(run_hook(Ok(HookAction::Ran), "systemdboot", "post activate", "activation").is_ok());
        assert!(
            run_hook(Ok(HookAction::Unimplemented), "systemdboot", "post create", "creation")
                .is_ok()
        );
    }

    #[test]
    fn test_run_hook_warning_continues() {
        let result = Err(HookError::Warning("config missing".to_string()));
        assert!(run_hook(result, "freebsdloader", "mid activate", "activation").is_ok());
    }

    #[test]
    fn test_run_hook_fatal_stops() {
        let result = Err(HookError::Fatal("no permission".to_string()));
        let err = run_hook(result, "systemdboot", "mid activate", "activation").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("During systemdboot mid activate"));
        assert!(text.contains("no permission"));
        assert!(text.contains("Stopping activation."));
    }

    #[test]
    fn test_old_be_property_skips_unset() {
        let zfs = MockZfs::with_pool("rpool");
        zfs.add_filesystem("rpool/ROOT", 0);
        zfs.add_filesystem("rpool/ROOT/default", 0);
        zfs.set_local_property("rpool/ROOT/default", "org.zedenv.systemdboot:esp", "/boot/efi");

        let ctx = context(&zfs);
        assert_eq!(
            ctx.old_be_property("systemdboot", "esp").as_deref(),
            Some("/boot/efi")
        );
        assert_eq!(ctx.old_be_property("systemdboot", "missing"), None);
    }
}
