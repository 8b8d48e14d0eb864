mod boot_env;
mod check;
mod cli;
mod commands;
mod config;
mod lock;
mod plugins;
mod ui;

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use std::io;
use zfskit::{ZfsBackend, ZfsCli};

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "zedenv", &mut io::stdout());
            Ok(())
        }
        Commands::Plugins => list_plugins(),
        command => {
            let zfs = ZfsCli::new()?;
            check::startup(&zfs)?;
            run_command(&ctx, &zfs, command)
        }
    }
}

fn run_command(ctx: &Context, zfs: &dyn ZfsBackend, command: Commands) -> Result<()> {
    match command {
        Commands::List {
            spaceused,
            scripting,
            origin,
        } => commands::list::run(ctx, zfs, spaceused, scripting, origin),

        Commands::Create {
            existing,
            bootloader,
            boot_environment,
        } => {
            let _lock = lock::ProcessLock::acquire()?;
            let bootloader = resolve_bootloader(zfs, bootloader)?;
            commands::create::run(
                ctx,
                zfs,
                &boot_environment,
                existing.as_deref(),
                bootloader.as_deref(),
            )
        }

        Commands::Destroy {
            bootloader,
            noconfirm,
            noop,
            boot_environment,
        } => {
            let _lock = lock::ProcessLock::acquire()?;
            let bootloader = resolve_bootloader(zfs, bootloader)?;
            commands::destroy::run(
                ctx,
                zfs,
                &boot_environment,
                bootloader.as_deref(),
                noconfirm,
                noop,
            )
        }

        Commands::Activate {
            bootloader,
            noconfirm,
            noop,
            boot_environment,
        } => {
            let _lock = lock::ProcessLock::acquire()?;
            let bootloader = resolve_bootloader(zfs, bootloader)?;
            if bootloader.is_none() {
                ui::warn(
                    "WARNING: Running activate without a bootloader. Re-run with a default \
                     bootloader, or with the '--bootloader/-b' flag. If you plan to manually \
                     edit your bootloader config this message can safely be ignored.",
                );
                if noconfirm {
                    bail!(
                        "The '--noconfirm/-y' flag requires the bootloader option '--bootloader/-b'."
                    );
                }
            }
            commands::activate::run(
                ctx,
                zfs,
                &boot_environment,
                bootloader.as_deref(),
                noconfirm,
                noop,
            )
        }

        Commands::Rename {
            bootloader,
            boot_environment,
            new_name,
        } => {
            let _lock = lock::ProcessLock::acquire()?;
            let bootloader = resolve_bootloader(zfs, bootloader)?;
            commands::rename::run(
                ctx,
                zfs,
                &boot_environment,
                &new_name,
                bootloader.as_deref(),
            )
        }

        Commands::Mount {
            boot_environment,
            mountpoint,
        } => commands::mount::run(ctx, zfs, &boot_environment, mountpoint.as_deref()),

        Commands::Umount { boot_environment } => {
            commands::umount::run(ctx, zfs, &boot_environment)
        }

        Commands::Get {
            recursive,
            scripting,
            defaults,
            properties,
        } => commands::get::run(ctx, zfs, recursive, scripting, defaults, &properties),

        Commands::Set { properties } => commands::set::run(ctx, zfs, &properties),

        // Handled in main without a storage backend.
        Commands::Plugins | Commands::Completions { .. } => Ok(()),
    }
}

/// The bootloader to use: the explicit flag, or the `org.zedenv:bootloader`
/// property on the boot environment root when one is configured.
fn resolve_bootloader(zfs: &dyn ZfsBackend, flag: Option<String>) -> Result<Option<String>> {
    if flag.is_some() {
        return Ok(flag);
    }
    let be_root = boot_env::root(zfs)?;
    let key = config::core_key("bootloader");
    Ok(boot_env::get_property(zfs, &be_root, &key).filter(|value| !config::is_unset(value)))
}

fn list_plugins() -> Result<()> {
    for spec in plugins::REGISTRY {
        ui::kv(spec.name, &spec.platforms.join(", "));
    }
    Ok(())
}
