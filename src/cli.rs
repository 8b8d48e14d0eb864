use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "zedenv")]
#[command(version)]
#[command(about = "ZFS boot environment manager", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List boot environments
    List {
        /// Show space accounting columns
        #[arg(short = 'D', long)]
        spaceused: bool,

        /// Tab-separated machine readable output
        #[arg(short = 'H', long)]
        scripting: bool,

        /// Show the origin snapshot of each environment
        #[arg(short = 'O', long)]
        origin: bool,
    },

    /// Create a boot environment
    Create {
        /// Clone from an existing environment or snapshot
        #[arg(short, long, value_name = "BE[@SNAPSHOT]")]
        existing: Option<String>,

        /// Use bootloader plugin
        #[arg(short, long, value_name = "PLUGIN")]
        bootloader: Option<String>,

        /// Name of the new boot environment
        boot_environment: String,
    },

    /// Destroy a boot environment or snapshot
    Destroy {
        /// Use bootloader plugin
        #[arg(short, long, value_name = "PLUGIN")]
        bootloader: Option<String>,

        /// Destroy without prompting for confirmation
        #[arg(short = 'y', long)]
        noconfirm: bool,

        /// Print what would be destroyed, but don't apply
        #[arg(short = 'n', long)]
        noop: bool,

        /// Boot environment (or BE@snapshot) to destroy
        boot_environment: String,
    },

    /// Activate a boot environment for the next boot
    Activate {
        /// Use bootloader plugin
        #[arg(short, long, value_name = "PLUGIN")]
        bootloader: Option<String>,

        /// Assume yes in situations where confirmation is needed
        #[arg(short = 'y', long)]
        noconfirm: bool,

        /// Print what would be done, but don't apply
        #[arg(short = 'n', long)]
        noop: bool,

        /// Boot environment to activate
        boot_environment: String,
    },

    /// Rename a boot environment
    Rename {
        /// Use bootloader plugin
        #[arg(short, long, value_name = "PLUGIN")]
        bootloader: Option<String>,

        /// Boot environment to rename
        boot_environment: String,

        /// New name
        new_name: String,
    },

    /// Mount a boot environment temporarily
    Mount {
        /// Boot environment to mount
        boot_environment: String,

        /// Mountpoint (a temporary directory is created when omitted)
        mountpoint: Option<String>,
    },

    /// Unmount a boot environment
    Umount {
        /// Boot environment to unmount
        boot_environment: String,
    },

    /// Print zedenv properties set on the boot environment root
    Get {
        /// Include properties of descendant datasets
        #[arg(short, long)]
        recursive: bool,

        /// Tab-separated machine readable output
        #[arg(short = 'H', long)]
        scripting: bool,

        /// Show the available properties and their defaults
        #[arg(short = 'D', long)]
        defaults: bool,

        /// Properties to show (all when omitted)
        properties: Vec<String>,
    },

    /// Set zedenv properties on the boot environment root
    Set {
        /// Assignments in the form property=value
        #[arg(required = true)]
        properties: Vec<String>,
    },

    /// List available bootloader plugins
    Plugins,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
