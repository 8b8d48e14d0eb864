//! Startup environment checks.
//!
//! Every command that touches boot environments runs these first so that a
//! misconfigured system fails with a clear message instead of a confusing
//! mid-operation error.

use std::path::Path;

use anyhow::{Context as AnyhowContext, Result, bail};
use zfskit::ZfsBackend;

use crate::boot_env;

/// Verify the system root is a ZFS mount and its pool has a readable bootfs.
pub fn startup(zfs: &dyn ZfsBackend) -> Result<()> {
    let Some(root) = zfs.mounted_dataset(Path::new("/"))? else {
        bail!("System is not booting off a ZFS root dataset.");
    };

    let pool = root.pool().to_string();
    boot_env::bootfs_for_pool(zfs, &pool)
        .context("Couldn't get bootfs property of pool.")?;

    Ok(())
}
