//! Real backend that shells out to the ZFS command-line tools.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{Error, Result};
use crate::path::DatasetPath;
use crate::types::{GetOptions, ListOptions, Property};

use super::ZfsBackend;

/// Candidate locations probed before falling back to a PATH lookup.
const ZFS_PATHS: &[&str] = &["/sbin/zfs", "/usr/sbin/zfs", "/usr/local/sbin/zfs"];
const ZPOOL_PATHS: &[&str] = &["/sbin/zpool", "/usr/sbin/zpool", "/usr/local/sbin/zpool"];

/// Backend that executes `zfs`, `zpool`, and `mount`.
pub struct ZfsCli {
    zfs_path: PathBuf,
    zpool_path: PathBuf,
}

impl ZfsCli {
    /// Locate the ZFS tools and construct a backend.
    ///
    /// Returns [`Error::BinaryNotFound`] when `zfs` or `zpool` is neither
    /// in a standard sbin location nor on PATH.
    pub fn new() -> Result<Self> {
        Ok(Self {
            zfs_path: find_tool("zfs", ZFS_PATHS)?,
            zpool_path: find_tool("zpool", ZPOOL_PATHS)?,
        })
    }

    fn run_zfs(&self, args: &[String]) -> Result<Output> {
        Ok(Command::new(&self.zfs_path).args(args).output()?)
    }

    fn run_zfs_checked(&self, args: &[String], target: &str) -> Result<String> {
        let output = self.run_zfs(args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let sub = args.first().map(String::as_str).unwrap_or("");
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::from_zfs_output(&format!("zfs {sub}"), target, &stderr))
        }
    }

    fn run_zpool_checked(&self, args: &[String], target: &str) -> Result<String> {
        let output = Command::new(&self.zpool_path).args(args).output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let sub = args.first().map(String::as_str).unwrap_or("");
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::from_zfs_output(&format!("zpool {sub}"), target, &stderr))
        }
    }

    /// Currently mounted ZFS filesystems as (dataset, mountpoint) pairs.
    fn zfs_mounts(&self) -> Result<Vec<(String, PathBuf)>> {
        #[cfg(target_os = "linux")]
        {
            let table = std::fs::read_to_string("/proc/mounts")?;
            Ok(parse_mount_table(&table))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let output = Command::new("mount").arg("-p").output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::from_zfs_output("mount -p", "", &stderr));
            }
            Ok(parse_mount_table(&String::from_utf8_lossy(&output.stdout)))
        }
    }
}

impl ZfsBackend for ZfsCli {
    fn list(&self, target: &DatasetPath, opts: &ListOptions) -> Result<Vec<Vec<String>>> {
        let stdout = self.run_zfs_checked(&list_args(target, opts), target.as_str())?;
        Ok(parse_table(&stdout))
    }

    fn get(
        &self,
        target: &DatasetPath,
        properties: &[&str],
        opts: &GetOptions,
    ) -> Result<Vec<Vec<String>>> {
        let stdout = self.run_zfs_checked(&get_args(target, properties, opts), target.as_str())?;
        Ok(parse_table(&stdout))
    }

    fn pool_property(&self, pool: &str, property: &str) -> Result<String> {
        let args = vec![
            "get".to_string(),
            "-H".to_string(),
            "-o".to_string(),
            "value".to_string(),
            property.to_string(),
            pool.to_string(),
        ];
        let stdout = self.run_zpool_checked(&args, pool)?;
        Ok(stdout.lines().next().unwrap_or("").trim().to_string())
    }

    fn mounted_dataset(&self, mountpoint: &Path) -> Result<Option<DatasetPath>> {
        for (dataset, mounted_at) in self.zfs_mounts()? {
            if mounted_at == mountpoint {
                return Ok(Some(DatasetPath::new(dataset)?));
            }
        }
        Ok(None)
    }

    fn dataset_mountpoint(&self, dataset: &DatasetPath) -> Result<Option<PathBuf>> {
        for (mounted, mountpoint) in self.zfs_mounts()? {
            if mounted == dataset.as_str() {
                return Ok(Some(mountpoint));
            }
        }
        Ok(None)
    }

    fn set(&self, dataset: &DatasetPath, property: &Property) -> Result<()> {
        let args = vec![
            "set".to_string(),
            property.to_string(),
            dataset.as_str().to_string(),
        ];
        self.run_zfs_checked(&args, dataset.as_str()).map(drop)
    }

    fn snapshot(&self, snapshot: &DatasetPath, recursive: bool) -> Result<()> {
        let mut args = vec!["snapshot".to_string()];
        if recursive {
            args.push("-r".to_string());
        }
        args.push(snapshot.as_str().to_string());
        self.run_zfs_checked(&args, snapshot.as_str()).map(drop)
    }

    fn clone(
        &self,
        snapshot: &DatasetPath,
        target: &DatasetPath,
        properties: &[Property],
    ) -> Result<()> {
        let mut args = vec!["clone".to_string()];
        for property in properties {
            args.push("-o".to_string());
            args.push(property.to_string());
        }
        args.push(snapshot.as_str().to_string());
        args.push(target.as_str().to_string());
        self.run_zfs_checked(&args, target.as_str()).map(drop)
    }

    fn promote(&self, dataset: &DatasetPath) -> Result<()> {
        let args = vec!["promote".to_string(), dataset.as_str().to_string()];
        self.run_zfs_checked(&args, dataset.as_str()).map(drop)
    }

    fn destroy_recursive(&self, dataset: &DatasetPath) -> Result<()> {
        let args = vec![
            "destroy".to_string(),
            "-r".to_string(),
            dataset.as_str().to_string(),
        ];
        self.run_zfs_checked(&args, dataset.as_str()).map(drop)
    }

    fn destroy_snapshot(&self, snapshot: &DatasetPath) -> Result<()> {
        let args = vec!["destroy".to_string(), snapshot.as_str().to_string()];
        self.run_zfs_checked(&args, snapshot.as_str()).map(drop)
    }

    fn rename(&self, from: &DatasetPath, to: &DatasetPath) -> Result<()> {
        let args = vec![
            "rename".to_string(),
            from.as_str().to_string(),
            to.as_str().to_string(),
        ];
        self.run_zfs_checked(&args, from.as_str()).map(drop)
    }

    fn pool_set(&self, pool: &str, property: &Property) -> Result<()> {
        let args = vec!["set".to_string(), property.to_string(), pool.to_string()];
        self.run_zpool_checked(&args, pool).map(drop)
    }

    fn mount(&self, dataset: &DatasetPath) -> Result<()> {
        let args = vec!["mount".to_string(), dataset.as_str().to_string()];
        self.run_zfs_checked(&args, dataset.as_str()).map(drop)
    }

    fn mount_at(&self, dataset: &DatasetPath, mountpoint: &Path) -> Result<()> {
        // Non-legacy datasets need the zfsutil option on Linux; retry
        // without it where the option is rejected.
        let with_util = Command::new("mount")
            .args(["-t", "zfs", "-o", "zfsutil", dataset.as_str()])
            .arg(mountpoint)
            .output()?;
        if with_util.status.success() {
            return Ok(());
        }
        let plain = Command::new("mount")
            .args(["-t", "zfs", dataset.as_str()])
            .arg(mountpoint)
            .output()?;
        if plain.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&plain.stderr);
        Err(Error::from_zfs_output("mount -t zfs", dataset.as_str(), &stderr))
    }

    fn unmount(&self, dataset: &DatasetPath) -> Result<()> {
        let args = vec!["umount".to_string(), dataset.as_str().to_string()];
        self.run_zfs_checked(&args, dataset.as_str()).map(drop)
    }
}

fn find_tool(name: &'static str, candidates: &[&str]) -> Result<PathBuf> {
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    // Fall back to PATH lookup.
    let output = Command::new("which").arg(name).output()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    Err(Error::BinaryNotFound(name))
}

fn list_args(target: &DatasetPath, opts: &ListOptions) -> Vec<String> {
    let mut args = vec!["list".to_string(), "-H".to_string()];
    if opts.recursive {
        args.push("-r".to_string());
    }
    if let Some(depth) = opts.depth {
        args.push("-d".to_string());
        args.push(depth.to_string());
    }
    if !opts.columns.is_empty() {
        args.push("-o".to_string());
        args.push(opts.columns.join(","));
    }
    if !opts.kinds.is_empty() {
        args.push("-t".to_string());
        let kinds: Vec<&str> = opts.kinds.iter().map(|k| k.as_str()).collect();
        args.push(kinds.join(","));
    }
    for property in &opts.sort_ascending {
        args.push("-s".to_string());
        args.push(property.clone());
    }
    for property in &opts.sort_descending {
        args.push("-S".to_string());
        args.push(property.clone());
    }
    args.push(target.as_str().to_string());
    args
}

fn get_args(target: &DatasetPath, properties: &[&str], opts: &GetOptions) -> Vec<String> {
    let mut args = vec!["get".to_string(), "-H".to_string()];
    if opts.recursive {
        args.push("-r".to_string());
    }
    if let Some(depth) = opts.depth {
        args.push("-d".to_string());
        args.push(depth.to_string());
    }
    if !opts.kinds.is_empty() {
        args.push("-t".to_string());
        let kinds: Vec<&str> = opts.kinds.iter().map(|k| k.as_str()).collect();
        args.push(kinds.join(","));
    }
    if !opts.sources.is_empty() {
        args.push("-s".to_string());
        let sources: Vec<&str> = opts.sources.iter().map(|s| s.as_str()).collect();
        args.push(sources.join(","));
    }
    if !opts.columns.is_empty() {
        args.push("-o".to_string());
        args.push(opts.columns.join(","));
    }
    args.push(properties.join(","));
    args.push(target.as_str().to_string());
    args
}

/// Split `-H` output into rows of tab-separated cells. Tab separation is
/// what keeps multi-word `creation` dates in a single cell.
fn parse_table(stdout: &str) -> Vec<Vec<String>> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

/// Mount-table lines restricted to ZFS filesystems, as
/// (dataset, mountpoint) pairs.
fn parse_mount_table(table: &str) -> Vec<(String, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next()?;
            (fstype == "zfs")
                .then(|| (source.to_string(), PathBuf::from(unescape_mount_path(mountpoint))))
        })
        .collect()
}

/// Decode the octal escapes `/proc/mounts` uses for whitespace and
/// backslashes in paths (`\040` for space and so on).
fn unescape_mount_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let digits: String = chars.clone().take(3).collect();
            if digits.len() == 3 && digits.chars().all(|d| d.is_digit(8)) {
                if let Ok(code) = u8::from_str_radix(&digits, 8) {
                    out.push(code as char);
                    chars.nth(2);
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}
