//! # zfskit
//!
//! Typed access to ZFS datasets, snapshots, and pools for boot
//! environment management.
//!
//! The crate is a thin, testable layer over the `zfs`/`zpool` command
//! line tools: validated dataset paths, structured errors classified
//! from tool stderr, and a [`ZfsBackend`] trait with a real
//! implementation ([`ZfsCli`]) and an in-memory one ([`MockZfs`]) that
//! models the snapshot/clone graph for tests.
//!
//! ## Example
//!
//! ```
//! use zfskit::{DatasetPath, MockZfs, ZfsBackend};
//!
//! let zfs = MockZfs::with_pool("rpool");
//! zfs.add_filesystem("rpool/ROOT", 0);
//! zfs.add_filesystem("rpool/ROOT/default", 5);
//!
//! let root = DatasetPath::new("rpool/ROOT/default")?;
//! assert!(zfs.exists(&root, None));
//! assert!(!zfs.is_clone(&root)?);
//!
//! zfs.snapshot(&root.snapshot("backup")?, false)?;
//! assert!(zfs.exists(&root.snapshot("backup")?, None));
//! # Ok::<(), zfskit::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod path;
pub mod types;

pub use backend::mock::{MockCall, MockZfs};
pub use backend::zfs::ZfsCli;
pub use backend::ZfsBackend;
pub use error::{Error, ErrorCategory, Result};
pub use path::DatasetPath;
pub use types::{DatasetKind, GetOptions, ListOptions, Property, PropertySource};
