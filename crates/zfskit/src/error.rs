//! Error types for zfskit.
//!
//! The ZFS tools report failures as non-zero exits with a message on
//! stderr. [`Error::from_zfs_output`] classifies those messages into
//! typed variants so callers can branch on [`ErrorCategory`] instead of
//! sniffing strings themselves.

use thiserror::Error;

/// Result type for zfskit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Dataset, snapshot, or pool does not exist.
    NotFound,
    /// Target name is already taken.
    AlreadyExists,
    /// Destroy refused because clones still reference a snapshot.
    DependentClones,
    /// Dataset or pool is busy (mounted, held, or in use).
    Busy,
    /// Caller lacks the privileges for the operation.
    Permission,
    /// The zfs/zpool binaries could not be located.
    MissingBinary,
    /// Malformed dataset path or property.
    InvalidInput,
    /// Anything else.
    Other,
}

impl ErrorCategory {
    /// Short human-readable description of the category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "target does not exist",
            Self::AlreadyExists => "target already exists",
            Self::DependentClones => "dependent clones exist",
            Self::Busy => "target is busy",
            Self::Permission => "insufficient privileges",
            Self::MissingBinary => "ZFS tools not installed",
            Self::InvalidInput => "invalid input",
            Self::Other => "operation failed",
        }
    }
}

/// Errors from the ZFS command-line adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// A required binary was not found in standard locations or PATH.
    #[error("{0} binary not found (is ZFS installed?)")]
    BinaryNotFound(&'static str),

    /// Dataset, snapshot, or pool does not exist.
    #[error("dataset does not exist: {0}")]
    DatasetNotFound(String),

    /// Target name is already taken.
    #[error("dataset already exists: {0}")]
    DatasetExists(String),

    /// Destroy refused because clones still reference a snapshot.
    #[error("{0} has dependent clones")]
    DependentClones(String),

    /// Dataset or pool is busy.
    #[error("dataset is busy: {0}")]
    Busy(String),

    /// The operation requires privileges the caller does not have.
    #[error("permission denied running {0}")]
    PermissionDenied(String),

    /// A dataset path failed validation.
    #[error("invalid dataset path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A property string was not of the form `name=value`.
    #[error("invalid property '{0}': expected name=value")]
    InvalidProperty(String),

    /// Command exited non-zero and stderr matched no known pattern.
    #[error("`{command}` failed: {stderr}")]
    CommandFailed {
        /// The command that failed, e.g. `zfs destroy`.
        command: String,
        /// Trimmed stderr from the command.
        stderr: String,
    },

    /// Command succeeded but printed something unparseable.
    #[error("unexpected {what} output: {detail}")]
    UnexpectedOutput {
        /// Which output was being parsed.
        what: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// Underlying I/O failure (spawning a process, reading mount tables).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Category of this error, for branching without string matching.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BinaryNotFound(_) => ErrorCategory::MissingBinary,
            Self::DatasetNotFound(_) => ErrorCategory::NotFound,
            Self::DatasetExists(_) => ErrorCategory::AlreadyExists,
            Self::DependentClones(_) => ErrorCategory::DependentClones,
            Self::Busy(_) => ErrorCategory::Busy,
            Self::PermissionDenied(_) => ErrorCategory::Permission,
            Self::InvalidPath { .. } | Self::InvalidProperty(_) => ErrorCategory::InvalidInput,
            Self::CommandFailed { .. } | Self::UnexpectedOutput { .. } | Self::Io(_) => {
                ErrorCategory::Other
            }
        }
    }

    /// True when the target simply does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Classify a failed command from its stderr.
    ///
    /// `command` names the operation (e.g. `zfs destroy`), `target` the
    /// dataset or pool it ran against. Patterns follow the messages the
    /// OpenZFS tools actually print.
    pub fn from_zfs_output(command: &str, target: &str, stderr: &str) -> Self {
        let message = stderr.trim();
        let lower = message.to_lowercase();

        if lower.contains("does not exist") || lower.contains("no such pool") {
            Self::DatasetNotFound(target.to_string())
        } else if lower.contains("already exists") {
            Self::DatasetExists(target.to_string())
        } else if lower.contains("dependent clones") {
            Self::DependentClones(target.to_string())
        } else if lower.contains("is busy") {
            Self::Busy(target.to_string())
        } else if lower.contains("permission denied") || lower.contains("not privileged") {
            Self::PermissionDenied(command.to_string())
        } else {
            Self::CommandFailed {
                command: command.to_string(),
                stderr: message.to_string(),
            }
        }
    }
}
