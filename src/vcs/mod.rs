//! The version-control layer.
//!
//! Commits are canonical-JSON documents stored in the content-addressed
//! object store; refs are one-line files; HEAD is either a branch reference
//! or a detached hash. Checkout rebuilds the working tree from a commit
//! under the `merge` lock with an atomic, rollback-safe restore.

pub mod branch;
pub mod commit;
pub mod refs;
pub mod schema_diff;
pub mod state;

use std::fmt;

use loam_core::backend::StorageError;
use loam_core::lock::LockError;
use loam_core::model::id::ValidationError;
use loam_core::model::BranchName;

pub use branch::{BranchManager, CheckoutOptions};
pub use commit::{Commit, CommitMeta, CollectionRef, DatabaseState, RelRefs};
pub use refs::Head;
pub use schema_diff::{
    categorize_changes, diff_schemas, BreakingChange, ChangeKind, SchemaChange, SchemaChanges,
    Severity,
};
pub use state::{capture_schema_snapshot, ChangeReport, UnrecoveredFile};

// ---------------------------------------------------------------------------
// VcsError
// ---------------------------------------------------------------------------

/// Unified error type for version-control operations.
#[derive(Debug)]
pub enum VcsError {
    /// A storage operation failed.
    Storage(StorageError),

    /// An identifier (branch name, hash) failed validation.
    Validation(ValidationError),

    /// (De)serialization failed.
    Serde(serde_json::Error),

    /// A branch with this name already exists.
    BranchExists { name: BranchName },

    /// The named branch does not exist.
    BranchNotFound { name: String },

    /// Refusing to delete the branch HEAD points at.
    CannotDeleteCurrent { name: BranchName },

    /// The working tree differs from HEAD; checkout needs `--force`.
    UncommittedChanges { changed_collections: Vec<String> },

    /// There is no commit to operate against.
    NoCommits,

    /// A loaded commit failed hash verification or did not parse.
    CorruptCommit { hash: String, reason: String },

    /// Lock acquisition failed.
    Lock(LockError),

    /// A restore failed and its rollback also failed — manual recovery
    /// required using the listed backups.
    CriticalRollbackFailure {
        /// Files whose pre-checkout content could not be put back.
        unrecovered: Vec<state::UnrecoveredFile>,
        /// The full `backup-<timestamp>` suffix of this restore attempt.
        backup_suffix: String,
        /// What failed before rollback started.
        original: String,
    },
}

impl fmt::Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage operation failed: {e}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::Serde(e) => write!(f, "(de)serialization failed: {e}"),
            Self::BranchExists { name } => {
                write!(
                    f,
                    "branch '{name}' already exists.\n  To fix: pick another name, or delete the existing branch first."
                )
            }
            Self::BranchNotFound { name } => {
                write!(
                    f,
                    "branch '{name}' not found.\n  To fix: list branches with `loam branch list`."
                )
            }
            Self::CannotDeleteCurrent { name } => {
                write!(
                    f,
                    "cannot delete the current branch '{name}'.\n  To fix: check out another branch first, or pass --force."
                )
            }
            Self::UncommittedChanges { changed_collections } => {
                write!(f, "working tree has uncommitted changes in: ")?;
                write!(f, "{}", changed_collections.join(", "))?;
                write!(f, "\n  To fix: commit your changes or pass --force to discard them.")
            }
            Self::NoCommits => write!(f, "no commits yet"),
            Self::CorruptCommit { hash, reason } => {
                write!(f, "commit '{hash}' is corrupt: {reason}")
            }
            Self::Lock(e) => write!(f, "{e}"),
            Self::CriticalRollbackFailure {
                unrecovered,
                backup_suffix,
                original,
            } => {
                writeln!(
                    f,
                    "CRITICAL: checkout failed ({original}) and rollback could not restore every file."
                )?;
                writeln!(f, "Recover these files manually from their backups:")?;
                for file in unrecovered {
                    writeln!(f, "  {}  ←  {}", file.path, file.backup)?;
                }
                write!(f, "All backups of this restore carry the suffix '{backup_suffix}'.")
            }
        }
    }
}

impl std::error::Error for VcsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Validation(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::Lock(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for VcsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ValidationError> for VcsError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<serde_json::Error> for VcsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

impl From<LockError> for VcsError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
