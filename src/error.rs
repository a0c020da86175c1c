//! Crate-level error aggregation and CLI exit-code mapping.
//!
//! Library callers usually match on the per-subsystem errors directly;
//! `LoamError` exists for the boundary where one type must represent any
//! failure — the CLI, which maps it onto the documented exit codes:
//! `0` success, `1` user error, `2` merge conflict, `3` critical
//! data-safety failure.

use std::fmt;

use crate::db::DbError;
use crate::vcs::VcsError;
use loam_core::backend::StorageError;
use loam_core::lock::LockError;

/// Any loam failure, tagged by subsystem.
#[derive(Debug)]
pub enum LoamError {
    /// Storage backend failure.
    Storage(StorageError),
    /// Lock acquisition or release failure.
    Lock(LockError),
    /// Version-control failure.
    Vcs(VcsError),
    /// Database facade failure.
    Db(DbError),
    /// A merge finished with unresolved conflicts.
    MergeConflicts { count: usize },
}

impl LoamError {
    /// The process exit code this failure maps to.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Vcs(VcsError::CriticalRollbackFailure { .. }) => 3,
            Self::MergeConflicts { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for LoamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "{e}"),
            Self::Lock(e) => write!(f, "{e}"),
            Self::Vcs(e) => write!(f, "{e}"),
            Self::Db(e) => write!(f, "{e}"),
            Self::MergeConflicts { count } => {
                write!(f, "merge finished with {count} unresolved conflict(s)")
            }
        }
    }
}

impl std::error::Error for LoamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Lock(e) => Some(e),
            Self::Vcs(e) => Some(e),
            Self::Db(e) => Some(e),
            Self::MergeConflicts { .. } => None,
        }
    }
}

impl From<StorageError> for LoamError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<LockError> for LoamError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

impl From<VcsError> for LoamError {
    fn from(e: VcsError) -> Self {
        Self::Vcs(e)
    }
}

impl From<DbError> for LoamError {
    fn from(e: DbError) -> Self {
        Self::Db(e)
    }
}
