//! Branch operations and checkout.
//!
//! Checkout is the one operation that rewrites the working tree, so it runs
//! under the `merge` lock and refuses to proceed over uncommitted changes
//! unless forced.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use loam_core::backend::StorageBackend;
use loam_core::clock;
use loam_core::lock::{with_lock, AcquireOptions, LockManager};
use loam_core::model::{BranchName, ObjectHash};
use loam_core::objects::ObjectStore;

use super::commit::{create_commit, load_commit, save_commit, Commit, CommitMeta};
use super::refs::{
    delete_ref, list_refs, read_head, read_ref, resolve_head, resolve_name, write_head, write_ref,
    Head, DEFAULT_BRANCH,
};
use super::state::{has_uncommitted_changes, reconstruct_state, snapshot_state, ChangeReport};
use super::VcsError;

/// The lock resource guarding working-tree mutation.
pub const MERGE_LOCK: &str = "merge";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for [`BranchManager::checkout`].
#[derive(Clone, Debug, Default)]
pub struct CheckoutOptions {
    /// Create the branch (from HEAD) before checking it out.
    pub create: bool,
    /// Discard uncommitted changes instead of refusing.
    pub force: bool,
    /// Move HEAD without touching the working tree.
    pub skip_state_reconstruction: bool,
}

// ---------------------------------------------------------------------------
// BranchManager
// ---------------------------------------------------------------------------

/// Branch CRUD, commit, log, and checkout over one storage backend.
pub struct BranchManager {
    storage: Arc<dyn StorageBackend>,
    objects: ObjectStore,
    locks: LockManager,
}

impl fmt::Debug for BranchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchManager").finish_non_exhaustive()
    }
}

impl BranchManager {
    /// Create a manager over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            objects: ObjectStore::new(storage.clone()),
            locks: LockManager::new(storage.clone()),
            storage,
        }
    }

    /// Point HEAD at the default branch if the store has no HEAD yet.
    ///
    /// # Errors
    /// Storage failures.
    pub fn init(&self) -> Result<(), VcsError> {
        if read_head(self.storage.as_ref())?.is_none() {
            write_head(
                self.storage.as_ref(),
                &Head::Branch(BranchName::new(DEFAULT_BRANCH)?),
            )?;
        }
        Ok(())
    }

    /// The object store this manager commits into.
    #[must_use]
    pub const fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// The current branch, or `None` when detached or HEAD is unset.
    ///
    /// # Errors
    /// Storage failures.
    pub fn current(&self) -> Result<Option<BranchName>, VcsError> {
        Ok(read_head(self.storage.as_ref())?.and_then(|h| h.branch().cloned()))
    }

    /// Whether a branch exists.
    ///
    /// # Errors
    /// Storage failures.
    pub fn exists(&self, name: &BranchName) -> Result<bool, VcsError> {
        Ok(read_ref(self.storage.as_ref(), name)?.is_some())
    }

    /// All branches with their tips, sorted by name.
    ///
    /// # Errors
    /// Storage failures.
    pub fn list(&self) -> Result<Vec<(BranchName, ObjectHash)>, VcsError> {
        list_refs(self.storage.as_ref())
    }

    /// Create `name` at `from` (a branch, hash, or `"HEAD"`; default HEAD).
    ///
    /// # Errors
    /// `BranchExists`; `NoCommits` when the base cannot be resolved.
    pub fn create(&self, name: &BranchName, from: Option<&str>) -> Result<(), VcsError> {
        if self.exists(name)? {
            return Err(VcsError::BranchExists { name: name.clone() });
        }
        let base = match from {
            Some(base) => resolve_name(self.storage.as_ref(), base)?,
            None => resolve_head(self.storage.as_ref())?.ok_or(VcsError::NoCommits)?,
        };
        write_ref(self.storage.as_ref(), name, &base)?;
        info!(branch = %name, base = %base, "branch created");
        Ok(())
    }

    /// Delete `name`.
    ///
    /// # Errors
    /// `CannotDeleteCurrent` unless `force`; `BranchNotFound`.
    pub fn delete(&self, name: &BranchName, force: bool) -> Result<(), VcsError> {
        if !self.exists(name)? {
            return Err(VcsError::BranchNotFound {
                name: name.to_string(),
            });
        }
        if !force && self.current()?.as_ref() == Some(name) {
            return Err(VcsError::CannotDeleteCurrent { name: name.clone() });
        }
        delete_ref(self.storage.as_ref(), name)?;
        info!(branch = %name, "branch deleted");
        Ok(())
    }

    /// Rename `old` to `new`, updating HEAD if it pointed at `old`.
    ///
    /// # Errors
    /// `BranchNotFound` / `BranchExists`.
    pub fn rename(&self, old: &BranchName, new: &BranchName) -> Result<(), VcsError> {
        let Some(hash) = read_ref(self.storage.as_ref(), old)? else {
            return Err(VcsError::BranchNotFound {
                name: old.to_string(),
            });
        };
        if self.exists(new)? {
            return Err(VcsError::BranchExists { name: new.clone() });
        }
        write_ref(self.storage.as_ref(), new, &hash)?;
        delete_ref(self.storage.as_ref(), old)?;
        if self.current()?.as_ref() == Some(old) {
            write_head(self.storage.as_ref(), &Head::Branch(new.clone()))?;
        }
        info!(from = %old, to = %new, "branch renamed");
        Ok(())
    }

    /// Check out `name` — a branch (HEAD follows it) or a commit hash
    /// (HEAD detaches).
    ///
    /// Without `force`, refuses when the working tree has uncommitted
    /// changes. The working-tree rewrite runs under the `merge` lock.
    ///
    /// # Errors
    /// `UncommittedChanges`, `BranchNotFound`, lock and restore failures.
    pub fn checkout(&self, name: &str, opts: &CheckoutOptions) -> Result<Commit, VcsError> {
        if opts.create {
            let branch = BranchName::new(name)?;
            self.create(&branch, None)?;
        }
        let hash = resolve_name(self.storage.as_ref(), name)?;
        let commit = load_commit(&self.objects, &hash)?;

        if !opts.force && !opts.skip_state_reconstruction {
            let report = has_uncommitted_changes(self.storage.as_ref(), &self.objects)?;
            if report.has_changes {
                return Err(VcsError::UncommittedChanges {
                    changed_collections: report.changed_collections,
                });
            }
        }

        if !opts.skip_state_reconstruction {
            with_lock(
                &self.locks,
                MERGE_LOCK,
                &AcquireOptions::default(),
                || reconstruct_state(self.storage.as_ref(), &self.objects, &commit),
            )?;
        }

        let head = if let Ok(branch) = BranchName::new(name)
            && read_ref(self.storage.as_ref(), &branch)?.is_some()
        {
            Head::Branch(branch)
        } else {
            Head::Detached(hash)
        };
        write_head(self.storage.as_ref(), &head)?;
        info!(target = name, commit = %commit.hash, "checked out");
        Ok(commit)
    }

    /// Snapshot the working tree and commit it, advancing the current
    /// branch (or detached HEAD).
    ///
    /// # Errors
    /// Storage failures.
    pub fn commit(&self, author: &str, message: &str) -> Result<Commit, VcsError> {
        let tree = snapshot_state(self.storage.as_ref(), &self.objects)?;
        let parents = resolve_head(self.storage.as_ref())?.into_iter().collect();
        let commit = create_commit(
            tree,
            CommitMeta {
                parents,
                author: author.to_owned(),
                message: message.to_owned(),
                timestamp: clock::now_ms(),
            },
        )?;
        save_commit(&self.objects, &commit)?;

        match read_head(self.storage.as_ref())? {
            Some(Head::Branch(branch)) => {
                write_ref(self.storage.as_ref(), &branch, &commit.hash)?;
            }
            Some(Head::Detached(_)) | None => {
                write_head(self.storage.as_ref(), &Head::Detached(commit.hash.clone()))?;
            }
        }
        info!(commit = %commit.hash, author, "committed");
        Ok(commit)
    }

    /// The working-tree status against HEAD.
    ///
    /// # Errors
    /// Storage failures.
    pub fn status(&self) -> Result<ChangeReport, VcsError> {
        has_uncommitted_changes(self.storage.as_ref(), &self.objects)
    }

    /// Commits reachable from HEAD by first parent, newest first, up to
    /// `limit`.
    ///
    /// # Errors
    /// Storage failures.
    pub fn log(&self, limit: usize) -> Result<Vec<Commit>, VcsError> {
        let mut out = Vec::new();
        let mut cursor = resolve_head(self.storage.as_ref())?;
        while let Some(hash) = cursor {
            if out.len() >= limit {
                break;
            }
            let commit = load_commit(&self.objects, &hash)?;
            cursor = commit.parents.first().cloned();
            out.push(commit);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
