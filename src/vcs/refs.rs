//! Refs and HEAD.
//!
//! `refs/heads/<branch>` holds one commit hash, newline-terminated. `HEAD`
//! holds either `ref: <branch>\n` (on a branch) or a bare hash (detached).
//! `resolve` follows exactly one level of indirection.

use loam_core::backend::{ListOptions, StorageBackend, StorageError};
use loam_core::model::{BranchName, ObjectHash};

use super::VcsError;

/// The HEAD file path.
pub const HEAD_PATH: &str = "HEAD";

/// Prefix for branch refs.
pub const HEADS_PREFIX: &str = "refs/heads";

/// The default branch name.
pub const DEFAULT_BRANCH: &str = "main";

/// The ref file path for a branch.
#[must_use]
pub fn branch_ref_path(branch: &BranchName) -> String {
    format!("{HEADS_PREFIX}/{branch}")
}

// ---------------------------------------------------------------------------
// Head
// ---------------------------------------------------------------------------

/// Where HEAD points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Head {
    /// On a branch.
    Branch(BranchName),
    /// Detached at a commit.
    Detached(ObjectHash),
}

impl Head {
    /// The branch name, when on one.
    #[must_use]
    pub const fn branch(&self) -> Option<&BranchName> {
        match self {
            Self::Branch(name) => Some(name),
            Self::Detached(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ref I/O
// ---------------------------------------------------------------------------

/// Read a branch ref. `Ok(None)` when the branch does not exist.
///
/// # Errors
/// Storage failures; `CorruptCommit` when the file does not hold a hash.
pub fn read_ref(
    storage: &dyn StorageBackend,
    branch: &BranchName,
) -> Result<Option<ObjectHash>, VcsError> {
    match storage.read(&branch_ref_path(branch)) {
        Ok(bytes) => parse_hash(&bytes).map(Some),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a branch ref.
///
/// # Errors
/// Storage failures.
pub fn write_ref(
    storage: &dyn StorageBackend,
    branch: &BranchName,
    hash: &ObjectHash,
) -> Result<(), VcsError> {
    storage.write_atomic(&branch_ref_path(branch), format!("{hash}\n").as_bytes())?;
    Ok(())
}

/// Delete a branch ref. No-op when absent.
///
/// # Errors
/// Storage failures other than `NotFound`.
pub fn delete_ref(storage: &dyn StorageBackend, branch: &BranchName) -> Result<(), VcsError> {
    match storage.delete(&branch_ref_path(branch)) {
        Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// All branches with their commit hashes, sorted by name.
///
/// # Errors
/// Storage failures.
pub fn list_refs(storage: &dyn StorageBackend) -> Result<Vec<(BranchName, ObjectHash)>, VcsError> {
    let prefix = format!("{HEADS_PREFIX}/");
    let listing = storage.list(&prefix, &ListOptions::default())?;
    let mut out = Vec::new();
    for path in listing.files {
        let Some(name) = path.strip_prefix(&prefix) else {
            continue;
        };
        let branch = BranchName::new(name)?;
        if let Some(hash) = read_ref(storage, &branch)? {
            out.push((branch, hash));
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// HEAD I/O
// ---------------------------------------------------------------------------

/// Read HEAD. `Ok(None)` for a store with no HEAD yet.
///
/// # Errors
/// Storage failures; `CorruptCommit` for malformed contents.
pub fn read_head(storage: &dyn StorageBackend) -> Result<Option<Head>, VcsError> {
    let bytes = match storage.read(HEAD_PATH) {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();
    if let Some(branch) = text.strip_prefix("ref: ") {
        Ok(Some(Head::Branch(BranchName::new(branch.trim())?)))
    } else {
        Ok(Some(Head::Detached(parse_hash(text.as_bytes())?)))
    }
}

/// Write HEAD.
///
/// # Errors
/// Storage failures.
pub fn write_head(storage: &dyn StorageBackend, head: &Head) -> Result<(), VcsError> {
    let body = match head {
        Head::Branch(name) => format!("ref: {name}\n"),
        Head::Detached(hash) => format!("{hash}\n"),
    };
    storage.write_atomic(HEAD_PATH, body.as_bytes())?;
    Ok(())
}

/// Resolve HEAD to a commit hash, following one level of branch
/// indirection. `Ok(None)` when HEAD is unset or the branch has no commit.
///
/// # Errors
/// Storage failures.
pub fn resolve_head(storage: &dyn StorageBackend) -> Result<Option<ObjectHash>, VcsError> {
    match read_head(storage)? {
        None => Ok(None),
        Some(Head::Detached(hash)) => Ok(Some(hash)),
        Some(Head::Branch(name)) => read_ref(storage, &name),
    }
}

/// Resolve a name — `"HEAD"`, a branch, or a bare hash — to a commit hash.
///
/// # Errors
/// `BranchNotFound` when the name is neither.
pub fn resolve_name(storage: &dyn StorageBackend, name: &str) -> Result<ObjectHash, VcsError> {
    if name == "HEAD" {
        return resolve_head(storage)?.ok_or(VcsError::NoCommits);
    }
    if let Ok(branch) = BranchName::new(name)
        && let Some(hash) = read_ref(storage, &branch)?
    {
        return Ok(hash);
    }
    if let Ok(hash) = ObjectHash::new(name) {
        return Ok(hash);
    }
    Err(VcsError::BranchNotFound {
        name: name.to_owned(),
    })
}

fn parse_hash(bytes: &[u8]) -> Result<ObjectHash, VcsError> {
    let text = String::from_utf8_lossy(bytes);
    ObjectHash::new(text.trim()).map_err(|e| VcsError::CorruptCommit {
        hash: text.trim().to_owned(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::backend::MemoryBackend;
    use loam_core::objects::hash_bytes;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[test]
    fn ref_round_trip() {
        let storage = MemoryBackend::new();
        let hash = hash_bytes(b"commit");
        write_ref(&storage, &branch("main"), &hash).unwrap();
        assert_eq!(read_ref(&storage, &branch("main")).unwrap(), Some(hash));
        assert_eq!(read_ref(&storage, &branch("other")).unwrap(), None);
    }

    #[test]
    fn ref_file_is_one_line() {
        let storage = MemoryBackend::new();
        let hash = hash_bytes(b"commit");
        write_ref(&storage, &branch("main"), &hash).unwrap();
        let bytes = storage.read("refs/heads/main").unwrap();
        assert_eq!(bytes, format!("{hash}\n").into_bytes());
    }

    #[test]
    fn head_branch_round_trip() {
        let storage = MemoryBackend::new();
        write_head(&storage, &Head::Branch(branch("main"))).unwrap();
        assert_eq!(storage.read("HEAD").unwrap(), b"ref: main\n");
        assert_eq!(
            read_head(&storage).unwrap(),
            Some(Head::Branch(branch("main")))
        );
    }

    #[test]
    fn head_detached_round_trip() {
        let storage = MemoryBackend::new();
        let hash = hash_bytes(b"detached");
        write_head(&storage, &Head::Detached(hash.clone())).unwrap();
        assert_eq!(read_head(&storage).unwrap(), Some(Head::Detached(hash)));
    }

    #[test]
    fn resolve_head_follows_one_level() {
        let storage = MemoryBackend::new();
        let hash = hash_bytes(b"tip");
        write_ref(&storage, &branch("main"), &hash).unwrap();
        write_head(&storage, &Head::Branch(branch("main"))).unwrap();
        assert_eq!(resolve_head(&storage).unwrap(), Some(hash));
    }

    #[test]
    fn resolve_head_on_unborn_branch_is_none() {
        let storage = MemoryBackend::new();
        write_head(&storage, &Head::Branch(branch("main"))).unwrap();
        assert_eq!(resolve_head(&storage).unwrap(), None);
    }

    #[test]
    fn resolve_name_accepts_branch_hash_and_head() {
        let storage = MemoryBackend::new();
        let hash = hash_bytes(b"tip");
        write_ref(&storage, &branch("main"), &hash).unwrap();
        write_head(&storage, &Head::Branch(branch("main"))).unwrap();
        assert_eq!(resolve_name(&storage, "main").unwrap(), hash);
        assert_eq!(resolve_name(&storage, "HEAD").unwrap(), hash);
        assert_eq!(resolve_name(&storage, hash.as_str()).unwrap(), hash);
        assert!(matches!(
            resolve_name(&storage, "nope"),
            Err(VcsError::BranchNotFound { .. })
        ));
    }

    #[test]
    fn list_refs_sorted() {
        let storage = MemoryBackend::new();
        write_ref(&storage, &branch("beta"), &hash_bytes(b"b")).unwrap();
        write_ref(&storage, &branch("alpha"), &hash_bytes(b"a")).unwrap();
        let refs = list_refs(&storage).unwrap();
        let names: Vec<&str> = refs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn corrupt_ref_is_rejected() {
        let storage = MemoryBackend::new();
        storage.write("refs/heads/bad", b"not a hash\n").unwrap();
        assert!(matches!(
            read_ref(&storage, &branch("bad")),
            Err(VcsError::CorruptCommit { .. })
        ));
    }
}
