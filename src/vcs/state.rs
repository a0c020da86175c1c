//! Working-tree snapshot and atomic, rollback-safe reconstruction.
//!
//! `snapshot_state` freezes the working tree (`data/<ns>/data.parquet`,
//! `data/<ns>/schema.json`, `rels/forward|reverse/<ns>.parquet`) into the
//! object store and returns the tree a commit records.
//!
//! `reconstruct_state` is the inverse, with the system's core data-safety
//! property: every file it is about to overwrite is first copied to a
//! sibling `<file>.backup-<timestamp>`; backups are deleted only after
//! every write succeeded. On a mid-restore failure every backup is copied
//! back, and **no backup is removed until the entire rollback has
//! succeeded** — if rollback itself fails, the error names each
//! unrecovered file and the backup to recover it from.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use loam_core::backend::{ListOptions, StorageBackend, StorageError};
use loam_core::clock;
use loam_core::model::{CollectionSchema, ObjectHash, SchemaSnapshot};
use loam_core::objects::{hash_bytes, ObjectStore};

use crate::events::{EventLogMeta, LogPosition, EVENT_META_PATH};
use crate::mergetree::ColumnarBlob;

use super::commit::{Commit, CollectionRef, DatabaseState, RelRefs};
use super::refs;
use super::VcsError;

// ---------------------------------------------------------------------------
// Working-tree discovery
// ---------------------------------------------------------------------------

fn data_file(ns: &str) -> String {
    format!("data/{ns}/data.parquet")
}

fn schema_file(ns: &str) -> String {
    format!("data/{ns}/schema.json")
}

fn forward_rels_file(ns: &str) -> String {
    format!("rels/forward/{ns}.parquet")
}

fn reverse_rels_file(ns: &str) -> String {
    format!("rels/reverse/{ns}.parquet")
}

/// Namespaces that have any tracked file in the working tree.
fn discover_namespaces(storage: &dyn StorageBackend) -> Result<Vec<String>, VcsError> {
    let mut namespaces = Vec::new();
    for prefix in ["data/", "rels/forward/", "rels/reverse/"] {
        let listing = storage.list(prefix, &ListOptions::default())?;
        for path in listing.files {
            let rest = &path[prefix.len()..];
            let ns = rest.split('/').next().unwrap_or(rest);
            let ns = ns.strip_suffix(".parquet").unwrap_or(ns);
            if !ns.is_empty() && !namespaces.iter().any(|n| n == ns) {
                namespaces.push(ns.to_owned());
            }
        }
    }
    namespaces.sort_unstable();
    Ok(namespaces)
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Freeze the working tree into the object store; returns the commit tree.
///
/// # Errors
/// Storage failures.
pub fn snapshot_state(
    storage: &dyn StorageBackend,
    objects: &ObjectStore,
) -> Result<DatabaseState, VcsError> {
    let mut tree = DatabaseState::default();
    for ns in discover_namespaces(storage)? {
        let data = read_optional(storage, &data_file(&ns))?;
        if let Some(bytes) = data {
            let row_count = serde_json::from_slice::<ColumnarBlob>(&bytes)
                .map(|b| b.row_count)
                .unwrap_or(0);
            let schema_hash = match read_optional(storage, &schema_file(&ns))? {
                Some(schema_bytes) => Some(objects.store(&schema_bytes).map_err(VcsError::Storage)?),
                None => None,
            };
            tree.collections.insert(
                ns.clone(),
                CollectionRef {
                    data_hash: objects.store(&bytes).map_err(VcsError::Storage)?,
                    schema_hash,
                    row_count,
                },
            );
        }

        let forward = read_optional(storage, &forward_rels_file(&ns))?;
        let reverse = read_optional(storage, &reverse_rels_file(&ns))?;
        if forward.is_some() || reverse.is_some() {
            let refs = RelRefs {
                forward_hash: forward
                    .map(|b| objects.store(&b).map_err(VcsError::Storage))
                    .transpose()?,
                reverse_hash: reverse
                    .map(|b| objects.store(&b).map_err(VcsError::Storage))
                    .transpose()?,
            };
            tree.relationships.insert(ns.clone(), refs);
        }
    }
    tree.event_log_position = read_log_positions(storage)?;
    Ok(tree)
}

fn read_optional(
    storage: &dyn StorageBackend,
    path: &str,
) -> Result<Option<Vec<u8>>, VcsError> {
    match storage.read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_log_positions(
    storage: &dyn StorageBackend,
) -> Result<BTreeMap<String, LogPosition>, VcsError> {
    let Some(bytes) = read_optional(storage, EVENT_META_PATH)? else {
        return Ok(BTreeMap::new());
    };
    let meta: EventLogMeta = serde_json::from_slice(&bytes).unwrap_or_default();
    Ok(meta
        .segments
        .into_iter()
        .filter_map(|(ns, segments)| {
            segments.last().map(|last| {
                (
                    ns,
                    LogPosition {
                        segment_id: last.id.clone(),
                        offset: last.line_count,
                    },
                )
            })
        })
        .collect())
}

/// Capture every collection's declared schema as a snapshot for diffing.
///
/// # Errors
/// Storage failures.
pub fn capture_schema_snapshot(storage: &dyn StorageBackend) -> Result<SchemaSnapshot, VcsError> {
    let mut collections = BTreeMap::new();
    let mut hasher = Sha256::new();
    for ns in discover_namespaces(storage)? {
        let Some(bytes) = read_optional(storage, &schema_file(&ns))? else {
            continue;
        };
        let mut schema: CollectionSchema = serde_json::from_slice(&bytes)?;
        let hash = hash_bytes(&bytes).to_string();
        hasher.update(hash.as_bytes());
        schema.hash = hash;
        collections.insert(ns, schema);
    }
    Ok(SchemaSnapshot {
        hash: format!("{:x}", hasher.finalize()),
        captured_at: clock::now_ms(),
        collections,
    })
}

// ---------------------------------------------------------------------------
// Uncommitted-change check
// ---------------------------------------------------------------------------

/// What `has_uncommitted_changes` found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Whether anything differs from HEAD.
    pub has_changes: bool,
    /// The namespaces that differ, sorted.
    pub changed_collections: Vec<String>,
}

/// Compare the working tree's content hashes against the commit at HEAD.
///
/// With no HEAD commit, any tracked file counts as a change.
///
/// # Errors
/// Storage failures.
pub fn has_uncommitted_changes(
    storage: &dyn StorageBackend,
    objects: &ObjectStore,
) -> Result<ChangeReport, VcsError> {
    let head_tree = match refs::resolve_head(storage)? {
        Some(hash) => super::commit::load_commit(objects, &hash)?.tree,
        None => DatabaseState::default(),
    };

    let mut changed = Vec::new();
    let namespaces = discover_namespaces(storage)?;
    for ns in &namespaces {
        let current = current_hashes(storage, ns)?;
        let committed = committed_hashes(&head_tree, ns);
        if current != committed {
            changed.push(ns.clone());
        }
    }
    // Collections in HEAD that vanished from the working tree.
    for ns in head_tree.collections.keys() {
        if !namespaces.contains(ns) && !changed.contains(ns) {
            changed.push(ns.clone());
        }
    }
    changed.sort_unstable();
    Ok(ChangeReport {
        has_changes: !changed.is_empty(),
        changed_collections: changed,
    })
}

type FileHashes = [Option<ObjectHash>; 4];

fn current_hashes(storage: &dyn StorageBackend, ns: &str) -> Result<FileHashes, VcsError> {
    let mut out: FileHashes = [None, None, None, None];
    for (slot, path) in [
        data_file(ns),
        schema_file(ns),
        forward_rels_file(ns),
        reverse_rels_file(ns),
    ]
    .iter()
    .enumerate()
    {
        out[slot] = read_optional(storage, path)?.map(|b| hash_bytes(&b));
    }
    Ok(out)
}

fn committed_hashes(tree: &DatabaseState, ns: &str) -> FileHashes {
    let collection = tree.collections.get(ns);
    let rels = tree.relationships.get(ns);
    [
        collection.map(|c| c.data_hash.clone()),
        collection.and_then(|c| c.schema_hash.clone()),
        rels.and_then(|r| r.forward_hash.clone()),
        rels.and_then(|r| r.reverse_hash.clone()),
    ]
}

// ---------------------------------------------------------------------------
// Reconstruct
// ---------------------------------------------------------------------------

/// A file rollback could not put back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnrecoveredFile {
    /// The canonical working-tree path.
    pub path: String,
    /// The backup holding its pre-restore content (empty when the file did
    /// not exist before the restore and could not be removed).
    pub backup: String,
}

struct RestoreTarget {
    path: String,
    hash: ObjectHash,
    // The backup path, when the file existed before the restore.
    backup: Option<String>,
}

/// Rebuild the working tree from `commit`, atomically.
///
/// 1. Back up every target file that exists to `<file>.backup-<ts>`.
/// 2. Write every target from its object.
/// 3. Only after all writes succeed, delete every backup.
///
/// On failure, every backup is copied back; backups are retained until the
/// whole rollback succeeds. A failed rollback raises
/// [`VcsError::CriticalRollbackFailure`] naming each unrecovered file.
///
/// # Errors
/// On rollback success: the original failure. On rollback failure:
/// `CriticalRollbackFailure`.
pub fn reconstruct_state(
    storage: &dyn StorageBackend,
    objects: &ObjectStore,
    commit: &Commit,
) -> Result<(), VcsError> {
    let suffix = format!("backup-{}", clock::now_ms());
    let mut targets = Vec::new();
    for (ns, collection) in &commit.tree.collections {
        targets.push((data_file(ns), collection.data_hash.clone()));
        if let Some(schema_hash) = &collection.schema_hash {
            targets.push((schema_file(ns), schema_hash.clone()));
        }
    }
    for (ns, rels) in &commit.tree.relationships {
        if let Some(hash) = &rels.forward_hash {
            targets.push((forward_rels_file(ns), hash.clone()));
        }
        if let Some(hash) = &rels.reverse_hash {
            targets.push((reverse_rels_file(ns), hash.clone()));
        }
    }

    // Phase 1: back up. A failure here leaves every original untouched —
    // drop the backups made so far and surface the error.
    let mut prepared: Vec<RestoreTarget> = Vec::with_capacity(targets.len());
    for (path, hash) in targets {
        let backup = if storage.exists(&path)? {
            let backup_path = format!("{path}.{suffix}");
            if let Err(e) = storage.copy(&path, &backup_path) {
                discard_backups(storage, &prepared);
                return Err(e.into());
            }
            Some(backup_path)
        } else {
            None
        };
        prepared.push(RestoreTarget { path, hash, backup });
    }

    // Phase 2: write targets. Any failure triggers rollback.
    for target in &prepared {
        let result = objects
            .load(&target.hash)
            .and_then(|bytes| storage.write_atomic(&target.path, &bytes).map(|_| ()));
        if let Err(original) = result {
            warn!(path = target.path, error = %original, "restore failed; rolling back");
            return Err(rollback(storage, &prepared, &suffix, original));
        }
    }

    // Phase 3: every write landed — now, and only now, drop the backups.
    discard_backups(storage, &prepared);
    info!(files = prepared.len(), commit = %commit.hash, "state reconstructed");
    Ok(())
}

/// Copy every backup over its canonical path. Backups are deleted only
/// when every copy-back succeeded.
fn rollback(
    storage: &dyn StorageBackend,
    prepared: &[RestoreTarget],
    suffix: &str,
    original: StorageError,
) -> VcsError {
    let mut unrecovered = Vec::new();
    for target in prepared {
        let result = match &target.backup {
            Some(backup) => storage.copy(backup, &target.path),
            // The file did not exist before; remove whatever we wrote.
            None => match storage.delete(&target.path) {
                Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            error!(path = target.path, error = %e, "rollback copy failed");
            unrecovered.push(UnrecoveredFile {
                path: target.path.clone(),
                backup: target.backup.clone().unwrap_or_default(),
            });
        }
    }

    if unrecovered.is_empty() {
        // Rollback complete — only now are the backups disposable.
        discard_backups(storage, prepared);
        VcsError::Storage(original)
    } else {
        // Leave every backup in place for manual recovery.
        VcsError::CriticalRollbackFailure {
            unrecovered,
            backup_suffix: suffix.to_owned(),
            original: original.to_string(),
        }
    }
}

fn discard_backups(storage: &dyn StorageBackend, prepared: &[RestoreTarget]) {
    for target in prepared {
        if let Some(backup) = &target.backup
            && let Err(e) = storage.delete(backup)
            && !e.is_not_found()
        {
            warn!(backup, error = %e, "failed to remove backup");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
