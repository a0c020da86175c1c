//! Commit objects — canonical JSON, content-addressed.
//!
//! A commit's identity is the sha256 of its canonical body
//! `{parents, author, message, timestamp, tree}`. Canonical means: struct
//! fields serialize in declaration order, every map is a `BTreeMap`
//! (sorted keys), and serializing twice yields identical bytes. Loading a
//! commit re-hashes the body and rejects mismatches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use loam_core::model::ObjectHash;
use loam_core::objects::{hash_bytes, ObjectStore};

use crate::events::LogPosition;

use super::VcsError;

// ---------------------------------------------------------------------------
// Tree types
// ---------------------------------------------------------------------------

/// One collection's frozen files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRef {
    /// Hash of the columnar data blob.
    pub data_hash: ObjectHash,
    /// Hash of the schema file, when the collection has one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub schema_hash: Option<ObjectHash>,
    /// Rows in the data blob.
    pub row_count: u64,
}

/// One namespace's frozen relationship manifests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelRefs {
    /// Hash of the forward (outbound) manifest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub forward_hash: Option<ObjectHash>,
    /// Hash of the reverse (inbound) manifest.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reverse_hash: Option<ObjectHash>,
}

/// The full tree a commit freezes: every collection's files, the
/// relationship manifests, and the event-log position per namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseState {
    /// Collections by namespace.
    pub collections: BTreeMap<String, CollectionRef>,
    /// Relationship manifests by namespace.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub relationships: BTreeMap<String, RelRefs>,
    /// Event-log position by namespace at commit time.
    #[serde(rename = "eventLogPosition", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub event_log_position: BTreeMap<String, LogPosition>,
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Commit metadata supplied by the caller.
#[derive(Clone, Debug)]
pub struct CommitMeta {
    /// Parent commit hashes (empty for the root commit).
    pub parents: Vec<ObjectHash>,
    /// Author identity.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// Commit time, ms since epoch.
    pub timestamp: u64,
}

/// The canonical serialized body — everything the hash covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CommitBody {
    parents: Vec<ObjectHash>,
    author: String,
    message: String,
    timestamp: u64,
    tree: DatabaseState,
}

/// A commit: hash plus the fields the hash covers.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    /// sha256 of the canonical body.
    pub hash: ObjectHash,
    /// Parent commits, oldest workflow first.
    pub parents: Vec<ObjectHash>,
    /// Author identity.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// Commit time, ms since epoch.
    pub timestamp: u64,
    /// The frozen database state.
    pub tree: DatabaseState,
}

impl Commit {
    fn body(&self) -> CommitBody {
        CommitBody {
            parents: self.parents.clone(),
            author: self.author.clone(),
            message: self.message.clone(),
            timestamp: self.timestamp,
            tree: self.tree.clone(),
        }
    }

    /// Canonical body bytes (what the hash covers and what gets stored).
    ///
    /// # Errors
    /// Serialization failures.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body())
    }
}

/// Build a commit over `tree`, computing its hash.
///
/// # Errors
/// Serialization failures.
pub fn create_commit(tree: DatabaseState, meta: CommitMeta) -> Result<Commit, VcsError> {
    let body = CommitBody {
        parents: meta.parents,
        author: meta.author,
        message: meta.message,
        timestamp: meta.timestamp,
        tree,
    };
    let bytes = serde_json::to_vec(&body)?;
    Ok(Commit {
        hash: hash_bytes(&bytes),
        parents: body.parents,
        author: body.author,
        message: body.message,
        timestamp: body.timestamp,
        tree: body.tree,
    })
}

/// Store a commit's canonical body in the object store.
///
/// # Errors
/// Storage failures; `CorruptCommit` if the stored hash disagrees with the
/// commit's (it cannot, unless the commit was hand-built wrong).
pub fn save_commit(objects: &ObjectStore, commit: &Commit) -> Result<(), VcsError> {
    let bytes = commit.canonical_bytes()?;
    let stored = objects.store(&bytes).map_err(VcsError::Storage)?;
    if stored != commit.hash {
        return Err(VcsError::CorruptCommit {
            hash: commit.hash.to_string(),
            reason: format!("body hashed to {stored} instead"),
        });
    }
    Ok(())
}

/// Load and verify a commit by hash.
///
/// # Errors
/// `Storage` (`NotFound` included) when the object is missing;
/// `CorruptCommit` when the body does not parse or does not re-hash to
/// `hash`.
pub fn load_commit(objects: &ObjectStore, hash: &ObjectHash) -> Result<Commit, VcsError> {
    let bytes = objects.load(hash).map_err(VcsError::Storage)?;
    if hash_bytes(&bytes) != *hash {
        return Err(VcsError::CorruptCommit {
            hash: hash.to_string(),
            reason: "stored bytes do not hash to the commit id".to_owned(),
        });
    }
    let body: CommitBody = serde_json::from_slice(&bytes).map_err(|e| VcsError::CorruptCommit {
        hash: hash.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Commit {
        hash: hash.clone(),
        parents: body.parents,
        author: body.author,
        message: body.message,
        timestamp: body.timestamp,
        tree: body.tree,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
