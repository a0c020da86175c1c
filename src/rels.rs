//! Relationship tuple store.
//!
//! Relationships are first-class tuples `(f, p, r, t)` — from entity `f`
//! via predicate `p` (reverse predicate `r`) to entity `t` — not
//! back-pointers on documents. The store keeps two manifests per
//! namespace: `rels/forward/<ns>.parquet` indexes tuples by the source's
//! namespace, `rels/reverse/<ns>.parquet` by the target's. Graph traversal
//! is a consumer concern; this store only answers one-hop lookups.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use loam_core::backend::{StorageBackend, StorageError};
use loam_core::model::EntityId;

use crate::mergetree::line::RelLine;

/// Forward-manifest path for a namespace.
#[must_use]
pub fn forward_path(ns: &str) -> String {
    format!("rels/forward/{ns}.parquet")
}

/// Reverse-manifest path for a namespace.
#[must_use]
pub fn reverse_path(ns: &str) -> String {
    format!("rels/reverse/{ns}.parquet")
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One relationship tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelTuple {
    /// Source entity.
    pub f: EntityId,
    /// Forward predicate.
    pub p: String,
    /// Reverse predicate.
    pub r: String,
    /// Target entity.
    pub t: EntityId,
    /// When the link was made, ms since epoch.
    pub ts: u64,
}

impl RelTuple {
    /// Build a tuple from a rel line.
    #[must_use]
    pub fn from_line(line: &RelLine) -> Self {
        Self {
            f: line.f.clone(),
            p: line.p.clone(),
            r: line.r.clone(),
            t: line.t.clone(),
            ts: line.ts,
        }
    }

    fn same_edge(&self, other: &Self) -> bool {
        self.f == other.f && self.p == other.p && self.t == other.t
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RelManifest {
    tuples: Vec<RelTuple>,
}

/// Errors from relationship operations.
#[derive(Debug)]
pub enum RelError {
    /// A storage operation failed.
    Storage(StorageError),
    /// A manifest failed to (de)serialize.
    Serde(serde_json::Error),
}

impl fmt::Display for RelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "relationship storage operation failed: {e}"),
            Self::Serde(e) => write!(f, "relationship manifest (de)serialization failed: {e}"),
        }
    }
}

impl std::error::Error for RelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Serde(e) => Some(e),
        }
    }
}

impl From<StorageError> for RelError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<serde_json::Error> for RelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// RelStore
// ---------------------------------------------------------------------------

/// The forward/reverse tuple store over one backend.
#[derive(Clone)]
pub struct RelStore {
    storage: Arc<dyn StorageBackend>,
}

impl fmt::Debug for RelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelStore").finish_non_exhaustive()
    }
}

impl RelStore {
    /// Create a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Record a link: adds the tuple to the source's forward manifest and
    /// the target's reverse manifest. Re-linking an existing edge updates
    /// its timestamp instead of duplicating it.
    ///
    /// # Errors
    /// Storage and serialization failures.
    pub fn link(&self, line: &RelLine) -> Result<(), RelError> {
        let tuple = RelTuple::from_line(line);
        self.update_manifest(&forward_path(tuple.f.namespace().as_str()), |tuples| {
            tuples.retain(|t| !t.same_edge(&tuple));
            tuples.push(tuple.clone());
        })?;
        self.update_manifest(&reverse_path(tuple.t.namespace().as_str()), |tuples| {
            tuples.retain(|t| !t.same_edge(&tuple));
            tuples.push(tuple.clone());
        })
    }

    /// Remove a link from both manifests. Unlinking an absent edge is a
    /// no-op.
    ///
    /// # Errors
    /// Storage and serialization failures.
    pub fn unlink(&self, line: &RelLine) -> Result<(), RelError> {
        let tuple = RelTuple::from_line(line);
        self.update_manifest(&forward_path(tuple.f.namespace().as_str()), |tuples| {
            tuples.retain(|t| !t.same_edge(&tuple));
        })?;
        self.update_manifest(&reverse_path(tuple.t.namespace().as_str()), |tuples| {
            tuples.retain(|t| !t.same_edge(&tuple));
        })
    }

    /// Outbound tuples of `from`, optionally filtered by predicate.
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn related(
        &self,
        from: &EntityId,
        predicate: Option<&str>,
    ) -> Result<Vec<RelTuple>, RelError> {
        let manifest = self.read_manifest(&forward_path(from.namespace().as_str()))?;
        Ok(manifest
            .tuples
            .into_iter()
            .filter(|t| t.f == *from && predicate.is_none_or(|p| t.p == p))
            .collect())
    }

    /// Inbound tuples of `to`, optionally filtered by reverse predicate.
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn related_reverse(
        &self,
        to: &EntityId,
        predicate: Option<&str>,
    ) -> Result<Vec<RelTuple>, RelError> {
        let manifest = self.read_manifest(&reverse_path(to.namespace().as_str()))?;
        Ok(manifest
            .tuples
            .into_iter()
            .filter(|t| t.t == *to && predicate.is_none_or(|p| t.r == p))
            .collect())
    }

    fn read_manifest(&self, path: &str) -> Result<RelManifest, RelError> {
        match self.storage.read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.is_not_found() => Ok(RelManifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn update_manifest(
        &self,
        path: &str,
        mutate: impl FnOnce(&mut Vec<RelTuple>),
    ) -> Result<(), RelError> {
        let mut manifest = self.read_manifest(path)?;
        mutate(&mut manifest.tuples);
        self.storage
            .write_atomic(path, &serde_json::to_vec(&manifest)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
