//! Entities and documents.
//!
//! An [`Entity`] is the materialized state of one document: system fields
//! (`$id`, `$type`, version, timestamps, actors) plus arbitrary user fields.
//! A [`Document`] is the bag of user fields — a `BTreeMap` so serialized JSON
//! always has sorted keys (canonical form for hashing).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::EntityId;

/// Arbitrary user fields of an entity — sorted keys for canonical JSON.
pub type Document = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The materialized state of one document.
///
/// `version` is a monotonic per-entity counter bumped on every mutation.
/// `deleted_at` is set (not removed) on delete: a deleted entity stays
/// addressable so that late events have something to attach to, and only a
/// subsequent CREATE resurrects it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Globally unique id: `<namespace>/<local-id>`.
    #[serde(rename = "$id")]
    pub id: EntityId,

    /// Declared type name.
    #[serde(rename = "$type")]
    pub entity_type: String,

    /// Monotonic mutation counter, starting at 1 on create.
    pub version: u64,

    /// Creation timestamp, ms since epoch.
    #[serde(rename = "createdAt")]
    pub created_at: u64,

    /// Last-mutation timestamp, ms since epoch.
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,

    /// Actor that created the entity, if known.
    #[serde(rename = "createdBy", skip_serializing_if = "Option::is_none", default)]
    pub created_by: Option<String>,

    /// Actor of the last mutation, if known.
    #[serde(rename = "updatedBy", skip_serializing_if = "Option::is_none", default)]
    pub updated_by: Option<String>,

    /// Deletion timestamp — present only once the entity has been deleted.
    #[serde(rename = "deletedAt", skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<u64>,

    /// User fields, including nested documents, arrays, and relationship
    /// references.
    #[serde(flatten)]
    pub fields: Document,
}

impl Entity {
    /// Whether this entity is currently deleted (a later CREATE clears it).
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// ---------------------------------------------------------------------------
// Shallow merge
// ---------------------------------------------------------------------------

/// Merge `patch` over `state`, one level deep.
///
/// Top-level values overwrite, except when both sides hold an object: then
/// the incoming object's fields are merged into the existing one field-wise.
/// Arrays and primitives always overwrite.
pub fn merge_shallow(state: &mut Document, patch: &Document) {
    for (key, incoming) in patch {
        match (state.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(new_fields)) => {
                for (k, v) in new_fields {
                    existing.insert(k.clone(), v.clone());
                }
            }
            _ => {
                state.insert(key.clone(), incoming.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
