//! Schema snapshots and migration records.
//!
//! A [`SchemaSnapshot`] captures the declared shape of every collection at a
//! point in time; the version-control layer diffs two snapshots to classify
//! changes as breaking or safe. A [`Migration`] rides on a schema line in the
//! mutation log and describes how old rows are read until compaction
//! rewrites them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// Declared type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Date,
    /// A relationship reference to another entity.
    Reference,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Date => "date",
            Self::Reference => "reference",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// FieldDef
// ---------------------------------------------------------------------------

/// One declared field of a collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,

    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Whether rows must carry this field.
    #[serde(default)]
    pub required: bool,

    /// Whether a secondary index is maintained for this field.
    #[serde(default)]
    pub indexed: bool,

    /// Whether values must be unique across the collection.
    #[serde(default)]
    pub unique: bool,

    /// Whether the field holds an array of the declared type.
    #[serde(default)]
    pub array: bool,

    /// Default value applied to rows that predate the field.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default: Option<Value>,

    /// Target namespace, for `Reference` fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relationship: Option<String>,
}

impl FieldDef {
    /// A plain optional field of the given type.
    #[must_use]
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            indexed: false,
            unique: false,
            array: false,
            default: None,
            relationship: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CollectionSchema / SchemaSnapshot
// ---------------------------------------------------------------------------

/// The declared shape of one collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Content hash of the canonical serialized schema.
    pub hash: String,
    /// Monotonic schema version — only ever advances.
    pub version: u64,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldDef>,
}

impl CollectionSchema {
    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A point-in-time capture of every collection's schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Content hash over all collection hashes.
    pub hash: String,
    /// Capture timestamp, ms since epoch.
    #[serde(rename = "capturedAt")]
    pub captured_at: u64,
    /// Collections by name.
    pub collections: BTreeMap<String, CollectionSchema>,
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// How rows written under an older schema version are read.
///
/// Carried on a schema line in the mutation log; applied logically on read
/// until a compaction rewrites the columnar data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Fields added in this version.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub added: Vec<FieldDef>,

    /// Field names dropped in this version — old rows' values are ignored.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub dropped: Vec<String>,

    /// Renames, old name → new name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub renamed: BTreeMap<String, String>,

    /// Type changes, field name → new type.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub changed: BTreeMap<String, FieldType>,

    /// Defaults applied to rows missing the field, name → value.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub default: BTreeMap<String, Value>,
}

impl Migration {
    /// Whether this migration carries no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.dropped.is_empty()
            && self.renamed.is_empty()
            && self.changed.is_empty()
            && self.default.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
