//! Secondary-index manifest — the `_manifest.json` sidecar.
//!
//! A sharded index is a directory of shard files described by one manifest.
//! The manifest alone answers `stats()`; shard files are only opened on
//! lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::shard::ShardKey;

/// Manifest file name inside an index directory.
pub const MANIFEST_FILE: &str = "_manifest.json";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of index this is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Exact-match hash index.
    Hash,
    /// Sorted range index.
    Sst,
}

/// How entries are partitioned into shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardingMode {
    /// One shard per distinct value.
    ByValue,
    /// Shards cover key ranges `[rangeStart, rangeEnd)`.
    ByRange,
    /// Shards cover key prefixes.
    ByPrefix,
}

// ---------------------------------------------------------------------------
// ShardDescriptor
// ---------------------------------------------------------------------------

/// The partition a shard covers — exactly one of value, range, or prefix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardPartition {
    /// `by-value`: the shard pins this normalized value.
    Value {
        value: String,
    },
    /// `by-range`: the shard covers `[rangeStart, rangeEnd)`.
    Range {
        #[serde(rename = "rangeStart")]
        range_start: Value,
        #[serde(rename = "rangeEnd")]
        range_end: Value,
    },
    /// `by-prefix`: the shard covers keys with this prefix.
    Prefix {
        prefix: String,
    },
}

/// One shard file as the manifest describes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// Shard name (for `by-value`, the normalized value).
    pub name: String,
    /// File path relative to the index directory.
    pub path: String,
    /// Entries in the shard.
    #[serde(rename = "entryCount")]
    pub entry_count: u64,
    /// Shard file size in bytes.
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    /// The partition this shard covers.
    #[serde(flatten)]
    pub partition: ShardPartition,
}

impl ShardDescriptor {
    /// The range bounds as typed keys, for `by-range` shards.
    #[must_use]
    pub fn range_bounds(&self) -> Option<(ShardKey, ShardKey)> {
        match &self.partition {
            ShardPartition::Range {
                range_start,
                range_end,
            } => Some((key_from_json(range_start)?, key_from_json(range_end)?)),
            _ => None,
        }
    }
}

/// Convert a JSON value to a typed shard key (strings and numbers only).
#[must_use]
pub fn key_from_json(value: &Value) -> Option<ShardKey> {
    match value {
        Value::String(s) => Some(ShardKey::Str(s.clone())),
        Value::Number(n) => n.as_f64().map(ShardKey::Num),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// IndexManifest
// ---------------------------------------------------------------------------

/// The `_manifest.json` body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Manifest format version.
    pub version: u32,
    /// Hash or sorted.
    #[serde(rename = "type")]
    pub index_type: IndexType,
    /// The indexed field.
    pub field: String,
    /// Partitioning scheme.
    pub sharding: ShardingMode,
    /// Shard files, in partition order for `by-range`.
    pub shards: Vec<ShardDescriptor>,
    /// Total entries across all shards.
    #[serde(rename = "totalEntries")]
    pub total_entries: u64,
    /// Row groups in the columnar data this index points into.
    #[serde(rename = "rowGroups")]
    pub row_groups: u32,
    /// Whether shards use the compact (v3) encoding.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compact: Option<bool>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
