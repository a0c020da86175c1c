//! Compaction output: the columnar data blob and per-field shard sets.
//!
//! The columnar container is a self-describing column-major JSON document
//! at the working-tree path `data/<ns>/data.parquet`. The commit layer
//! only ever hashes its bytes, so the container format is private to this
//! module and [`MergeTree::open`](super::MergeTree).
//!
//! System fields ride in `$`-prefixed columns; user fields each get their
//! own column with `null` holes for rows that lack the field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use loam_core::model::{Document, Entity, EntityId, Namespace};

use crate::events::LogPosition;
use crate::index::manifest::{
    IndexManifest, IndexType, ShardDescriptor, ShardPartition, ShardingMode,
};
use crate::index::shard::{encode_v3, Posting};
use crate::index::sharded::normalize_shard_name;

/// The working-tree columnar data path for a namespace.
#[must_use]
pub fn data_path(ns: &Namespace) -> String {
    format!("data/{ns}/data.parquet")
}

/// The working-tree schema path for a namespace.
#[must_use]
pub fn schema_path(ns: &Namespace) -> String {
    format!("data/{ns}/schema.json")
}

/// The directory of a field's secondary index.
#[must_use]
pub fn index_dir(field: &str) -> String {
    format!("indexes/secondary/{field}")
}

// ---------------------------------------------------------------------------
// ColumnarBlob
// ---------------------------------------------------------------------------

/// Column-major snapshot of a namespace's live entities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarBlob {
    /// Rows in the blob.
    pub row_count: u64,
    /// Local entity ids, row order.
    pub ids: Vec<String>,
    /// Columns by name; `$`-prefixed names are system columns.
    pub columns: BTreeMap<String, Vec<Value>>,
    /// Where the successor log segment starts — replay resumes here.
    pub segment_boundary: LogPosition,
    /// The schema version the rows were written under.
    pub schema_version: u64,
}

impl ColumnarBlob {
    /// Build a blob from live entities (row order = input order).
    #[must_use]
    pub fn from_entities(
        entities: &[Entity],
        segment_boundary: LogPosition,
        schema_version: u64,
    ) -> Self {
        let mut ids = Vec::with_capacity(entities.len());
        let mut columns: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut field_names: Vec<String> = Vec::new();
        for entity in entities {
            for key in entity.fields.keys() {
                if !field_names.iter().any(|f| f == key) {
                    field_names.push(key.clone());
                }
            }
        }
        field_names.sort_unstable();

        for (row, entity) in entities.iter().enumerate() {
            ids.push(entity.id.local().to_owned());
            push_column(&mut columns, "$type", row, Value::String(entity.entity_type.clone()));
            push_column(&mut columns, "$v", row, entity.version.into());
            push_column(&mut columns, "$createdAt", row, entity.created_at.into());
            push_column(&mut columns, "$updatedAt", row, entity.updated_at.into());
            push_column(
                &mut columns,
                "$createdBy",
                row,
                entity.created_by.clone().map_or(Value::Null, Value::String),
            );
            push_column(
                &mut columns,
                "$updatedBy",
                row,
                entity.updated_by.clone().map_or(Value::Null, Value::String),
            );
            for field in &field_names {
                let value = entity.fields.get(field).cloned().unwrap_or(Value::Null);
                push_column(&mut columns, field, row, value);
            }
        }

        Self {
            row_count: entities.len() as u64,
            ids,
            columns,
            segment_boundary,
            schema_version,
        }
    }

    /// Rebuild entities from the columns (inverse of
    /// [`from_entities`](Self::from_entities) up to `null` holes).
    #[must_use]
    pub fn to_entities(&self, ns: &Namespace) -> Vec<Entity> {
        let mut out = Vec::with_capacity(self.ids.len());
        for (row, local) in self.ids.iter().enumerate() {
            let Ok(id) = EntityId::new(ns.clone(), local) else {
                continue;
            };
            let mut fields = Document::new();
            for (name, column) in &self.columns {
                if name.starts_with('$') {
                    continue;
                }
                match column.get(row) {
                    None | Some(Value::Null) => {}
                    Some(value) => {
                        fields.insert(name.clone(), value.clone());
                    }
                }
            }
            out.push(Entity {
                id,
                entity_type: self
                    .cell(row, "$type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                version: self.cell(row, "$v").and_then(Value::as_u64).unwrap_or(0),
                created_at: self.cell(row, "$createdAt").and_then(Value::as_u64).unwrap_or(0),
                updated_at: self.cell(row, "$updatedAt").and_then(Value::as_u64).unwrap_or(0),
                created_by: self
                    .cell(row, "$createdBy")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                updated_by: self
                    .cell(row, "$updatedBy")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                deleted_at: None,
                fields,
            });
        }
        out
    }

    fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        self.columns.get(column).and_then(|c| c.get(row))
    }
}

fn push_column(columns: &mut BTreeMap<String, Vec<Value>>, name: &str, row: usize, value: Value) {
    let column = columns.entry(name.to_owned()).or_default();
    // Backfill holes for rows appended before this column appeared.
    while column.len() < row {
        column.push(Value::Null);
    }
    column.push(value);
}

// ---------------------------------------------------------------------------
// Shard building
// ---------------------------------------------------------------------------

/// A shard file ready to be written: path relative to the index dir + bytes.
#[derive(Clone, Debug)]
pub struct BuiltShard {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Build a `by-value` hash shard set for one field over the blob's rows.
///
/// One v3 shard per distinct normalized value; entries point at
/// `(row_group 0, row_offset = row index)`.
#[must_use]
pub fn build_hash_index(field: &str, entities: &[Entity]) -> (Vec<BuiltShard>, IndexManifest) {
    let mut groups: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
    for (row, entity) in entities.iter().enumerate() {
        let Some(value) = entity.fields.get(field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let name = normalize_shard_name(value);
        if name.is_empty() {
            continue;
        }
        groups.entry(name).or_default().push(Posting {
            doc_id: entity.id.local().to_owned(),
            row_group: 0,
            row_offset: row as u32,
        });
    }

    let mut shards = Vec::new();
    let mut descriptors = Vec::new();
    let mut total = 0u64;
    for (name, postings) in groups {
        let bytes = encode_v3(None, &postings);
        let file_name = format!("{name}.shard.idx");
        descriptors.push(ShardDescriptor {
            name: name.clone(),
            path: file_name.clone(),
            entry_count: postings.len() as u64,
            size_bytes: bytes.len() as u64,
            partition: ShardPartition::Value { value: name },
        });
        total += postings.len() as u64;
        shards.push(BuiltShard { file_name, bytes });
    }

    let manifest = IndexManifest {
        version: 1,
        index_type: IndexType::Hash,
        field: field.to_owned(),
        sharding: ShardingMode::ByValue,
        shards: descriptors,
        total_entries: total,
        row_groups: 1,
        compact: Some(true),
    };
    (shards, manifest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
