//! The per-namespace MergeTree engine.
//!
//! Wraps one namespace's slice of the segment stream: appends mutation
//! lines through the shared event log, folds each successful append into
//! the in-memory projection, tracks schema evolution, and compacts the log
//! into a columnar blob plus per-field shard sets when the active segment
//! outgrows its thresholds.
//!
//! Two invariants the write path maintains:
//! - the projection never lags a successful append (fold happens after the
//!   line lands, before the call returns);
//! - a failed append changes nothing (no counters, no projection).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use loam_core::backend::{StorageBackend, StorageError};
use loam_core::model::{CollectionSchema, Entity, Migration, Namespace};

use crate::events::{EventLog, EventLogError, LogPosition};

use super::compact::{build_hash_index, data_path, index_dir, schema_path, ColumnarBlob};
use super::line::{DataLine, Line, RelLine, SchemaLine};
use super::store::EntityStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from MergeTree operations.
#[derive(Debug)]
pub enum MergeTreeError {
    /// A storage operation failed.
    Storage(StorageError),
    /// The shared log rejected a write.
    Log(EventLogError),
    /// (De)serialization failed.
    Serde(serde_json::Error),
    /// The line does not belong to this engine's namespace.
    WrongNamespace {
        engine: Namespace,
        line: String,
    },
    /// A schema line tried to move the version backwards (or sideways).
    SchemaRegression {
        current: u64,
        proposed: u64,
    },
}

impl fmt::Display for MergeTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "mergetree storage operation failed: {e}"),
            Self::Log(e) => write!(f, "mergetree log append failed: {e}"),
            Self::Serde(e) => write!(f, "mergetree (de)serialization failed: {e}"),
            Self::WrongNamespace { engine, line } => {
                write!(f, "line for '{line}' appended to engine for namespace '{engine}'")
            }
            Self::SchemaRegression { current, proposed } => {
                write!(
                    f,
                    "schema version must advance: current {current}, proposed {proposed}"
                )
            }
        }
    }
}

impl std::error::Error for MergeTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Log(e) => Some(e),
            Self::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for MergeTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<EventLogError> for MergeTreeError {
    fn from(e: EventLogError) -> Self {
        Self::Log(e)
    }
}

impl From<serde_json::Error> for MergeTreeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// Options / report
// ---------------------------------------------------------------------------

/// Compaction thresholds for the active segment.
#[derive(Clone, Debug)]
pub struct MergeTreeOptions {
    /// Compact once the active segment holds this many lines.
    pub compact_after_lines: u64,
    /// Compact once the active segment holds this many bytes.
    pub compact_after_bytes: u64,
}

impl Default for MergeTreeOptions {
    fn default() -> Self {
        Self {
            compact_after_lines: 10_000,
            compact_after_bytes: 8 * 1024 * 1024,
        }
    }
}

/// What a compaction produced.
#[derive(Clone, Debug)]
pub struct CompactionReport {
    /// Live rows written to the columnar blob.
    pub rows: u64,
    /// Fields that got a fresh shard set.
    pub indexed_fields: Vec<String>,
    /// Where the successor segment starts.
    pub boundary: LogPosition,
}

// ---------------------------------------------------------------------------
// MergeTree
// ---------------------------------------------------------------------------

struct SchemaState {
    current: CollectionSchema,
    // Migrations not yet baked into the columnar data, oldest first.
    pending: Vec<Migration>,
}

struct TreeState {
    store: EntityStore,
    schema: Option<SchemaState>,
    boundary: Option<LogPosition>,
}

/// One namespace's mutation-log engine.
pub struct MergeTree {
    storage: Arc<dyn StorageBackend>,
    log: Arc<EventLog>,
    ns: Namespace,
    opts: MergeTreeOptions,
    state: Mutex<TreeState>,
}

impl fmt::Debug for MergeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeTree").field("ns", &self.ns).finish_non_exhaustive()
    }
}

impl MergeTree {
    /// Open the engine for `ns`, rebuilding the projection from the
    /// compacted blob (if any) plus a replay of newer log lines.
    ///
    /// Each engine instance owns its own projection: two engines over the
    /// same backend stay consistent with *flushed* state, not with each
    /// other's buffers.
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        log: Arc<EventLog>,
        ns: Namespace,
        opts: MergeTreeOptions,
    ) -> Result<Self, MergeTreeError> {
        let mut store = EntityStore::new();
        let mut schema: Option<SchemaState> = None;
        let mut boundary: Option<LogPosition> = None;

        // Seed from the compacted blob.
        match storage.read(&data_path(&ns)) {
            Ok(bytes) => {
                let blob: ColumnarBlob = serde_json::from_slice(&bytes)?;
                for entity in blob.to_entities(&ns) {
                    store.seed(entity);
                }
                boundary = Some(blob.segment_boundary);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        // Current schema, if one was ever declared.
        match storage.read(&schema_path(&ns)) {
            Ok(bytes) => {
                schema = Some(SchemaState {
                    current: serde_json::from_slice(&bytes)?,
                    pending: Vec::new(),
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let engine = Self {
            storage,
            log,
            ns,
            opts,
            state: Mutex::new(TreeState {
                store,
                schema,
                boundary,
            }),
        };
        engine.replay()?;
        Ok(engine)
    }

    /// The namespace this engine serves.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Append a data line and fold it into the projection.
    ///
    /// # Errors
    /// `WrongNamespace` when the line's id is from another namespace; log
    /// failures leave the projection untouched.
    pub fn append_data(&self, line: DataLine) -> Result<(), MergeTreeError> {
        if *line.id.namespace() != self.ns {
            return Err(MergeTreeError::WrongNamespace {
                engine: self.ns.clone(),
                line: line.id.to_string(),
            });
        }
        self.log.append_raw_line(&self.ns, &Line::Data(line.clone()))?;
        self.lock().store.apply(&line);
        Ok(())
    }

    /// Append a rel line. Rel tuples do not touch the entity projection.
    ///
    /// # Errors
    /// Log failures.
    pub fn append_rel(&self, line: RelLine) -> Result<(), MergeTreeError> {
        self.log.append_raw_line(&self.ns, &Line::Rel(line))?;
        Ok(())
    }

    /// Append a schema line, advancing the declared schema.
    ///
    /// Versions only advance. The migration (if any) applies logically on
    /// read until the next compaction bakes it into the columnar data.
    ///
    /// # Errors
    /// `SchemaRegression` when the proposed version does not advance.
    pub fn append_schema(&self, line: SchemaLine) -> Result<(), MergeTreeError> {
        if line.ns != self.ns {
            return Err(MergeTreeError::WrongNamespace {
                engine: self.ns.clone(),
                line: line.ns.to_string(),
            });
        }
        {
            let state = self.lock();
            if let Some(schema) = &state.schema
                && line.schema.version <= schema.current.version
            {
                return Err(MergeTreeError::SchemaRegression {
                    current: schema.current.version,
                    proposed: line.schema.version,
                });
            }
        }
        self.log.append_raw_line(&self.ns, &Line::Schema(line.clone()))?;
        // Keep the working-tree schema file current for commits.
        self.storage
            .write_atomic(&schema_path(&self.ns), &serde_json::to_vec(&line.schema)?)?;
        let mut state = self.lock();
        let pending = line.migration.into_iter().filter(|m| !m.is_empty());
        match &mut state.schema {
            Some(schema) => {
                schema.current = line.schema;
                schema.pending.extend(pending);
            }
            None => {
                state.schema = Some(SchemaState {
                    current: line.schema,
                    pending: pending.collect(),
                });
            }
        }
        Ok(())
    }

    /// The materialized entity at `local`, with pending migrations applied
    /// on read. Deleted entities read as `None`.
    #[must_use]
    pub fn get(&self, local: &str) -> Option<Entity> {
        let state = self.lock();
        let entity = state.store.get(local)?;
        if entity.is_deleted() {
            return None;
        }
        Some(Self::materialize(&state, entity.clone()))
    }

    /// The entity at `local` even when deleted (tombstone reads).
    #[must_use]
    pub fn get_any(&self, local: &str) -> Option<Entity> {
        let state = self.lock();
        state.store.get(local).map(|e| Self::materialize(&state, e.clone()))
    }

    /// All live entities, migrations applied.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        let state = self.lock();
        state
            .store
            .live()
            .into_iter()
            .map(|e| Self::materialize(&state, e.clone()))
            .collect()
    }

    /// The declared schema, if any.
    #[must_use]
    pub fn schema(&self) -> Option<CollectionSchema> {
        self.lock().schema.as_ref().map(|s| s.current.clone())
    }

    /// Whether the active segment has outgrown a threshold.
    ///
    /// # Errors
    /// Sidecar read failures.
    pub fn needs_compaction(&self) -> Result<bool, MergeTreeError> {
        let (lines, bytes) = self.log.segment_stats(&self.ns)?;
        Ok(lines >= self.opts.compact_after_lines || bytes >= self.opts.compact_after_bytes)
    }

    /// Compact: rotate the segment, write the columnar blob and per-field
    /// shard sets, and atomically swap index manifests.
    ///
    /// The log keeps accepting writes into the successor segment the whole
    /// time. Write order is shards → blob → manifests, so any failure
    /// leaves the previous manifests (and a blob/boundary pair that is
    /// internally consistent) in place.
    ///
    /// # Errors
    /// Storage failures; on error the prior manifest generation survives.
    pub fn compact(&self) -> Result<CompactionReport, MergeTreeError> {
        let boundary = self.log.rotate_now(&self.ns)?;
        let (entities, schema_version, indexed_fields) = {
            let mut state = self.lock();
            let entities: Vec<Entity> = state
                .store
                .live()
                .into_iter()
                .map(|e| Self::materialize(&state, e.clone()))
                .collect();
            let (version, fields) = state.schema.as_ref().map_or((0, Vec::new()), |s| {
                (
                    s.current.version,
                    s.current
                        .fields
                        .iter()
                        .filter(|f| f.indexed)
                        .map(|f| f.name.clone())
                        .collect(),
                )
            });
            // Migrations are baked into the blob being written below.
            if let Some(schema) = &mut state.schema {
                schema.pending.clear();
            }
            (entities, version, fields)
        };

        // Shard sets first; their manifests last.
        let mut manifests = Vec::new();
        for field in &indexed_fields {
            let (shards, manifest) = build_hash_index(field, &entities);
            let dir = index_dir(field);
            for shard in shards {
                self.storage
                    .write(&format!("{dir}/{}", shard.file_name), &shard.bytes)?;
            }
            manifests.push((format!("{dir}/_manifest.json"), manifest));
        }

        let blob = ColumnarBlob::from_entities(&entities, boundary.clone(), schema_version);
        self.storage
            .write_atomic(&data_path(&self.ns), &serde_json::to_vec(&blob)?)?;

        for (path, manifest) in manifests {
            self.storage
                .write_atomic(&path, &serde_json::to_vec(&manifest)?)?;
        }

        self.lock().boundary = Some(boundary.clone());
        info!(ns = %self.ns, rows = blob.row_count, "compaction complete");
        Ok(CompactionReport {
            rows: blob.row_count,
            indexed_fields,
            boundary,
        })
    }

    // -- internals --

    /// Replay log lines newer than the blob boundary into the projection.
    fn replay(&self) -> Result<(), MergeTreeError> {
        let boundary = self.lock().boundary.clone();
        let lines = self.log.read_lines_from(&self.ns, boundary.as_ref())?;
        let mut replayed = 0usize;
        for value in lines {
            match serde_json::from_value::<Line>(value) {
                Ok(Line::Data(line)) => {
                    if *line.id.namespace() == self.ns {
                        self.lock().store.apply(&line);
                        replayed += 1;
                    }
                }
                Ok(Line::Schema(line)) => {
                    let mut state = self.lock();
                    let newer = state
                        .schema
                        .as_ref()
                        .is_none_or(|s| line.schema.version > s.current.version);
                    if newer && let Some(schema) = &mut state.schema {
                        schema.current = line.schema;
                        schema
                            .pending
                            .extend(line.migration.into_iter().filter(|m| !m.is_empty()));
                    } else if newer {
                        state.schema = Some(SchemaState {
                            current: line.schema,
                            pending: line.migration.into_iter().filter(|m| !m.is_empty()).collect(),
                        });
                    }
                }
                // Rel and event lines don't touch the projection; lines
                // that match no shape are another component's concern.
                Ok(Line::Rel(_) | Line::Event(_)) | Err(_) => {}
            }
        }
        if replayed > 0 {
            debug!(ns = %self.ns, lines = replayed, "projection replayed");
        }
        Ok(())
    }

    /// Apply pending migrations to an entity on read.
    fn materialize(state: &TreeState, mut entity: Entity) -> Entity {
        let Some(schema) = &state.schema else {
            return entity;
        };
        for migration in &schema.pending {
            for (old, new) in &migration.renamed {
                if let Some(value) = entity.fields.remove(old) {
                    entity.fields.entry(new.clone()).or_insert(value);
                }
            }
            for dropped in &migration.dropped {
                entity.fields.remove(dropped);
            }
            for (field, default) in &migration.default {
                entity
                    .fields
                    .entry(field.clone())
                    .or_insert_with(|| default.clone());
            }
            for field in &migration.added {
                if let Some(default) = &field.default {
                    entity
                        .fields
                        .entry(field.name.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }
        entity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Convenience: does this JSON value look like any mergetree line?
#[must_use]
pub fn classify(value: &Value) -> Option<&'static str> {
    use super::line::{is_data_line, is_event_line, is_rel_line, is_schema_line};
    if is_data_line(value) {
        Some("data")
    } else if is_rel_line(value) {
        Some("rel")
    } else if is_schema_line(value) {
        Some("schema")
    } else if is_event_line(value) {
        Some("event")
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::backend::MemoryBackend;
    use loam_core::model::{Document, EntityId, EventId, FieldDef, FieldType};
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::events::EventLogOptions;
    use crate::mergetree::line::{DataOp, SchemaOp};

    fn ns() -> Namespace {
        Namespace::new("posts").unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn setup() -> (Arc<MemoryBackend>, Arc<EventLog>, MergeTree) {
        let storage = Arc::new(MemoryBackend::new());
        let log = Arc::new(EventLog::new(storage.clone(), EventLogOptions::default()));
        let tree = MergeTree::open(
            storage.clone(),
            log.clone(),
            ns(),
            MergeTreeOptions::default(),
        )
        .unwrap();
        (storage, log, tree)
    }

    fn data(local: &str, op: DataOp, version: u64, ts: u64, fields: Value) -> DataLine {
        DataLine {
            id: EntityId::new(ns(), local).unwrap(),
            op,
            version,
            ts,
            fields: doc(fields),
        }
    }

    fn schema_line(version: u64, fields: Vec<FieldDef>, migration: Option<Migration>) -> SchemaLine {
        SchemaLine {
            id: EventId::generate(),
            ts: version * 10,
            op: SchemaOp::Schema,
            ns: ns(),
            schema: CollectionSchema {
                hash: format!("h{version}"),
                version,
                fields,
            },
            migration,
        }
    }

    // -- append / projection --

    #[test]
    fn projection_tracks_appends_immediately() {
        let (_s, _log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"title": "A"})))
            .unwrap();
        assert_eq!(tree.get("p1").unwrap().fields["title"], json!("A"));
        tree.append_data(data("p1", DataOp::Update, 2, 20, json!({"title": "B"})))
            .unwrap();
        assert_eq!(tree.get("p1").unwrap().fields["title"], json!("B"));
        tree.append_data(data("p1", DataOp::Delete, 3, 30, json!({}))).unwrap();
        assert!(tree.get("p1").is_none());
        assert!(tree.get_any("p1").unwrap().is_deleted());
    }

    #[test]
    fn wrong_namespace_is_rejected_without_side_effects() {
        let (_s, log, tree) = setup();
        let foreign = DataLine {
            id: EntityId::parse("users/u1").unwrap(),
            op: DataOp::Create,
            version: 1,
            ts: 10,
            fields: Document::new(),
        };
        assert!(matches!(
            tree.append_data(foreign),
            Err(MergeTreeError::WrongNamespace { .. })
        ));
        assert_eq!(log.segment_stats(&ns()).unwrap(), (0, 0));
    }

    #[test]
    fn lines_land_in_the_shared_segment_stream() {
        let (storage, _log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({}))).unwrap();
        tree.append_rel(RelLine {
            op: crate::mergetree::line::RelOp::Link,
            ts: 11,
            f: EntityId::new(ns(), "p1").unwrap(),
            p: "author".to_owned(),
            r: "posts".to_owned(),
            t: EntityId::parse("users/u1").unwrap(),
        })
        .unwrap();
        let content = storage.read("data/posts/events/seg-000001.jsonl").unwrap();
        assert_eq!(content.iter().filter(|&&b| b == b'\n').count(), 2);
    }

    // -- reopen / replay --

    #[test]
    fn fresh_engine_rebuilds_projection_from_log() {
        let (storage, log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"title": "A"})))
            .unwrap();
        tree.append_data(data("p1", DataOp::Update, 2, 20, json!({"views": 7})))
            .unwrap();
        drop(tree);

        let reopened =
            MergeTree::open(storage, log, ns(), MergeTreeOptions::default()).unwrap();
        let entity = reopened.get("p1").unwrap();
        assert_eq!(entity.fields["title"], json!("A"));
        assert_eq!(entity.fields["views"], json!(7));
        assert_eq!(entity.version, 2);
    }

    // -- schema evolution --

    #[test]
    fn schema_versions_only_advance() {
        let (_s, _log, tree) = setup();
        tree.append_schema(schema_line(1, vec![], None)).unwrap();
        tree.append_schema(schema_line(2, vec![], None)).unwrap();
        let err = tree.append_schema(schema_line(2, vec![], None)).unwrap_err();
        assert!(matches!(
            err,
            MergeTreeError::SchemaRegression { current: 2, proposed: 2 }
        ));
    }

    #[test]
    fn schema_append_updates_working_tree_file() {
        let (storage, _log, tree) = setup();
        tree.append_schema(schema_line(1, vec![FieldDef::optional("title", FieldType::String)], None))
            .unwrap();
        let schema: CollectionSchema =
            serde_json::from_slice(&storage.read("data/posts/schema.json").unwrap()).unwrap();
        assert_eq!(schema.version, 1);
    }

    #[test]
    fn pending_migration_applies_on_read_until_compaction() {
        let (_s, _log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"body": "text"})))
            .unwrap();
        let mut renamed = BTreeMap::new();
        renamed.insert("body".to_owned(), "content".to_owned());
        let mut default = BTreeMap::new();
        default.insert("status".to_owned(), json!("draft"));
        tree.append_schema(schema_line(
            1,
            vec![FieldDef::optional("content", FieldType::String)],
            Some(Migration {
                renamed,
                default,
                ..Migration::default()
            }),
        ))
        .unwrap();

        let entity = tree.get("p1").unwrap();
        assert_eq!(entity.fields["content"], json!("text"), "rename applied on read");
        assert!(!entity.fields.contains_key("body"));
        assert_eq!(entity.fields["status"], json!("draft"), "default applied on read");
    }

    // -- compaction --

    #[test]
    fn compaction_writes_blob_and_rotates_segment() {
        let (storage, log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"title": "A"})))
            .unwrap();
        tree.append_data(data("p2", DataOp::Create, 1, 11, json!({"title": "B"})))
            .unwrap();
        tree.append_data(data("p2", DataOp::Delete, 2, 12, json!({}))).unwrap();

        let report = tree.compact().unwrap();
        assert_eq!(report.rows, 1, "tombstones stay out of the blob");
        assert_eq!(report.boundary.segment_id, "seg-000002");

        let blob: ColumnarBlob =
            serde_json::from_slice(&storage.read("data/posts/data.parquet").unwrap()).unwrap();
        assert_eq!(blob.ids, vec!["p1"]);

        // New writes land in the successor segment.
        tree.append_data(data("p3", DataOp::Create, 1, 20, json!({}))).unwrap();
        assert_eq!(log.segment_stats(&ns()).unwrap().0, 1);
    }

    #[test]
    fn compaction_builds_shards_for_indexed_fields() {
        let (storage, _log, tree) = setup();
        tree.append_schema(schema_line(
            1,
            vec![FieldDef {
                indexed: true,
                ..FieldDef::optional("status", FieldType::String)
            }],
            None,
        ))
        .unwrap();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"status": "published"})))
            .unwrap();
        tree.append_data(data("p2", DataOp::Create, 1, 11, json!({"status": "draft"})))
            .unwrap();

        let report = tree.compact().unwrap();
        assert_eq!(report.indexed_fields, vec!["status"]);
        assert!(storage
            .exists("indexes/secondary/status/_manifest.json")
            .unwrap());
        assert!(storage
            .exists("indexes/secondary/status/published.shard.idx")
            .unwrap());

        // And the index actually answers.
        let idx = crate::index::ShardedIndex::new(storage, "indexes/secondary/status");
        let postings = idx.lookup(&json!("published")).unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].doc_id, "p1");
    }

    #[test]
    fn compaction_survives_reopen() {
        let (storage, log, tree) = setup();
        tree.append_data(data("p1", DataOp::Create, 1, 10, json!({"title": "A"})))
            .unwrap();
        tree.compact().unwrap();
        tree.append_data(data("p1", DataOp::Update, 2, 20, json!({"title": "B"})))
            .unwrap();
        drop(tree);

        let reopened =
            MergeTree::open(storage, log, ns(), MergeTreeOptions::default()).unwrap();
        let entity = reopened.get("p1").unwrap();
        assert_eq!(entity.fields["title"], json!("B"), "blob seed plus log replay");
        assert_eq!(entity.version, 2);
    }

    #[test]
    fn needs_compaction_tracks_thresholds() {
        let storage = Arc::new(MemoryBackend::new());
        let log = Arc::new(EventLog::new(storage.clone(), EventLogOptions::default()));
        let tree = MergeTree::open(
            storage,
            log,
            ns(),
            MergeTreeOptions {
                compact_after_lines: 2,
                compact_after_bytes: u64::MAX,
            },
        )
        .unwrap();
        assert!(!tree.needs_compaction().unwrap());
        tree.append_data(data("p1", DataOp::Create, 1, 1, json!({}))).unwrap();
        tree.append_data(data("p2", DataOp::Create, 1, 2, json!({}))).unwrap();
        assert!(tree.needs_compaction().unwrap());
    }
}
