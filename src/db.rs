//! The database facade — the write path the document API consumes.
//!
//! Wires the per-namespace MergeTree engines, the shared event log, the
//! relationship store, and the streaming engine together:
//!
//! ```text
//! create/update/delete
//!   → DataLine / RelLine into the MergeTree (projection updates in step)
//!   → CREATE/UPDATE/DELETE/REL_* event into the event log (durable on flush)
//!   → event published to the streaming engine (MV fan-out)
//! ```
//!
//! `update` patches may carry `_ops` (`$inc`/`$dec`/`$add`/`$remove`) for
//! commutative merges, and `$link`/`$unlink` arrays that become
//! relationship tuples.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use loam_core::backend::{StorageBackend, StorageError};
use loam_core::clock;
use loam_core::model::id::ValidationError;
use loam_core::model::{
    Document, Entity, EntityId, Event, EventId, EventPayload, Namespace, PatchOps, Target,
};

use crate::events::{EventLog, EventLogError, EventLogOptions};
use crate::mergetree::line::{DataLine, DataOp, RelLine, RelOp};
use crate::mergetree::{MergeTree, MergeTreeError, MergeTreeOptions};
use crate::rels::{RelError, RelStore, RelTuple};
use crate::streaming::{MvHandler, StreamingEngine, StreamingOptions};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from facade operations.
#[derive(Debug)]
pub enum DbError {
    /// The database was disposed; no further operations are accepted.
    Disposed,
    /// The target entity does not exist.
    EntityNotFound { id: String },
    /// A storage operation failed.
    Storage(StorageError),
    /// The event log rejected an operation.
    Events(EventLogError),
    /// A MergeTree engine rejected an operation.
    Tree(MergeTreeError),
    /// The relationship store rejected an operation.
    Rels(RelError),
    /// Bad input (namespace, id, or patch shape).
    Validation(ValidationError),
    /// A patch sub-document failed to parse.
    BadPatch { reason: String },
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disposed => write!(f, "database is disposed"),
            Self::EntityNotFound { id } => write!(f, "entity '{id}' not found"),
            Self::Storage(e) => write!(f, "{e}"),
            Self::Events(e) => write!(f, "{e}"),
            Self::Tree(e) => write!(f, "{e}"),
            Self::Rels(e) => write!(f, "{e}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::BadPatch { reason } => write!(f, "invalid patch: {reason}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Events(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Rels(e) => Some(e),
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for DbError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<EventLogError> for DbError {
    fn from(e: EventLogError) -> Self {
        Self::Events(e)
    }
}

impl From<MergeTreeError> for DbError {
    fn from(e: MergeTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<RelError> for DbError {
    fn from(e: RelError) -> Self {
        Self::Rels(e)
    }
}

impl From<ValidationError> for DbError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Facade configuration.
#[derive(Clone, Debug, Default)]
pub struct DatabaseOptions {
    /// Actor recorded on events, when known.
    pub actor: Option<String>,
    /// Event log tuning.
    pub events: EventLogOptions,
    /// MergeTree compaction thresholds.
    pub mergetree: MergeTreeOptions,
    /// Streaming batch tuning.
    pub streaming: StreamingOptions,
}

/// One `$link` / `$unlink` entry in a patch.
#[derive(Clone, Debug, Deserialize)]
struct LinkSpec {
    p: String,
    #[serde(default)]
    r: Option<String>,
    t: EntityId,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// The embedded database facade.
pub struct Database {
    storage: Arc<dyn StorageBackend>,
    log: Arc<EventLog>,
    streaming: StreamingEngine,
    rels: RelStore,
    opts: DatabaseOptions,
    trees: Mutex<BTreeMap<Namespace, Arc<MergeTree>>>,
    id_gen: Mutex<ulid::Generator>,
    disposed: Mutex<bool>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database over `storage`.
    #[must_use]
    pub fn open(storage: Arc<dyn StorageBackend>, opts: DatabaseOptions) -> Self {
        let log = Arc::new(EventLog::new(storage.clone(), opts.events.clone()));
        Self {
            streaming: StreamingEngine::new(opts.streaming),
            rels: RelStore::new(storage.clone()),
            log,
            storage,
            opts,
            trees: Mutex::new(BTreeMap::new()),
            id_gen: Mutex::new(ulid::Generator::new()),
            disposed: Mutex::new(false),
        }
    }

    /// The shared event log.
    #[must_use]
    pub const fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// The streaming engine (register MV handlers here).
    #[must_use]
    pub const fn streaming(&self) -> &StreamingEngine {
        &self.streaming
    }

    /// Register a materialized-view handler.
    pub fn register_view(&self, handler: Box<dyn MvHandler>) {
        self.streaming.register(handler);
    }

    /// Create a document; assigns `$id = <ns>/<ulid>`.
    ///
    /// # Errors
    /// Validation and append failures.
    pub fn create(&self, ns: &Namespace, doc: Document) -> Result<Entity, DbError> {
        self.check_open()?;
        let local = self.next_id();
        let id = EntityId::new(ns.clone(), &local)?;
        let ts = clock::now_ms();

        let tree = self.tree(ns)?;
        tree.append_data(DataLine {
            id: id.clone(),
            op: DataOp::Create,
            version: 1,
            ts,
            fields: doc.clone(),
        })?;

        let event = Event {
            id: EventId::generate(),
            ts,
            target: Target::new(ns.clone(), &local),
            actor: self.opts.actor.clone(),
            meta: None,
            payload: EventPayload::Create { after: doc },
        };
        self.log.append_event(event.clone())?;
        self.streaming.publish(&[event]);

        debug!(id = %id, "created");
        tree.get(&local).ok_or(DbError::EntityNotFound { id: id.to_string() })
    }

    /// Apply a patch. Plain fields shallow-merge; `_ops` carries
    /// commutative operators; `$link`/`$unlink` manage relationships.
    ///
    /// # Errors
    /// `EntityNotFound` when the target does not exist (or is deleted).
    pub fn update(&self, ns: &Namespace, local: &str, patch: Document) -> Result<Entity, DbError> {
        self.check_open()?;
        let id = EntityId::new(ns.clone(), local)?;
        let tree = self.tree(ns)?;
        let before = tree.get(local).ok_or(DbError::EntityNotFound { id: id.to_string() })?;
        let ts = clock::now_ms();

        let (sets, ops, links, unlinks) = split_patch(patch)?;

        // Ops materialize into the data line so the projection and the
        // columnar log see concrete values; the event keeps the symbolic
        // ops for merge.
        let mut data_fields = sets.clone();
        if let Some(ops) = &ops {
            let mut scratch = before.fields.clone();
            crate::events::apply_ops(&mut scratch, ops);
            for field in ops.touched_fields() {
                if let Some(value) = scratch.get(field) {
                    data_fields.insert(field.to_owned(), value.clone());
                }
            }
        }

        let version = before.version + 1;
        tree.append_data(DataLine {
            id: id.clone(),
            op: DataOp::Update,
            version,
            ts,
            fields: data_fields,
        })?;

        let mut events = vec![Event {
            id: EventId::generate(),
            ts,
            target: Target::new(ns.clone(), local),
            actor: self.opts.actor.clone(),
            meta: None,
            payload: EventPayload::Update {
                before: Some(before.fields.clone()),
                after: sets,
                ops,
            },
        }];

        for link in links {
            events.push(self.apply_link(&tree, &id, &link, ts, true)?);
        }
        for unlink in unlinks {
            events.push(self.apply_link(&tree, &id, &unlink, ts, false)?);
        }

        for event in &events {
            self.log.append_event(event.clone())?;
        }
        self.streaming.publish(&events);

        tree.get(local).ok_or(DbError::EntityNotFound { id: id.to_string() })
    }

    /// Delete a document. Idempotent on already-deleted entities.
    ///
    /// # Errors
    /// `EntityNotFound` when the entity never existed.
    pub fn delete(&self, ns: &Namespace, local: &str) -> Result<(), DbError> {
        self.check_open()?;
        let id = EntityId::new(ns.clone(), local)?;
        let tree = self.tree(ns)?;
        let before = tree
            .get_any(local)
            .ok_or(DbError::EntityNotFound { id: id.to_string() })?;
        if before.is_deleted() {
            return Ok(());
        }
        let ts = clock::now_ms();

        tree.append_data(DataLine {
            id,
            op: DataOp::Delete,
            version: before.version + 1,
            ts,
            fields: Document::new(),
        })?;

        let event = Event {
            id: EventId::generate(),
            ts,
            target: Target::new(ns.clone(), local),
            actor: self.opts.actor.clone(),
            meta: None,
            payload: EventPayload::Delete {
                before: Some(before.fields),
            },
        };
        self.log.append_event(event.clone())?;
        self.streaming.publish(&[event]);
        Ok(())
    }

    /// The live entity at `<ns>/<local>`, if any.
    ///
    /// # Errors
    /// Validation and engine failures.
    pub fn get(&self, ns: &Namespace, local: &str) -> Result<Option<Entity>, DbError> {
        self.check_open()?;
        Ok(self.tree(ns)?.get(local))
    }

    /// One-hop outbound relationships of an entity.
    ///
    /// # Errors
    /// Storage failures.
    pub fn get_related(
        &self,
        id: &EntityId,
        predicate: Option<&str>,
    ) -> Result<Vec<RelTuple>, DbError> {
        self.check_open()?;
        Ok(self.rels.related(id, predicate)?)
    }

    /// Durably flush all writers, fan out pending batches, and compact any
    /// namespace whose segment outgrew its thresholds.
    ///
    /// # Errors
    /// Flush and compaction failures.
    pub fn flush(&self) -> Result<(), DbError> {
        self.check_open()?;
        self.log.flush()?;
        self.streaming.flush();
        let trees: Vec<Arc<MergeTree>> = self.lock_trees().values().cloned().collect();
        for tree in trees {
            if tree.needs_compaction()? {
                tree.compact()?;
            }
        }
        Ok(())
    }

    /// Flush, then shut the facade down. Idempotent; operations after
    /// dispose fail with [`DbError::Disposed`].
    ///
    /// # Errors
    /// Flush failures.
    pub fn dispose(&self) -> Result<(), DbError> {
        {
            let disposed = self.disposed.lock().unwrap_or_else(PoisonError::into_inner);
            if *disposed {
                return Ok(());
            }
        }
        self.flush()?;
        self.streaming.dispose();
        *self.disposed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }

    // -- internals --

    fn apply_link(
        &self,
        tree: &MergeTree,
        from: &EntityId,
        spec: &LinkSpec,
        ts: u64,
        create: bool,
    ) -> Result<Event, DbError> {
        let reverse = spec.r.clone().unwrap_or_else(|| spec.p.clone());
        let line = RelLine {
            op: if create { RelOp::Link } else { RelOp::Unlink },
            ts,
            f: from.clone(),
            p: spec.p.clone(),
            r: reverse.clone(),
            t: spec.t.clone(),
        };
        tree.append_rel(line.clone())?;
        if create {
            self.rels.link(&line)?;
        } else {
            self.rels.unlink(&line)?;
        }
        let payload = if create {
            EventPayload::RelCreate {
                f: from.clone(),
                p: spec.p.clone(),
                r: reverse,
                t: spec.t.clone(),
            }
        } else {
            EventPayload::RelDelete {
                f: from.clone(),
                p: spec.p.clone(),
                r: reverse,
                t: spec.t.clone(),
            }
        };
        Ok(Event {
            id: EventId::generate(),
            ts,
            target: Target::new(from.namespace().clone(), from.local()),
            actor: self.opts.actor.clone(),
            meta: None,
            payload,
        })
    }

    fn tree(&self, ns: &Namespace) -> Result<Arc<MergeTree>, DbError> {
        if let Some(tree) = self.lock_trees().get(ns) {
            return Ok(tree.clone());
        }
        let tree = Arc::new(MergeTree::open(
            self.storage.clone(),
            self.log.clone(),
            ns.clone(),
            self.opts.mergetree.clone(),
        )?);
        self.lock_trees().insert(ns.clone(), tree.clone());
        Ok(tree)
    }

    fn next_id(&self) -> String {
        let mut id_gen = self.id_gen.lock().unwrap_or_else(PoisonError::into_inner);
        id_gen.generate()
            .unwrap_or_else(|_| ulid::Ulid::new())
            .to_string()
    }

    fn check_open(&self) -> Result<(), DbError> {
        if *self.disposed.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(DbError::Disposed);
        }
        Ok(())
    }

    fn lock_trees(&self) -> std::sync::MutexGuard<'_, BTreeMap<Namespace, Arc<MergeTree>>> {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Split a patch into plain sets, ops, links, and unlinks.
fn split_patch(
    mut patch: Document,
) -> Result<(Document, Option<PatchOps>, Vec<LinkSpec>, Vec<LinkSpec>), DbError> {
    let ops = match patch.remove("_ops") {
        Some(value) => {
            let ops: PatchOps = serde_json::from_value(value).map_err(|e| DbError::BadPatch {
                reason: format!("_ops: {e}"),
            })?;
            if ops.is_empty() { None } else { Some(ops) }
        }
        None => None,
    };
    let links = parse_links(patch.remove("$link"))?;
    let unlinks = parse_links(patch.remove("$unlink"))?;
    patch.retain(|k, _| !k.starts_with('$') || k == "$type");
    Ok((patch, ops, links, unlinks))
}

fn parse_links(value: Option<Value>) -> Result<Vec<LinkSpec>, DbError> {
    match value {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| DbError::BadPatch {
            reason: format!("$link/$unlink: {e}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::backend::MemoryBackend;
    use serde_json::json;

    fn ns(s: &str) -> Namespace {
        Namespace::new(s).unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn db() -> (Arc<MemoryBackend>, Database) {
        let storage = Arc::new(MemoryBackend::new());
        let database = Database::open(storage.clone(), DatabaseOptions::default());
        (storage, database)
    }

    // -- create --

    #[test]
    fn create_assigns_namespaced_ulid() {
        let (_s, database) = db();
        let entity = database
            .create(&ns("posts"), doc(json!({"$type": "Post", "title": "Hello"})))
            .unwrap();
        assert_eq!(entity.id.namespace().as_str(), "posts");
        assert_eq!(entity.id.local().len(), 26, "ULID local id");
        assert_eq!(entity.entity_type, "Post");
        assert_eq!(entity.version, 1);
        assert_eq!(entity.fields["title"], json!("Hello"));
    }

    #[test]
    fn create_emits_event_visible_after_flush() {
        let (_s, database) = db();
        let entity = database.create(&ns("posts"), doc(json!({"title": "x"}))).unwrap();
        database.flush().unwrap();
        let events = database
            .event_log()
            .get_entity_events(&ns("posts"), entity.id.local())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.op_name(), "CREATE");
    }

    #[test]
    fn created_ids_are_unique_and_time_ordered() {
        let (_s, database) = db();
        let a = database.create(&ns("posts"), Document::new()).unwrap();
        let b = database.create(&ns("posts"), Document::new()).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.id.local() < b.id.local(), "ULIDs are monotonic");
    }

    // -- update --

    #[test]
    fn update_merges_and_bumps_version() {
        let (_s, database) = db();
        let entity = database
            .create(&ns("posts"), doc(json!({"title": "Old", "views": 1})))
            .unwrap();
        let updated = database
            .update(&ns("posts"), entity.id.local(), doc(json!({"title": "New"})))
            .unwrap();
        assert_eq!(updated.fields["title"], json!("New"));
        assert_eq!(updated.fields["views"], json!(1));
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn update_with_inc_materializes_and_keeps_symbolic_ops() {
        let (_s, database) = db();
        let entity = database
            .create(&ns("posts"), doc(json!({"views": 10})))
            .unwrap();
        let updated = database
            .update(
                &ns("posts"),
                entity.id.local(),
                doc(json!({"_ops": {"$inc": {"views": 5}}})),
            )
            .unwrap();
        assert_eq!(updated.fields["views"], json!(15));

        database.flush().unwrap();
        let events = database
            .event_log()
            .get_entity_events(&ns("posts"), entity.id.local())
            .unwrap();
        let update_event = &events[1];
        match &update_event.payload {
            EventPayload::Update { ops, after, .. } => {
                assert!(after.is_empty(), "sets stay symbolic-free for pure ops");
                assert_eq!(ops.as_ref().unwrap().inc["views"], 5.0);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn update_missing_entity_is_not_found() {
        let (_s, database) = db();
        assert!(matches!(
            database.update(&ns("posts"), "missing", Document::new()),
            Err(DbError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn bad_ops_shape_is_rejected() {
        let (_s, database) = db();
        let entity = database.create(&ns("posts"), Document::new()).unwrap();
        assert!(matches!(
            database.update(
                &ns("posts"),
                entity.id.local(),
                doc(json!({"_ops": {"$inc": "not a map"}})),
            ),
            Err(DbError::BadPatch { .. })
        ));
    }

    // -- links --

    #[test]
    fn link_creates_tuples_and_rel_events() {
        let (_s, database) = db();
        let author = database.create(&ns("users"), doc(json!({"name": "Ann"}))).unwrap();
        let post = database.create(&ns("posts"), doc(json!({"title": "Hi"}))).unwrap();

        database
            .update(
                &ns("posts"),
                post.id.local(),
                doc(json!({
                    "$link": [{"p": "author", "r": "posts", "t": author.id.to_string()}]
                })),
            )
            .unwrap();

        let related = database.get_related(&post.id, Some("author")).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].t, author.id);

        database.flush().unwrap();
        let events = database
            .event_log()
            .get_entity_events(&ns("posts"), post.id.local())
            .unwrap();
        assert!(events.iter().any(|e| e.payload.op_name() == "REL_CREATE"));
    }

    #[test]
    fn unlink_removes_tuples() {
        let (_s, database) = db();
        let author = database.create(&ns("users"), Document::new()).unwrap();
        let post = database.create(&ns("posts"), Document::new()).unwrap();
        let link = json!({"p": "author", "r": "posts", "t": author.id.to_string()});
        database
            .update(&ns("posts"), post.id.local(), doc(json!({"$link": [link.clone()]})))
            .unwrap();
        database
            .update(&ns("posts"), post.id.local(), doc(json!({"$unlink": [link]})))
            .unwrap();
        assert!(database.get_related(&post.id, None).unwrap().is_empty());
    }

    // -- delete --

    #[test]
    fn delete_tombstones_and_is_idempotent() {
        let (_s, database) = db();
        let entity = database.create(&ns("posts"), doc(json!({"title": "x"}))).unwrap();
        database.delete(&ns("posts"), entity.id.local()).unwrap();
        assert!(database.get(&ns("posts"), entity.id.local()).unwrap().is_none());
        // Second delete is a no-op.
        database.delete(&ns("posts"), entity.id.local()).unwrap();
    }

    #[test]
    fn delete_of_unknown_entity_errors() {
        let (_s, database) = db();
        assert!(matches!(
            database.delete(&ns("posts"), "ghost"),
            Err(DbError::EntityNotFound { .. })
        ));
    }

    // -- reconstruction equivalence --

    #[test]
    fn projection_and_event_fold_agree() {
        let (_s, database) = db();
        let entity = database
            .create(&ns("posts"), doc(json!({"title": "Original", "views": 0})))
            .unwrap();
        database
            .update(&ns("posts"), entity.id.local(), doc(json!({"title": "Updated"})))
            .unwrap();
        database
            .update(
                &ns("posts"),
                entity.id.local(),
                doc(json!({"_ops": {"$inc": {"views": 3}}})),
            )
            .unwrap();
        database.flush().unwrap();

        let projected = database.get(&ns("posts"), entity.id.local()).unwrap().unwrap();
        let reconstructed = database
            .event_log()
            .reconstruct_entity(&ns("posts"), entity.id.local())
            .unwrap()
            .unwrap();
        assert_eq!(projected.fields, reconstructed.fields);
        assert_eq!(projected.version, reconstructed.version);
    }

    // -- streaming integration --

    #[test]
    fn writes_fan_out_to_registered_views() {
        use crate::streaming::MvHandler;
        use std::sync::Mutex as StdMutex;

        struct Counter {
            seen: Arc<StdMutex<Vec<String>>>,
        }
        impl MvHandler for Counter {
            fn name(&self) -> &str {
                "counter"
            }
            fn source_namespaces(&self) -> Vec<Namespace> {
                vec![Namespace::new("posts").unwrap()]
            }
            fn process(&mut self, events: &[Event]) -> Result<(), String> {
                let mut seen = self.seen.lock().unwrap();
                for event in events {
                    seen.push(event.payload.op_name().to_owned());
                }
                Ok(())
            }
        }

        let storage = Arc::new(MemoryBackend::new());
        let database = Database::open(
            storage,
            DatabaseOptions {
                streaming: StreamingOptions {
                    batch_size: 1,
                    batch_timeout_ms: 60_000,
                },
                ..DatabaseOptions::default()
            },
        );
        let seen = Arc::new(StdMutex::new(Vec::new()));
        database.register_view(Box::new(Counter { seen: seen.clone() }));

        let entity = database.create(&ns("posts"), Document::new()).unwrap();
        database.delete(&ns("posts"), entity.id.local()).unwrap();
        // Users events don't reach the posts view.
        database.create(&ns("users"), Document::new()).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["CREATE", "DELETE"]);
    }

    // -- dispose --

    #[test]
    fn dispose_is_idempotent_and_blocks_writes() {
        let (_s, database) = db();
        database.create(&ns("posts"), Document::new()).unwrap();
        database.dispose().unwrap();
        database.dispose().unwrap();
        assert!(matches!(
            database.create(&ns("posts"), Document::new()),
            Err(DbError::Disposed)
        ));
    }

    // -- compaction through flush --

    #[test]
    fn flush_compacts_when_thresholds_hit() {
        let storage = Arc::new(MemoryBackend::new());
        let database = Database::open(
            storage.clone(),
            DatabaseOptions {
                mergetree: MergeTreeOptions {
                    compact_after_lines: 2,
                    compact_after_bytes: u64::MAX,
                },
                ..DatabaseOptions::default()
            },
        );
        database.create(&ns("posts"), doc(json!({"a": 1}))).unwrap();
        database.create(&ns("posts"), doc(json!({"a": 2}))).unwrap();
        database.flush().unwrap();
        assert!(storage.exists("data/posts/data.parquet").unwrap());
    }
}
