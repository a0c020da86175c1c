//! Namespace-partitioned event log with auto-snapshots.
//!
//! Events buffer in memory per target and reach disk on `flush()` — one
//! JSONL segment per namespace under `data/<ns>/events/`, summarized by the
//! `data/event-meta.json` sidecar. Reads go to storage, not the buffer, so
//! two instances sharing a backend observe the same persisted events.
//!
//! Reconstruction folds an entity's events in `(ts, id)` order, starting
//! from `data/<ns>/snapshots/<id>.json` when one exists and replaying only
//! newer events. When the replayed tail outgrows `auto_snapshot_threshold`,
//! reconstruction writes a fresh snapshot (atomically) and records its
//! cursor in the sidecar.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use loam_core::backend::{StorageBackend, StorageError};
use loam_core::clock;
use loam_core::jsonl::{JsonlError, JsonlWriter};
use loam_core::model::id::ValidationError;
use loam_core::model::{Entity, EntityId, Event, EventId, Namespace};

use super::fold;

/// Sidecar path summarizing all event segments.
pub const EVENT_META_PATH: &str = "data/event-meta.json";

fn segment_path(ns: &Namespace, segment_id: &str) -> String {
    format!("data/{ns}/events/{segment_id}.jsonl")
}

fn snapshot_path(ns: &Namespace, eid: &str) -> String {
    format!("data/{ns}/snapshots/{eid}.json")
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from event-log operations.
#[derive(Debug)]
pub enum EventLogError {
    /// A storage operation failed.
    Storage(StorageError),
    /// A segment write failed.
    Jsonl(JsonlError),
    /// An event or snapshot failed to (de)serialize.
    Serde(serde_json::Error),
    /// An event carried an invalid target id.
    InvalidTarget(ValidationError),
}

impl fmt::Display for EventLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "event log storage operation failed: {e}"),
            Self::Jsonl(e) => write!(f, "event segment write failed: {e}"),
            Self::Serde(e) => write!(f, "event (de)serialization failed: {e}"),
            Self::InvalidTarget(e) => write!(f, "event target rejected: {e}"),
        }
    }
}

impl std::error::Error for EventLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Jsonl(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::InvalidTarget(e) => Some(e),
        }
    }
}

impl From<StorageError> for EventLogError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<JsonlError> for EventLogError {
    fn from(e: JsonlError) -> Self {
        Self::Jsonl(e)
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

// ---------------------------------------------------------------------------
// Metadata sidecar
// ---------------------------------------------------------------------------

/// One segment as the sidecar records it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment id (file stem).
    pub id: String,
    /// Lines in the segment.
    #[serde(rename = "lineCount")]
    pub line_count: u64,
    /// Bytes in the segment.
    #[serde(rename = "byteCount")]
    pub byte_count: u64,
}

/// A position in a namespace's event log: segment + line offset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    /// The active segment id.
    #[serde(rename = "segmentId")]
    pub segment_id: String,
    /// Line offset within the segment.
    pub offset: u64,
}

/// The cursor a snapshot was taken at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCursor {
    /// Timestamp of the last folded event.
    #[serde(rename = "lastTs")]
    pub last_ts: u64,
    /// Id of the last folded event.
    #[serde(rename = "lastEventId")]
    pub last_event_id: EventId,
}

/// The `data/event-meta.json` body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLogMeta {
    /// Segments per namespace, oldest first.
    #[serde(default)]
    pub segments: BTreeMap<String, Vec<SegmentInfo>>,
    /// Snapshot cursors per target (`ns:id`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub snapshots: BTreeMap<String, SnapshotCursor>,
    /// Last sidecar update, ms since epoch.
    #[serde(rename = "updatedAt", default)]
    pub updated_at: u64,
}

/// A persisted per-entity snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// The folded state.
    pub entity: Entity,
    /// The cursor the fold stopped at.
    #[serde(flatten)]
    pub cursor: SnapshotCursor,
    /// Events folded into this snapshot (all-time).
    #[serde(rename = "eventCount")]
    pub event_count: u64,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Event log tuning.
#[derive(Clone, Debug)]
pub struct EventLogOptions {
    /// Write a fresh snapshot when this many events replay past the last
    /// one. `None` disables auto-snapshots.
    pub auto_snapshot_threshold: Option<u64>,
    /// Rotate a namespace's segment once it holds this many bytes.
    pub segment_max_bytes: u64,
}

impl Default for EventLogOptions {
    fn default() -> Self {
        Self {
            auto_snapshot_threshold: Some(100),
            segment_max_bytes: 4 * 1024 * 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

struct LogState {
    // Buffered events per target, append order.
    buffer: BTreeMap<String, Vec<Event>>,
    buffered_count: usize,
    // Active segment writer per namespace.
    writers: BTreeMap<Namespace, JsonlWriter>,
    meta: EventLogMeta,
    meta_loaded: bool,
}

/// The append-only, namespace-partitioned event log.
pub struct EventLog {
    storage: Arc<dyn StorageBackend>,
    opts: EventLogOptions,
    state: Mutex<LogState>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}

impl EventLog {
    /// Create a log over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, opts: EventLogOptions) -> Self {
        Self {
            storage,
            opts,
            state: Mutex::new(LogState {
                buffer: BTreeMap::new(),
                buffered_count: 0,
                writers: BTreeMap::new(),
                meta: EventLogMeta::default(),
                meta_loaded: false,
            }),
        }
    }

    /// Buffer an event. Durable only after [`flush`](Self::flush).
    ///
    /// # Errors
    /// `InvalidTarget` when the target does not form a valid entity id.
    pub fn append_event(&self, event: Event) -> Result<(), EventLogError> {
        // Validate now so the fold never meets a malformed target.
        EntityId::new(event.target.ns.clone(), &event.target.eid)
            .map_err(EventLogError::InvalidTarget)?;
        let mut state = self.lock();
        state
            .buffer
            .entry(event.target.to_string())
            .or_default()
            .push(event);
        state.buffered_count += 1;
        Ok(())
    }

    /// Number of buffered (not yet durable) events.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.lock().buffered_count
    }

    /// Drain the buffer into per-namespace segments and update the sidecar.
    ///
    /// Events land in `(ts, id)` order per namespace. Rotates segments that
    /// outgrew `segment_max_bytes`.
    ///
    /// # Errors
    /// Storage and serialization failures; on error the buffer retains any
    /// events not yet written.
    pub fn flush(&self) -> Result<(), EventLogError> {
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        if state.buffered_count == 0 {
            return Ok(());
        }

        // Group the buffer by namespace, then order by (ts, id).
        let mut by_ns: BTreeMap<Namespace, Vec<Event>> = BTreeMap::new();
        for events in std::mem::take(&mut state.buffer).into_values() {
            for event in events {
                by_ns.entry(event.target.ns.clone()).or_default().push(event);
            }
        }
        state.buffered_count = 0;

        for (ns, mut events) in by_ns {
            events.sort_by_key(Event::order_key);
            self.ensure_writer(&mut state, &ns)?;
            let writer = state
                .writers
                .get(&ns)
                .unwrap_or_else(|| unreachable!("writer inserted above"));
            writer.append_batch(&events)?;
            let (line_count, byte_count, path) =
                (writer.line_count(), writer.byte_count(), writer.path().to_owned());
            debug!(ns = %ns, events = events.len(), path, "events flushed");
            Self::record_segment(&mut state.meta, &ns, line_count, byte_count);
            if byte_count >= self.opts.segment_max_bytes {
                self.rotate_segment(&mut state, &ns)?;
            }
        }
        self.save_meta(&mut state)
    }

    /// All persisted events targeting `<ns>:<eid>`, in `(ts, id)` order.
    ///
    /// Reads storage, not the buffer: a parallel instance sharing the
    /// backend sees exactly what has been flushed.
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn get_entity_events(&self, ns: &Namespace, eid: &str) -> Result<Vec<Event>, EventLogError> {
        let prefix = format!("data/{ns}/events/");
        let listing = self
            .storage
            .list(&prefix, &loam_core::backend::ListOptions::default())?;
        let mut events = Vec::new();
        for path in listing.files {
            let bytes = match self.storage.read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            for line in bytes.split(|&b| b == b'\n') {
                if line.is_empty() {
                    continue;
                }
                // Segments carry data/rel/schema lines alongside event
                // lines; only event lines parse as `Event`.
                let Ok(event) = serde_json::from_slice::<Event>(line) else {
                    continue;
                };
                if event.target.ns == *ns && event.target.eid == eid {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(Event::order_key);
        Ok(events)
    }

    /// Reconstruct an entity from its snapshot (if any) plus newer events.
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn reconstruct_entity(
        &self,
        ns: &Namespace,
        eid: &str,
    ) -> Result<Option<Entity>, EventLogError> {
        let events = self.get_entity_events(ns, eid)?;
        let snapshot = self.read_snapshot(ns, eid)?;

        let (start_state, tail, prior_count) = match snapshot {
            Some(snap) => {
                let cursor = (snap.cursor.last_ts, snap.cursor.last_event_id);
                let tail: Vec<Event> = events
                    .into_iter()
                    .filter(|e| e.order_key() > cursor)
                    .collect();
                (Some(snap.entity), tail, snap.event_count)
            }
            None => (None, events, 0),
        };

        let replayed = tail.len() as u64;
        let last = tail.last().map(|e| (e.ts, e.id));
        let entity = fold::fold_events(start_state, &tail);

        if let (Some(threshold), Some(entity), Some((last_ts, last_event_id))) =
            (self.opts.auto_snapshot_threshold, entity.as_ref(), last)
            && replayed > threshold
        {
            self.write_snapshot(
                ns,
                eid,
                &EntitySnapshot {
                    entity: entity.clone(),
                    cursor: SnapshotCursor {
                        last_ts,
                        last_event_id,
                    },
                    event_count: prior_count + replayed,
                },
            )?;
        }

        Ok(entity)
    }

    /// The current log position for a namespace (for commit trees).
    ///
    /// # Errors
    /// Storage failures from the sidecar read.
    pub fn position(&self, ns: &Namespace) -> Result<LogPosition, EventLogError> {
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        let segments = state.meta.segments.get(ns.as_str());
        Ok(segments.and_then(|s| s.last()).map_or_else(
            || LogPosition {
                segment_id: first_segment_id(),
                offset: 0,
            },
            |last| LogPosition {
                segment_id: last.id.clone(),
                offset: last.line_count,
            },
        ))
    }

    /// Append one non-event line (data / rel / schema) straight to the
    /// namespace's active segment.
    ///
    /// The MergeTree engine writes its mutation lines through here so the
    /// segment stream stays a single totally-ordered log. Unlike events,
    /// raw lines are not buffered — the caller sequences them itself.
    ///
    /// # Errors
    /// Storage and serialization failures.
    pub fn append_raw_line<T: serde::Serialize>(
        &self,
        ns: &Namespace,
        line: &T,
    ) -> Result<(), EventLogError> {
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        self.ensure_writer(&mut state, ns)?;
        let writer = state
            .writers
            .get(ns)
            .unwrap_or_else(|| unreachable!("writer inserted above"));
        writer.append(line)?;
        let (line_count, byte_count) = (writer.line_count(), writer.byte_count());
        Self::record_segment(&mut state.meta, ns, line_count, byte_count);
        if byte_count >= self.opts.segment_max_bytes {
            self.rotate_segment(&mut state, ns)?;
        }
        self.save_meta(&mut state)
    }

    /// Lines and bytes in the namespace's active segment.
    ///
    /// # Errors
    /// Storage failures from the sidecar read.
    pub fn segment_stats(&self, ns: &Namespace) -> Result<(u64, u64), EventLogError> {
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        Ok(state
            .meta
            .segments
            .get(ns.as_str())
            .and_then(|s| s.last())
            .map_or((0, 0), |s| (s.line_count, s.byte_count)))
    }

    /// Force-rotate the namespace's segment; returns the position the new
    /// segment starts at (the compaction boundary).
    ///
    /// # Errors
    /// Storage failures.
    pub fn rotate_now(&self, ns: &Namespace) -> Result<LogPosition, EventLogError> {
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        self.rotate_segment(&mut state, ns)?;
        self.save_meta(&mut state)?;
        let segment_id = state
            .meta
            .segments
            .get(ns.as_str())
            .and_then(|s| s.last())
            .map_or_else(first_segment_id, |s| s.id.clone());
        Ok(LogPosition {
            segment_id,
            offset: 0,
        })
    }

    /// Read every raw line of every segment for `ns`, oldest first, as JSON
    /// values, starting from `from` (segments before it are skipped, and
    /// `from.offset` lines are skipped within its segment).
    ///
    /// # Errors
    /// Storage and deserialization failures.
    pub fn read_lines_from(
        &self,
        ns: &Namespace,
        from: Option<&LogPosition>,
    ) -> Result<Vec<serde_json::Value>, EventLogError> {
        let prefix = format!("data/{ns}/events/");
        let listing = self
            .storage
            .list(&prefix, &loam_core::backend::ListOptions::default())?;
        let mut out = Vec::new();
        for path in listing.files {
            let Some(segment_id) = path
                .strip_prefix(&prefix)
                .and_then(|f| f.strip_suffix(".jsonl"))
            else {
                continue;
            };
            let (skip, include) = match from {
                Some(from) => {
                    if segment_id < from.segment_id.as_str() {
                        (0, false)
                    } else if segment_id == from.segment_id {
                        (from.offset as usize, true)
                    } else {
                        (0, true)
                    }
                }
                None => (0, true),
            };
            if !include {
                continue;
            }
            let bytes = match self.storage.read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            for line in bytes
                .split(|&b| b == b'\n')
                .filter(|l| !l.is_empty())
                .skip(skip)
            {
                out.push(serde_json::from_slice(line)?);
            }
        }
        Ok(out)
    }

    // -- internals --

    fn read_snapshot(
        &self,
        ns: &Namespace,
        eid: &str,
    ) -> Result<Option<EntitySnapshot>, EventLogError> {
        match self.storage.read(&snapshot_path(ns, eid)) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(snap) => Ok(Some(snap)),
                Err(e) => {
                    // A corrupt snapshot only costs a longer replay.
                    warn!(ns = %ns, eid, error = %e, "ignoring corrupt snapshot");
                    Ok(None)
                }
            },
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_snapshot(
        &self,
        ns: &Namespace,
        eid: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<(), EventLogError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.storage.write_atomic(&snapshot_path(ns, eid), &bytes)?;
        let mut state = self.lock();
        self.load_meta(&mut state)?;
        let target = format!("{ns}:{eid}");
        state.meta.snapshots.insert(target, snapshot.cursor.clone());
        self.save_meta(&mut state)?;
        debug!(ns = %ns, eid, events = snapshot.event_count, "snapshot written");
        Ok(())
    }

    fn ensure_writer(&self, state: &mut LogState, ns: &Namespace) -> Result<(), EventLogError> {
        if state.writers.contains_key(ns) {
            return Ok(());
        }
        let segment_id = state
            .meta
            .segments
            .get(ns.as_str())
            .and_then(|s| s.last())
            .map_or_else(first_segment_id, |last| last.id.clone());
        let writer = JsonlWriter::open(self.storage.clone(), segment_path(ns, &segment_id))?;
        state.writers.insert(ns.clone(), writer);
        Ok(())
    }

    fn rotate_segment(&self, state: &mut LogState, ns: &Namespace) -> Result<(), EventLogError> {
        let current = state
            .meta
            .segments
            .get(ns.as_str())
            .and_then(|s| s.last())
            .map_or_else(first_segment_id, |last| last.id.clone());
        let next = next_segment_id(&current);
        let writer = JsonlWriter::open(self.storage.clone(), segment_path(ns, &next))?;
        state.writers.insert(ns.clone(), writer);
        state
            .meta
            .segments
            .entry(ns.as_str().to_owned())
            .or_default()
            .push(SegmentInfo {
                id: next.clone(),
                line_count: 0,
                byte_count: 0,
            });
        debug!(ns = %ns, segment = next, "segment rotated");
        Ok(())
    }

    fn record_segment(meta: &mut EventLogMeta, ns: &Namespace, line_count: u64, byte_count: u64) {
        let segments = meta.segments.entry(ns.as_str().to_owned()).or_default();
        match segments.last_mut() {
            Some(last) => {
                last.line_count = line_count;
                last.byte_count = byte_count;
            }
            None => segments.push(SegmentInfo {
                id: first_segment_id(),
                line_count,
                byte_count,
            }),
        }
    }

    fn load_meta(&self, state: &mut LogState) -> Result<(), EventLogError> {
        if state.meta_loaded {
            return Ok(());
        }
        state.meta = match self.storage.read(EVENT_META_PATH) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.is_not_found() => EventLogMeta::default(),
            Err(e) => return Err(e.into()),
        };
        state.meta_loaded = true;
        Ok(())
    }

    fn save_meta(&self, state: &mut LogState) -> Result<(), EventLogError> {
        state.meta.updated_at = clock::now_ms();
        let bytes = serde_json::to_vec(&state.meta)?;
        self.storage.write_atomic(EVENT_META_PATH, &bytes)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn first_segment_id() -> String {
    "seg-000001".to_owned()
}

fn next_segment_id(current: &str) -> String {
    let n = current
        .strip_prefix("seg-")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    format!("seg-{:06}", n + 1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
