//! The event-sourced log.
//!
//! [`log::EventLog`] owns durability (per-namespace JSONL segments, the
//! metadata sidecar, per-entity snapshots); [`fold`] owns the pure
//! reconstruction fold the log replays through.

pub mod fold;
pub mod log;

pub use fold::{apply_ops, fold_events};
pub use log::{
    EntitySnapshot, EventLog, EventLogError, EventLogMeta, EventLogOptions, LogPosition,
    SegmentInfo, SnapshotCursor, EVENT_META_PATH,
};
