//! loam — an embedded, columnar, version-controlled document database.
//!
//! Entities live in namespaces; every mutation appends a line to a
//! per-namespace JSONL log which compacts into columnar blobs and sharded
//! secondary indexes. A git-like layer (content-addressed objects, commits,
//! refs, branches, three-way merge) versions the whole database, and a
//! streaming engine fans the event log out to materialized views.
//!
//! Storage primitives (backend contract, JSONL writer, object store,
//! locks) live in the `loam-core` crate; this crate holds the engines.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod index;
pub mod merge;
pub mod mergetree;
pub mod rels;
pub mod streaming;
pub mod telemetry;
pub mod vcs;

pub use db::{Database, DatabaseOptions, DbError};
pub use error::LoamError;

// Re-export the storage foundation so embedders need one import.
pub use loam_core::backend::{LocalBackend, MemoryBackend, StorageBackend, StorageError};
pub use loam_core::model::{Document, Entity, EntityId, Event, Namespace};
