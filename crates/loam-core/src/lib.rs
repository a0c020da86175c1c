//! loam-core — storage foundation for the loam database.
//!
//! This crate holds the pieces everything else is built on: the polymorphic
//! [`backend::StorageBackend`] contract with optimistic concurrency, the
//! append-only [`jsonl::JsonlWriter`], the content-addressed
//! [`objects::ObjectStore`], the TTL-bounded [`lock::LockManager`], and the
//! core model types (ids, entities, events, schema snapshots).
//!
//! Engine-level concerns (indexes, the MergeTree, version control, merge,
//! streaming) live in the root `loam` crate.

pub mod backend;
pub mod clock;
pub mod jsonl;
pub mod lock;
pub mod model;
pub mod objects;

pub use backend::{StorageBackend, StorageError};
pub use model::Document;
