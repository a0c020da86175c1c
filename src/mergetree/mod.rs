//! The MergeTree engine — per-namespace JSONL mutation log, in-memory
//! projection, schema evolution, and compaction into columnar blobs with
//! shard sets.

pub mod compact;
pub mod engine;
pub mod line;
pub mod store;

pub use compact::{build_hash_index, data_path, index_dir, schema_path, ColumnarBlob};
pub use engine::{classify, CompactionReport, MergeTree, MergeTreeError, MergeTreeOptions};
pub use line::{
    is_data_line, is_event_line, is_rel_line, is_schema_line, DataLine, DataOp, Line, RelLine,
    RelOp, SchemaLine, SchemaOp,
};
pub use store::EntityStore;
