//! Sharded secondary indexes.
//!
//! Three layers: the binary shard codecs ([`shard`]), the JSON manifest
//! sidecar ([`manifest`]), and the lazy-loading index over both
//! ([`sharded`]). Full-text and vector indexes plug into the same shard
//! framework but live outside this crate.

pub mod distance;
pub mod manifest;
pub mod shard;
pub mod sharded;

pub use distance::cosine_distance;
pub use manifest::{IndexManifest, IndexType, ShardDescriptor, ShardPartition, ShardingMode};
pub use shard::{DecodedShard, Posting, ShardEntry, ShardError, ShardKey};
pub use sharded::{IndexError, IndexStats, RangePredicate, ShardedIndex};
