//! Sharded hash / range index with lazy shard loading.
//!
//! `load()` reads only the manifest; shard files are opened on first access
//! and cached. A missing or corrupt manifest degrades to an empty index
//! (`ready`, not sharded, size 0) — a missing *shard file* referenced by a
//! valid manifest likewise degrades to empty lookups. Only an unsupported
//! shard format is a hard error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use loam_core::backend::{StorageBackend, StorageError};

use super::manifest::{
    key_from_json, IndexManifest, IndexType, ShardDescriptor, ShardPartition, ShardingMode,
    MANIFEST_FILE,
};
use super::shard::{self, DecodedShard, Posting, ShardEntry, ShardError, ShardKey};

// ---------------------------------------------------------------------------
// IndexError
// ---------------------------------------------------------------------------

/// Errors from index lookups.
#[derive(Debug)]
pub enum IndexError {
    /// A shard file failed to decode.
    Shard(ShardError),
    /// A storage operation failed.
    Storage(StorageError),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shard(e) => write!(f, "shard decode failed: {e}"),
            Self::Storage(e) => write!(f, "index storage operation failed: {e}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Shard(e) => Some(e),
            Self::Storage(e) => Some(e),
        }
    }
}

impl From<ShardError> for IndexError {
    fn from(e: ShardError) -> Self {
        Self::Shard(e)
    }
}

impl From<StorageError> for IndexError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// RangePredicate
// ---------------------------------------------------------------------------

/// A composable range predicate: each bound independently optional.
#[derive(Clone, Debug, Default)]
pub struct RangePredicate {
    /// Strictly greater than.
    pub gt: Option<Value>,
    /// Greater than or equal.
    pub gte: Option<Value>,
    /// Strictly less than.
    pub lt: Option<Value>,
    /// Less than or equal.
    pub lte: Option<Value>,
}

impl RangePredicate {
    /// Effective lower bound as `(key, inclusive)`. `gte` wins over `gt`
    /// when both are given and equal; otherwise the tighter bound wins.
    #[must_use]
    pub fn lower(&self) -> Option<(ShardKey, bool)> {
        let gt = self.gt.as_ref().and_then(key_from_json).map(|k| (k, false));
        let gte = self.gte.as_ref().and_then(key_from_json).map(|k| (k, true));
        match (gt, gte) {
            (Some((a, ai)), Some((b, bi))) => {
                if a > b { Some((a, ai)) } else { Some((b, bi)) }
            }
            (bound, None) | (None, bound) => bound,
        }
    }

    /// Effective upper bound as `(key, inclusive)`.
    #[must_use]
    pub fn upper(&self) -> Option<(ShardKey, bool)> {
        let lt = self.lt.as_ref().and_then(key_from_json).map(|k| (k, false));
        let lte = self.lte.as_ref().and_then(key_from_json).map(|k| (k, true));
        match (lt, lte) {
            (Some((a, ai)), Some((b, bi))) => {
                if a < b { Some((a, ai)) } else { Some((b, bi)) }
            }
            (bound, None) | (None, bound) => bound,
        }
    }

    /// Whether `key` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, key: &ShardKey) -> bool {
        if let Some((lower, inclusive)) = self.lower() {
            if *key < lower || (!inclusive && *key == lower) {
                return false;
            }
        }
        if let Some((upper, inclusive)) = self.upper() {
            if *key > upper || (!inclusive && *key == upper) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a value to a `by-value` shard name: lowercase ASCII, runs of
/// non-alphanumerics collapsed to a single `-`, leading/trailing `-`
/// trimmed.
#[must_use]
pub fn normalize_shard_name(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Manifest-only statistics — no shard I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexStats {
    /// Total entries across all shards.
    pub entry_count: u64,
    /// Distinct keys (hash indexes: one per shard).
    pub unique_keys: Option<u64>,
    /// Levels (sorted indexes; this layout is always single-level).
    pub levels: Option<u32>,
    /// Total shard bytes.
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// ShardedIndex
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IndexState {
    loaded: bool,
    manifest: Option<IndexManifest>,
    // Shard name → decoded entries. Missing files cache as empty.
    cache: BTreeMap<String, Arc<Vec<ShardEntry>>>,
}

/// A lazy-loading sharded secondary index rooted at one directory.
pub struct ShardedIndex {
    storage: Arc<dyn StorageBackend>,
    dir: String,
    state: Mutex<IndexState>,
}

impl fmt::Debug for ShardedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedIndex").field("dir", &self.dir).finish_non_exhaustive()
    }
}

impl ShardedIndex {
    /// Create an index over `dir` (e.g. `indexes/secondary/status`).
    /// Nothing is read until [`load`](Self::load).
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, dir: impl Into<String>) -> Self {
        Self {
            storage,
            dir: dir.into(),
            state: Mutex::new(IndexState::default()),
        }
    }

    /// Read the manifest. Idempotent — subsequent calls do not re-read.
    ///
    /// A missing or unparsable manifest leaves the index ready but
    /// unsharded: lookups return empty, `min`/`max` return `None`.
    ///
    /// # Errors
    /// Storage failures other than `NotFound`.
    pub fn load(&self) -> Result<(), IndexError> {
        let mut state = self.lock();
        if state.loaded {
            return Ok(());
        }
        let path = format!("{}/{MANIFEST_FILE}", self.dir);
        state.manifest = match self.storage.read(&path) {
            Ok(bytes) => match serde_json::from_slice::<IndexManifest>(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!(path, error = %e, "corrupt index manifest; treating index as empty");
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        state.loaded = true;
        Ok(())
    }

    /// Whether [`load`](Self::load) has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.lock().loaded
    }

    /// Whether a usable manifest was found.
    #[must_use]
    pub fn is_sharded(&self) -> bool {
        self.lock().manifest.is_some()
    }

    /// Total entries per the manifest (0 when unsharded).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.lock().manifest.as_ref().map_or(0, |m| m.total_entries)
    }

    /// Drop all cached shards.
    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }

    /// How many shards are currently cached (observable for tests).
    #[must_use]
    pub fn loaded_shard_count(&self) -> usize {
        self.lock().cache.len()
    }

    /// Manifest-only statistics.
    ///
    /// # Errors
    /// Storage failures from the initial manifest read.
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        self.load()?;
        let state = self.lock();
        Ok(state.manifest.as_ref().map_or(
            IndexStats {
                entry_count: 0,
                unique_keys: None,
                levels: None,
                size_bytes: 0,
            },
            |m| IndexStats {
                entry_count: m.total_entries,
                unique_keys: (m.index_type == IndexType::Hash).then(|| m.shards.len() as u64),
                levels: (m.index_type == IndexType::Sst).then_some(1),
                size_bytes: m.shards.iter().map(|s| s.size_bytes).sum(),
            },
        ))
    }

    // -- lookups --

    /// Exact-value lookup. Loads at most one shard.
    ///
    /// # Errors
    /// Shard decode failures; storage failures.
    pub fn lookup(&self, value: &Value) -> Result<Vec<Posting>, IndexError> {
        self.load()?;
        let Some(key) = key_from_json(value) else {
            return Ok(Vec::new());
        };
        let Some((mode, descriptor)) = self.select_point_shard(value, &key) else {
            return Ok(Vec::new());
        };
        let entries = self.shard_entries(&descriptor)?;
        Ok(match mode {
            // Range shards are sorted: binary-search the equal run.
            ShardingMode::ByRange => equal_range(&entries, &key),
            // Value/prefix shards: filter by exact key.
            ShardingMode::ByValue | ShardingMode::ByPrefix => entries
                .iter()
                .filter(|e| e.key == key)
                .map(|e| e.posting.clone())
                .collect(),
        })
    }

    /// `$in` lookup: loads only the shards for the queried values.
    ///
    /// # Errors
    /// As [`lookup`](Self::lookup).
    pub fn lookup_in(&self, values: &[Value]) -> Result<Vec<Posting>, IndexError> {
        let mut out = Vec::new();
        for value in values {
            out.extend(self.lookup(value)?);
        }
        Ok(out)
    }

    /// Range lookup over a sorted (`by-range`) index.
    ///
    /// Loads exactly the shards whose intervals intersect the predicate;
    /// within each shard a binary search finds the matching run.
    ///
    /// # Errors
    /// As [`lookup`](Self::lookup).
    pub fn range(&self, predicate: &RangePredicate) -> Result<Vec<Posting>, IndexError> {
        self.load()?;
        let descriptors: Vec<ShardDescriptor> = {
            let state = self.lock();
            let Some(manifest) = &state.manifest else {
                return Ok(Vec::new());
            };
            if manifest.sharding != ShardingMode::ByRange {
                return Ok(Vec::new());
            }
            manifest
                .shards
                .iter()
                .filter(|d| shard_intersects(d, predicate))
                .cloned()
                .collect()
        };
        let mut out = Vec::new();
        for descriptor in descriptors {
            let entries = self.shard_entries(&descriptor)?;
            out.extend(matching_run(&entries, predicate));
        }
        Ok(out)
    }

    /// Smallest key — scans only the first non-empty shard of a sorted
    /// index. `None` for hash indexes and empty indexes.
    ///
    /// # Errors
    /// As [`lookup`](Self::lookup).
    pub fn min(&self) -> Result<Option<ShardKey>, IndexError> {
        self.edge_key(false)
    }

    /// Largest key — scans only the last non-empty shard of a sorted index.
    ///
    /// # Errors
    /// As [`lookup`](Self::lookup).
    pub fn max(&self) -> Result<Option<ShardKey>, IndexError> {
        self.edge_key(true)
    }

    // -- internals --

    fn edge_key(&self, last: bool) -> Result<Option<ShardKey>, IndexError> {
        self.load()?;
        let descriptor = {
            let state = self.lock();
            let Some(manifest) = &state.manifest else {
                return Ok(None);
            };
            if manifest.sharding != ShardingMode::ByRange {
                return Ok(None);
            }
            let mut non_empty = manifest.shards.iter().filter(|d| d.entry_count > 0);
            let found = if last { non_empty.next_back() } else { non_empty.next() };
            match found {
                Some(d) => d.clone(),
                None => return Ok(None),
            }
        };
        let entries = self.shard_entries(&descriptor)?;
        Ok(if last {
            entries.last().map(|e| e.key.clone())
        } else {
            entries.first().map(|e| e.key.clone())
        })
    }

    fn select_point_shard(
        &self,
        value: &Value,
        key: &ShardKey,
    ) -> Option<(ShardingMode, ShardDescriptor)> {
        let state = self.lock();
        let manifest = state.manifest.as_ref()?;
        let descriptor = match manifest.sharding {
            ShardingMode::ByValue => {
                let name = normalize_shard_name(value);
                manifest.shards.iter().find(|d| d.name == name)
            }
            ShardingMode::ByRange => manifest.shards.iter().find(|d| {
                d.range_bounds()
                    .is_some_and(|(start, end)| *key >= start && *key < end)
            }),
            ShardingMode::ByPrefix => {
                let raw = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                manifest.shards.iter().find(|d| match &d.partition {
                    ShardPartition::Prefix { prefix } => raw.starts_with(prefix.as_str()),
                    _ => false,
                })
            }
        };
        descriptor.map(|d| (manifest.sharding, d.clone()))
    }

    /// Load (or fetch from cache) a shard's entries, keyed form.
    ///
    /// v3 shards take their implicit key from the descriptor. A missing
    /// shard file caches as empty.
    fn shard_entries(&self, descriptor: &ShardDescriptor) -> Result<Arc<Vec<ShardEntry>>, IndexError> {
        if let Some(cached) = self.lock().cache.get(&descriptor.name) {
            return Ok(cached.clone());
        }
        let path = format!("{}/{}", self.dir, descriptor.path);
        let entries = match self.storage.read(&path) {
            Ok(bytes) => match shard::decode(&bytes)? {
                DecodedShard::Keyed(entries) => entries,
                DecodedShard::Postings { entries, .. } => {
                    let key = implicit_key(descriptor);
                    entries
                        .into_iter()
                        .map(|posting| ShardEntry {
                            key: key.clone(),
                            posting,
                        })
                        .collect()
                }
            },
            Err(e) if e.is_not_found() => {
                warn!(path, "shard file referenced by manifest is missing; treating as empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(shard = descriptor.name, entries = entries.len(), "shard loaded");
        let entries = Arc::new(entries);
        self.lock().cache.insert(descriptor.name.clone(), entries.clone());
        Ok(entries)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn implicit_key(descriptor: &ShardDescriptor) -> ShardKey {
    match &descriptor.partition {
        ShardPartition::Value { value } => ShardKey::Str(value.clone()),
        ShardPartition::Prefix { prefix } => ShardKey::Str(prefix.clone()),
        ShardPartition::Range { range_start, .. } => {
            key_from_json(range_start).unwrap_or_else(|| ShardKey::Str(descriptor.name.clone()))
        }
    }
}

fn shard_intersects(descriptor: &ShardDescriptor, predicate: &RangePredicate) -> bool {
    let Some((start, end)) = descriptor.range_bounds() else {
        return false;
    };
    // Shard covers [start, end). Empty intersection iff the predicate's
    // lower bound is at/past the shard end, or its upper bound is below
    // the shard start.
    if let Some((lower, _inclusive)) = predicate.lower()
        && lower >= end
    {
        return false;
    }
    if let Some((upper, inclusive)) = predicate.upper() {
        if upper < start || (!inclusive && upper == start) {
            return false;
        }
    }
    true
}

/// Binary-search the run of entries equal to `key` in a sorted shard.
fn equal_range(entries: &[ShardEntry], key: &ShardKey) -> Vec<Posting> {
    let start = entries.partition_point(|e| e.key < *key);
    let end = entries.partition_point(|e| e.key <= *key);
    entries[start..end].iter().map(|e| e.posting.clone()).collect()
}

/// Binary-search the run of entries matching `predicate` in a sorted shard.
fn matching_run(entries: &[ShardEntry], predicate: &RangePredicate) -> Vec<Posting> {
    let start = match predicate.lower() {
        Some((ref lower, inclusive)) => entries.partition_point(|e| {
            if inclusive { e.key < *lower } else { e.key <= *lower }
        }),
        None => 0,
    };
    let end = match predicate.upper() {
        Some((ref upper, inclusive)) => entries.partition_point(|e| {
            if inclusive { e.key <= *upper } else { e.key < *upper }
        }),
        None => entries.len(),
    };
    if start >= end {
        return Vec::new();
    }
    entries[start..end].iter().map(|e| e.posting.clone()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::backend::MemoryBackend;
    use serde_json::json;

    use crate::index::manifest::{IndexManifest, IndexType, ShardDescriptor, ShardPartition};
    use crate::index::shard::{encode_v2, encode_v3, Posting, ShardEntry, ShardKey};

    const DIR: &str = "indexes/secondary/field";

    fn posting(doc_id: &str) -> Posting {
        Posting {
            doc_id: doc_id.to_owned(),
            row_group: 0,
            row_offset: 0,
        }
    }

    fn write_manifest(storage: &MemoryBackend, manifest: &IndexManifest) {
        storage
            .write(
                &format!("{DIR}/_manifest.json"),
                &serde_json::to_vec(manifest).unwrap(),
            )
            .unwrap();
    }

    /// A hash index with one v3 shard per status value.
    fn hash_fixture(storage: &MemoryBackend) {
        let mut shards = Vec::new();
        for (value, docs) in [("published", vec!["p1", "p2"]), ("draft", vec!["p3"])] {
            let postings: Vec<Posting> = docs.iter().map(|d| posting(d)).collect();
            let bytes = encode_v3(None, &postings);
            let path = format!("{value}.shard.idx");
            storage.write(&format!("{DIR}/{path}"), &bytes).unwrap();
            shards.push(ShardDescriptor {
                name: value.to_owned(),
                path,
                entry_count: postings.len() as u64,
                size_bytes: bytes.len() as u64,
                partition: ShardPartition::Value {
                    value: value.to_owned(),
                },
            });
        }
        write_manifest(
            storage,
            &IndexManifest {
                version: 1,
                index_type: IndexType::Hash,
                field: "status".to_owned(),
                sharding: ShardingMode::ByValue,
                shards,
                total_entries: 3,
                row_groups: 1,
                compact: Some(true),
            },
        );
    }

    /// A range index with shards [0,100), [100,200), [200,300).
    fn range_fixture(storage: &MemoryBackend) {
        let mut shards = Vec::new();
        let mut total = 0u64;
        for (i, (start, end)) in [(0, 100), (100, 200), (200, 300)].iter().enumerate() {
            let entries: Vec<ShardEntry> = (*start..*end)
                .step_by(25)
                .map(|n| ShardEntry {
                    key: ShardKey::Num(f64::from(n)),
                    posting: posting(&format!("doc-{n}")),
                })
                .collect();
            total += entries.len() as u64;
            let bytes = encode_v2(&entries).unwrap();
            let path = format!("range-{i}.shard.idx");
            storage.write(&format!("{DIR}/{path}"), &bytes).unwrap();
            shards.push(ShardDescriptor {
                name: format!("range-{i}"),
                path,
                entry_count: entries.len() as u64,
                size_bytes: bytes.len() as u64,
                partition: ShardPartition::Range {
                    range_start: json!(start),
                    range_end: json!(end),
                },
            });
        }
        write_manifest(
            storage,
            &IndexManifest {
                version: 1,
                index_type: IndexType::Sst,
                field: "score".to_owned(),
                sharding: ShardingMode::ByRange,
                shards,
                total_entries: total,
                row_groups: 1,
                compact: None,
            },
        );
    }

    fn index(storage: Arc<MemoryBackend>) -> ShardedIndex {
        ShardedIndex::new(storage, DIR)
    }

    // -- degradation --

    #[test]
    fn missing_manifest_degrades_to_empty() {
        let storage = Arc::new(MemoryBackend::new());
        let idx = index(storage);
        idx.load().unwrap();
        assert!(idx.is_ready());
        assert!(!idx.is_sharded());
        assert_eq!(idx.size(), 0);
        assert!(idx.lookup(&json!("anything")).unwrap().is_empty());
        assert!(idx.min().unwrap().is_none());
        assert!(idx.max().unwrap().is_none());
    }

    #[test]
    fn corrupt_manifest_degrades_to_empty() {
        let storage = Arc::new(MemoryBackend::new());
        storage
            .write(&format!("{DIR}/_manifest.json"), b"{truncated")
            .unwrap();
        let idx = index(storage);
        idx.load().unwrap();
        assert!(idx.is_ready());
        assert!(!idx.is_sharded());
        assert!(idx.lookup(&json!(1)).unwrap().is_empty());
    }

    #[test]
    fn missing_shard_file_degrades_to_empty_lookup() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        storage.delete(&format!("{DIR}/published.shard.idx")).unwrap();
        let idx = index(storage);
        assert!(idx.lookup(&json!("published")).unwrap().is_empty());
        // The other shard still works.
        assert_eq!(idx.lookup(&json!("draft")).unwrap().len(), 1);
    }

    #[test]
    fn load_is_idempotent() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage.clone());
        idx.load().unwrap();
        // Replace the manifest after load: a second load must not re-read.
        storage
            .write(&format!("{DIR}/_manifest.json"), b"garbage")
            .unwrap();
        idx.load().unwrap();
        assert!(idx.is_sharded());
    }

    // -- hash lookups --

    #[test]
    fn hash_lookup_loads_exactly_one_shard() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        let postings = idx.lookup(&json!("published")).unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(idx.loaded_shard_count(), 1);
    }

    #[test]
    fn hash_lookup_normalizes_query_value() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        // "Published!" normalizes to the "published" shard name.
        let postings = idx.lookup(&json!("Published!")).unwrap();
        assert_eq!(postings.len(), 2);
    }

    #[test]
    fn lookup_in_loads_only_queried_shards() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        let postings = idx.lookup_in(&[json!("draft")]).unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(idx.loaded_shard_count(), 1);
    }

    #[test]
    fn unknown_value_is_empty_without_loading() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        assert!(idx.lookup(&json!("archived")).unwrap().is_empty());
        assert_eq!(idx.loaded_shard_count(), 0);
    }

    // -- range lookups --

    #[test]
    fn range_point_lookup_selects_single_shard() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        let postings = idx.lookup(&json!(150)).unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].doc_id, "doc-150");
        assert_eq!(idx.loaded_shard_count(), 1);
    }

    #[test]
    fn range_scan_loads_exactly_intersecting_shards() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        let postings = idx
            .range(&RangePredicate {
                gte: Some(json!(150)),
                lt: Some(json!(225)),
                ..RangePredicate::default()
            })
            .unwrap();
        let ids: Vec<&str> = postings.iter().map(|p| p.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-150", "doc-175", "doc-200"]);
        // Shards [100,200) and [200,300) — not [0,100).
        assert_eq!(idx.loaded_shard_count(), 2);
    }

    #[test]
    fn open_bounds_scan_everything() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        let postings = idx.range(&RangePredicate::default()).unwrap();
        assert_eq!(postings.len(), 12);
    }

    #[test]
    fn exclusive_bounds_respected() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        let postings = idx
            .range(&RangePredicate {
                gt: Some(json!(150)),
                lte: Some(json!(200)),
                ..RangePredicate::default()
            })
            .unwrap();
        let ids: Vec<&str> = postings.iter().map(|p| p.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-175", "doc-200"]);
    }

    #[test]
    fn empty_range_yields_nothing() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        let postings = idx
            .range(&RangePredicate {
                gte: Some(json!(150)),
                lt: Some(json!(150)),
                ..RangePredicate::default()
            })
            .unwrap();
        assert!(postings.is_empty());
    }

    // -- min / max / stats / cache --

    #[test]
    fn min_max_scan_edge_shards_only() {
        let storage = Arc::new(MemoryBackend::new());
        range_fixture(&storage);
        let idx = index(storage);
        assert_eq!(idx.min().unwrap(), Some(ShardKey::Num(0.0)));
        assert_eq!(idx.loaded_shard_count(), 1);
        assert_eq!(idx.max().unwrap(), Some(ShardKey::Num(275.0)));
        assert_eq!(idx.loaded_shard_count(), 2);
    }

    #[test]
    fn stats_come_from_manifest_alone() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        let stats = idx.stats().unwrap();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.unique_keys, Some(2));
        assert!(stats.size_bytes > 0);
        assert_eq!(idx.loaded_shard_count(), 0, "stats must not load shards");
    }

    #[test]
    fn clear_cache_drops_loaded_shards() {
        let storage = Arc::new(MemoryBackend::new());
        hash_fixture(&storage);
        let idx = index(storage);
        idx.lookup(&json!("published")).unwrap();
        assert_eq!(idx.loaded_shard_count(), 1);
        idx.clear_cache();
        assert_eq!(idx.loaded_shard_count(), 0);
        // Still answers correctly after a cache drop.
        assert_eq!(idx.lookup(&json!("published")).unwrap().len(), 2);
    }

    // -- normalization --

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_shard_name(&json!("Hello World")), "hello-world");
        assert_eq!(normalize_shard_name(&json!("  spaced  ")), "spaced");
        assert_eq!(normalize_shard_name(&json!("a--b__c")), "a-b-c");
        assert_eq!(normalize_shard_name(&json!("UPPER")), "upper");
        assert_eq!(normalize_shard_name(&json!(42.5)), "42-5");
        assert_eq!(normalize_shard_name(&json!("!!!")), "");
    }
}
