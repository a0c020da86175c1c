//! Content-addressed object store.
//!
//! Immutable blobs keyed by the SHA-256 of their contents, stored at
//! `_objects/<hh>/<rest>`. Writing the same bytes twice produces the same
//! hash and a single stored file; concurrent stores of identical bytes both
//! succeed because losing the create-only race means the winner wrote the
//! exact same content.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::backend::{Precondition, StorageBackend, StorageError};
use crate::model::ObjectHash;

/// Prefix all object files live under.
pub const OBJECTS_PREFIX: &str = "_objects";

/// The storage path for an object hash: `_objects/<hh>/<rest>`.
#[must_use]
pub fn object_path(hash: &ObjectHash) -> String {
    format!("{OBJECTS_PREFIX}/{}/{}", hash.prefix(), hash.rest())
}

/// Compute the object hash of `bytes` without storing anything.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> ObjectHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hex = format!("{:x}", hasher.finalize());
    // A sha256 digest is always 64 lowercase hex chars; the constructor
    // cannot fail on it.
    ObjectHash::new(&hex).unwrap_or_else(|_| unreachable!("sha256 hex is always valid"))
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Content-addressed blob storage over a [`StorageBackend`].
#[derive(Clone)]
pub struct ObjectStore {
    storage: Arc<dyn StorageBackend>,
}

impl ObjectStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Store `bytes`, returning their hash. Idempotent.
    ///
    /// # Errors
    /// Propagates backend failures other than the benign lost-creation race.
    pub fn store(&self, bytes: &[u8]) -> Result<ObjectHash, StorageError> {
        let hash = hash_bytes(bytes);
        let path = object_path(&hash);
        if self.storage.exists(&path)? {
            trace!(hash = %hash, "object already stored");
            return Ok(hash);
        }
        match self.storage.write_conditional(&path, bytes, &Precondition::Absent) {
            Ok(_) => Ok(hash),
            // Lost a race to an identical write: same hash, same bytes.
            Err(e) if e.is_already_exists() => Ok(hash),
            Err(e) => Err(e),
        }
    }

    /// Load the bytes for `hash`.
    ///
    /// # Errors
    /// `NotFound` if no object with this hash is stored.
    pub fn load(&self, hash: &ObjectHash) -> Result<Vec<u8>, StorageError> {
        self.storage.read(&object_path(hash))
    }

    /// Whether an object with this hash is stored.
    ///
    /// # Errors
    /// Propagates backend failures.
    pub fn contains(&self, hash: &ObjectHash) -> Result<bool, StorageError> {
        self.storage.exists(&object_path(hash))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn store() -> (Arc<MemoryBackend>, ObjectStore) {
        let storage = Arc::new(MemoryBackend::new());
        let objects = ObjectStore::new(storage.clone());
        (storage, objects)
    }

    #[test]
    fn store_then_load_round_trips() {
        let (_s, objects) = store();
        let hash = objects.store(b"hello world").unwrap();
        assert_eq!(objects.load(&hash).unwrap(), b"hello world");
    }

    #[test]
    fn store_is_idempotent() {
        let (_s, objects) = store();
        let h1 = objects.store(b"same bytes").unwrap();
        let h2 = objects.store(b"same bytes").unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn distinct_bytes_get_distinct_hashes() {
        let (_s, objects) = store();
        let h1 = objects.store(b"a").unwrap();
        let h2 = objects.store(b"b").unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn object_lands_under_fanout_path() {
        let (storage, objects) = store();
        let hash = objects.store(b"payload").unwrap();
        let expected = format!("_objects/{}/{}", hash.prefix(), hash.rest());
        assert!(storage.exists(&expected).unwrap());
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_s, objects) = store();
        let ghost = hash_bytes(b"never stored");
        assert!(objects.load(&ghost).unwrap_err().is_not_found());
        assert!(!objects.contains(&ghost).unwrap());
    }

    #[test]
    fn known_sha256_vector() {
        // sha256("abc")
        let hash = hash_bytes(b"abc");
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn empty_object_is_storable() {
        let (_s, objects) = store();
        let hash = objects.store(b"").unwrap();
        assert_eq!(objects.load(&hash).unwrap(), Vec::<u8>::new());
    }
}
