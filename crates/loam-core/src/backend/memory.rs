//! In-memory storage backend.
//!
//! A `BTreeMap` of path → file entry behind one mutex, with a monotonic
//! counter minting etags. The reference implementation of the
//! [`StorageBackend`] contract: every other backend must be observationally
//! equivalent, and the contract tests in this module are written against the
//! trait, not the struct.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use crate::clock;

use super::{
    paginate_keys, Etag, FileStat, ListOptions, ListResult, Precondition, StorageBackend,
    StorageError, WriteReceipt, validate_path,
};

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FileEntry {
    data: Vec<u8>,
    etag: Etag,
    mtime_ms: u64,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, FileEntry>,
    dirs: BTreeSet<String>,
    etag_counter: u64,
}

impl State {
    fn next_etag(&mut self) -> Etag {
        self.etag_counter += 1;
        Etag::new(format!("m{:016x}", self.etag_counter))
    }

    fn put(&mut self, path: &str, bytes: &[u8]) -> WriteReceipt {
        let etag = self.next_etag();
        let size = bytes.len() as u64;
        self.files.insert(
            path.to_owned(),
            FileEntry {
                data: bytes.to_vec(),
                etag: etag.clone(),
                mtime_ms: clock::now_ms(),
            },
        );
        WriteReceipt { etag, size }
    }
}

/// In-memory implementation of [`StorageBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<State>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path("read", path)?;
        let state = self.lock();
        state
            .files
            .get(path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                op: "read",
                path: path.to_owned(),
            })
    }

    fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        validate_path("read_range", path)?;
        if start > end {
            return Err(StorageError::Validation {
                op: "read_range",
                path: path.to_owned(),
                reason: format!("range start {start} exceeds end {end}"),
            });
        }
        let state = self.lock();
        let entry = state.files.get(path).ok_or_else(|| StorageError::NotFound {
            op: "read_range",
            path: path.to_owned(),
        })?;
        let len = entry.data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        Ok(entry.data[start..end].to_vec())
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_path("exists", path)?;
        Ok(self.lock().files.contains_key(path))
    }

    fn stat(&self, path: &str) -> Result<FileStat, StorageError> {
        validate_path("stat", path)?;
        let state = self.lock();
        state
            .files
            .get(path)
            .map(|entry| FileStat {
                size: entry.data.len() as u64,
                etag: entry.etag.clone(),
                mtime_ms: entry.mtime_ms,
            })
            .ok_or_else(|| StorageError::NotFound {
                op: "stat",
                path: path.to_owned(),
            })
    }

    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError> {
        let state = self.lock();
        let keys: Vec<String> = state
            .files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(paginate_keys(&keys, prefix, opts))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError> {
        validate_path("write", path)?;
        Ok(self.lock().put(path, bytes))
    }

    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError> {
        validate_path("write_atomic", path)?;
        // The map swap is atomic under the lock.
        Ok(self.lock().put(path, bytes))
    }

    fn write_conditional(
        &self,
        path: &str,
        bytes: &[u8],
        precondition: &Precondition<'_>,
    ) -> Result<WriteReceipt, StorageError> {
        validate_path("write_conditional", path)?;
        let mut state = self.lock();
        match precondition {
            Precondition::Absent => {
                if state.files.contains_key(path) {
                    return Err(StorageError::AlreadyExists {
                        op: "write_conditional",
                        path: path.to_owned(),
                    });
                }
            }
            Precondition::Match(expected) => match state.files.get(path) {
                None => {
                    return Err(StorageError::ETagMismatch {
                        op: "write_conditional",
                        path: path.to_owned(),
                        current: None,
                    });
                }
                Some(entry) if entry.etag != **expected => {
                    return Err(StorageError::ETagMismatch {
                        op: "write_conditional",
                        path: path.to_owned(),
                        current: Some(entry.etag.clone()),
                    });
                }
                Some(_) => {}
            },
        }
        Ok(state.put(path, bytes))
    }

    fn append(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_path("append", path)?;
        let mut state = self.lock();
        let etag = state.next_etag();
        let mtime_ms = clock::now_ms();
        let entry = state.files.entry(path.to_owned()).or_insert_with(|| FileEntry {
            data: Vec::new(),
            etag: Etag::new(""),
            mtime_ms,
        });
        entry.data.extend_from_slice(bytes);
        entry.etag = etag;
        entry.mtime_ms = mtime_ms;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_path("delete", path)?;
        let mut state = self.lock();
        if state.files.remove(path).is_none() {
            return Err(StorageError::NotFound {
                op: "delete",
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut state = self.lock();
        let doomed: Vec<String> = state
            .files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            state.files.remove(key);
        }
        Ok(doomed.len())
    }

    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        validate_path("mkdir", path)?;
        self.lock().dirs.insert(path.to_owned());
        Ok(())
    }

    fn rmdir(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        validate_path("rmdir", path)?;
        let mut state = self.lock();
        let child_prefix = format!("{path}/");
        let occupied = state.files.keys().any(|k| k.starts_with(&child_prefix));
        if occupied && !recursive {
            return Err(StorageError::DirectoryNotEmpty {
                op: "rmdir",
                path: path.to_owned(),
            });
        }
        if !occupied && !state.dirs.contains(path) {
            return Err(StorageError::NotFound {
                op: "rmdir",
                path: path.to_owned(),
            });
        }
        if recursive {
            let doomed: Vec<String> = state
                .files
                .keys()
                .filter(|k| k.starts_with(&child_prefix))
                .cloned()
                .collect();
            for key in doomed {
                state.files.remove(&key);
            }
        }
        state.dirs.remove(path);
        state.dirs.retain(|d| !d.starts_with(&child_prefix));
        Ok(())
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_path("copy", from)?;
        validate_path("copy", to)?;
        let mut state = self.lock();
        let data = state
            .files
            .get(from)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                op: "copy",
                path: from.to_owned(),
            })?;
        state.put(to, &data);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        validate_path("rename", from)?;
        validate_path("rename", to)?;
        let mut state = self.lock();
        let entry = state.files.remove(from).ok_or_else(|| StorageError::NotFound {
            op: "rename",
            path: from.to_owned(),
        })?;
        state.put(to, &entry.data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests — written against the trait, so they double as contract tests.
// ---------------------------------------------------------------------------
