//! Append-only JSONL writer.
//!
//! One writer per file path. Every value serializes to exactly one line —
//! serde_json escapes embedded newlines inside strings, so a line break can
//! only be a record boundary. Appends are serialized under an internal
//! mutex; a batch lands as one contiguous backend append.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::backend::{StorageBackend, StorageError};

// ---------------------------------------------------------------------------
// JsonlError
// ---------------------------------------------------------------------------

/// Errors from JSONL writes.
#[derive(Debug)]
pub enum JsonlError {
    /// The writer was closed; no further writes are accepted.
    Closed {
        /// The file the writer was scoped to.
        path: String,
    },

    /// Serializing a value to JSON failed.
    Serialize(serde_json::Error),

    /// The underlying backend write failed.
    Storage(StorageError),
}

impl fmt::Display for JsonlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed { path } => write!(f, "jsonl writer for '{path}' is closed"),
            Self::Serialize(e) => write!(f, "failed to serialize value to JSONL: {e}"),
            Self::Storage(e) => write!(f, "jsonl write failed: {e}"),
        }
    }
}

impl std::error::Error for JsonlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Closed { .. } => None,
            Self::Serialize(e) => Some(e),
            Self::Storage(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for JsonlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e)
    }
}

impl From<StorageError> for JsonlError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// JsonlWriter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct WriterState {
    line_count: u64,
    byte_count: u64,
    closed: bool,
}

/// Append-only, line-oriented writer scoped to one file.
///
/// Counters reflect the file: opening a writer over an existing file picks
/// up its current line and byte counts, so segment-rotation thresholds
/// survive a restart. A failed append changes neither counter.
pub struct JsonlWriter {
    storage: Arc<dyn StorageBackend>,
    path: String,
    state: Mutex<WriterState>,
}

impl fmt::Debug for JsonlWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonlWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonlWriter {
    /// Open a writer for `path`, initializing counters from any existing
    /// content.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read.
    pub fn open(storage: Arc<dyn StorageBackend>, path: impl Into<String>) -> Result<Self, JsonlError> {
        let path = path.into();
        let (line_count, byte_count) = match storage.read(&path) {
            Ok(existing) => {
                let lines = existing.iter().filter(|&&b| b == b'\n').count() as u64;
                (lines, existing.len() as u64)
            }
            Err(e) if e.is_not_found() => (0, 0),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            storage,
            path,
            state: Mutex::new(WriterState {
                line_count,
                byte_count,
                closed: false,
            }),
        })
    }

    /// Serialize `value` and append it as one line.
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close); serialization and storage
    /// errors otherwise. On error no bytes are counted.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<(), JsonlError> {
        self.append_batch(std::slice::from_ref(value))
    }

    /// Serialize each value and append the whole batch as one contiguous
    /// write.
    ///
    /// Either every line lands or none does — serialization failures are
    /// detected before any byte reaches the backend.
    ///
    /// # Errors
    /// Same as [`append`](Self::append).
    pub fn append_batch<T: Serialize>(&self, values: &[T]) -> Result<(), JsonlError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for value in values {
            serde_json::to_writer(&mut buf, value)?;
            buf.push(b'\n');
        }
        let mut state = self.lock();
        if state.closed {
            return Err(JsonlError::Closed {
                path: self.path.clone(),
            });
        }
        self.storage.append(&self.path, &buf)?;
        state.line_count += values.len() as u64;
        state.byte_count += buf.len() as u64;
        Ok(())
    }

    /// Make all issued writes durable.
    ///
    /// Backends here write through on `append`, so this is a durability
    /// checkpoint in the contract rather than a buffer drain.
    ///
    /// # Errors
    /// `Closed` after [`close`](Self::close).
    pub fn flush(&self) -> Result<(), JsonlError> {
        let state = self.lock();
        if state.closed {
            return Err(JsonlError::Closed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Close the writer. Idempotent; all subsequent writes fail `Closed`.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// The file path this writer is scoped to.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Lines written to the file (including pre-existing lines).
    #[must_use]
    pub fn line_count(&self) -> u64 {
        self.lock().line_count
    }

    /// UTF-8 bytes written to the file (including pre-existing bytes).
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.lock().byte_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
