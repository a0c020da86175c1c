//! Storage backend trait and common types.
//!
//! Defines the byte-level file contract every loam component writes through.
//! This is the API boundary between the engines (log, indexes, objects,
//! version control) and the underlying store (in-memory, local filesystem, or
//! any POSIX-like tiered store).
//!
//! # Key invariants
//!
//! - **Paths** are `/`-separated, relative, and confined to the backend's
//!   root: no absolute paths, no `..` segments.
//! - **Etags** change on every successful write to a path. They are opaque;
//!   callers only compare them.
//! - **`write_conditional`** is the one cross-process synchronization
//!   primitive: create-only when no etag is expected, compare-and-swap when
//!   one is.
//! - **`write_atomic`** never exposes a half-written file (tmp + rename or
//!   equivalent).

pub mod local;
pub mod memory;

use std::fmt;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

// ---------------------------------------------------------------------------
// Etag and receipts
// ---------------------------------------------------------------------------

/// Opaque version token for a stored file.
///
/// Two etags compare equal iff they were produced by the same write.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Etag(String);

impl Etag {
    /// Wrap a backend-produced token.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteReceipt {
    /// The etag of the just-written content.
    pub etag: Etag,
    /// Bytes written.
    pub size: u64,
}

/// Metadata for a stored file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes.
    pub size: u64,
    /// Current etag.
    pub etag: Etag,
    /// Last-modified time, ms since epoch.
    pub mtime_ms: u64,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Options for [`StorageBackend::list`].
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Resume after this key (exclusive), from a prior result's `cursor`.
    pub cursor: Option<String>,
    /// Collapse keys past this delimiter into a single prefix entry.
    pub delimiter: Option<char>,
}

/// One page of listing results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Matching paths (or collapsed prefixes when a delimiter was given),
    /// sorted ascending.
    pub files: Vec<String>,
    /// Cursor to pass back for the next page, when `has_more`.
    pub cursor: Option<String>,
    /// Whether more entries exist past this page.
    pub has_more: bool,
}

/// Precondition for [`StorageBackend::write_conditional`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition<'a> {
    /// The file must not exist (create-only).
    Absent,
    /// The file must currently carry this etag (compare-and-swap).
    Match(&'a Etag),
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// A failed storage operation, carrying the operation name and path.
#[derive(Debug)]
pub enum StorageError {
    /// The path does not exist.
    NotFound {
        op: &'static str,
        path: String,
    },

    /// The path already exists (create-only writes, mkdir, copy targets).
    AlreadyExists {
        op: &'static str,
        path: String,
    },

    /// A compare-and-swap write found a different etag.
    ETagMismatch {
        op: &'static str,
        path: String,
        /// The etag currently on disk, or `None` if the file disappeared.
        current: Option<Etag>,
    },

    /// `rmdir` on a non-empty directory without `recursive`.
    DirectoryNotEmpty {
        op: &'static str,
        path: String,
    },

    /// The backend denied access.
    PermissionDenied {
        op: &'static str,
        path: String,
    },

    /// Bad input: path escapes the root, range start exceeds end, etc.
    Validation {
        op: &'static str,
        path: String,
        reason: String,
    },

    /// Any other I/O failure.
    Io {
        op: &'static str,
        path: String,
        source: std::io::Error,
    },
}

impl StorageError {
    /// The operation that failed (`read`, `write_conditional`, …).
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::NotFound { op, .. }
            | Self::AlreadyExists { op, .. }
            | Self::ETagMismatch { op, .. }
            | Self::DirectoryNotEmpty { op, .. }
            | Self::PermissionDenied { op, .. }
            | Self::Validation { op, .. }
            | Self::Io { op, .. } => op,
        }
    }

    /// The path the operation targeted.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound { path, .. }
            | Self::AlreadyExists { path, .. }
            | Self::ETagMismatch { path, .. }
            | Self::DirectoryNotEmpty { path, .. }
            | Self::PermissionDenied { path, .. }
            | Self::Validation { path, .. }
            | Self::Io { path, .. } => path,
        }
    }

    /// Whether this is a `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is an `AlreadyExists`.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { op, path } => write!(f, "{op}: '{path}' not found"),
            Self::AlreadyExists { op, path } => write!(f, "{op}: '{path}' already exists"),
            Self::ETagMismatch { op, path, current } => {
                write!(f, "{op}: etag mismatch on '{path}'")?;
                match current {
                    Some(etag) => write!(f, " (current: {etag})"),
                    None => write!(f, " (file is gone)"),
                }
            }
            Self::DirectoryNotEmpty { op, path } => {
                write!(f, "{op}: directory '{path}' is not empty")
            }
            Self::PermissionDenied { op, path } => {
                write!(f, "{op}: permission denied for '{path}'")
            }
            Self::Validation { op, path, reason } => {
                write!(f, "{op}: invalid input for '{path}': {reason}")
            }
            Self::Io { op, path, source } => write!(f, "{op}: I/O error on '{path}': {source}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

/// Validate a backend path: relative, `/`-separated, no `..`, no empty
/// segments.
///
/// # Errors
/// Returns `StorageError::Validation` naming the offending rule.
pub fn validate_path(op: &'static str, path: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::Validation {
        op,
        path: path.to_owned(),
        reason: reason.to_owned(),
    };
    if path.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("path must be relative (no leading '/')"));
    }
    if path.contains('\\') {
        return Err(invalid("path separator is '/', not '\\'"));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(invalid("path must not contain empty segments"));
        }
        if segment == ".." {
            return Err(invalid("path must not escape the root ('..')"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Listing helper (shared by implementations)
// ---------------------------------------------------------------------------

/// Collapse, paginate, and cut a sorted key set per [`ListOptions`].
///
/// `keys` must be sorted ascending and already filtered to the prefix.
/// With a delimiter, keys whose post-prefix remainder contains the delimiter
/// collapse to `<prefix><head><delimiter>` entries, deduplicated.
pub(crate) fn paginate_keys(keys: &[String], prefix: &str, opts: &ListOptions) -> ListResult {
    let mut entries: Vec<String> = match opts.delimiter {
        None => keys.to_vec(),
        Some(delim) => {
            let mut collapsed = Vec::new();
            for key in keys {
                let remainder = &key[prefix.len()..];
                match remainder.find(delim) {
                    Some(pos) => {
                        let entry = format!("{prefix}{}", &remainder[..=pos]);
                        if collapsed.last() != Some(&entry) {
                            collapsed.push(entry);
                        }
                    }
                    None => collapsed.push(key.clone()),
                }
            }
            collapsed.dedup();
            collapsed
        }
    };

    if let Some(cursor) = &opts.cursor {
        entries.retain(|e| e.as_str() > cursor.as_str());
    }

    let limit = opts.limit.unwrap_or(usize::MAX);
    let has_more = entries.len() > limit;
    entries.truncate(limit);
    let cursor = if has_more { entries.last().cloned() } else { None };

    ListResult {
        files: entries,
        cursor,
        has_more,
    }
}

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// A polymorphic byte-level file store with optimistic concurrency.
///
/// All engines hold `Arc<dyn StorageBackend>`; the trait is object-safe and
/// every method takes `&self` (implementations do their own interior
/// locking).
pub trait StorageBackend: Send + Sync {
    /// Read a whole file.
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Read the byte range `[start, end)`.
    ///
    /// `start == end` is a valid empty range. Ranges extending past the end
    /// of the file are truncated to the file size.
    ///
    /// # Errors
    /// `Validation` if `start > end`; `NotFound` if the file is absent.
    fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Size, etag, and mtime for a file.
    fn stat(&self, path: &str) -> Result<FileStat, StorageError>;

    /// List files under `prefix`, sorted, paginated by `opts`.
    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError>;

    /// Write a file, replacing any existing content.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError>;

    /// Write a file so that readers never observe a partial write.
    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError>;

    /// Write gated on a precondition.
    ///
    /// # Errors
    /// With [`Precondition::Absent`]: `AlreadyExists` if the file exists.
    /// With [`Precondition::Match`]: `ETagMismatch` carrying the etag
    /// currently on disk (or `None` if the file disappeared).
    fn write_conditional(
        &self,
        path: &str,
        bytes: &[u8],
        precondition: &Precondition<'_>,
    ) -> Result<WriteReceipt, StorageError>;

    /// Append bytes to a file, creating it if absent.
    fn append(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Delete a file.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Delete every file under `prefix`; returns the number deleted.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Create a directory (and parents).
    fn mkdir(&self, path: &str) -> Result<(), StorageError>;

    /// Remove a directory.
    ///
    /// # Errors
    /// `DirectoryNotEmpty` if the directory has entries and `recursive` is
    /// false.
    fn rmdir(&self, path: &str, recursive: bool) -> Result<(), StorageError>;

    /// Copy a file.
    fn copy(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Move (rename) a file.
    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
