//! Local-filesystem storage backend.
//!
//! Maps backend paths onto a root directory using `std::fs`. Atomic writes
//! are write-to-temp + rename; conditional writes serialize the
//! read-compare-write window behind a process-wide mutex (cross-process
//! writers still race on the final rename, which is the optimistic part of
//! optimistic concurrency).
//!
//! Etags are content-derived (`<size>-<sha256 prefix>`) so they survive a
//! process restart and never collide across distinct contents.

use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rand::Rng;
use sha2::{Digest, Sha256};

use super::{
    paginate_keys, Etag, FileStat, ListOptions, ListResult, Precondition, StorageBackend,
    StorageError, WriteReceipt, validate_path,
};

// ---------------------------------------------------------------------------
// LocalBackend
// ---------------------------------------------------------------------------

/// Filesystem implementation of [`StorageBackend`], rooted at a directory.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
    // Serializes the check-then-write window of write_conditional.
    cas_guard: Mutex<()>,
}

impl LocalBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| map_io("new", &root.to_string_lossy(), e))?;
        Ok(Self {
            root,
            cas_guard: Mutex::new(()),
        })
    }

    /// The root directory this backend is confined to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, op: &'static str, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(op, path)?;
        Ok(self.root.join(path))
    }

    fn write_file(&self, op: &'static str, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError> {
        let full = self.resolve(op, path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(op, path, e))?;
        }
        // Temp-then-rename so readers never see a torn write.
        let tmp = sibling_temp(&full);
        let mut file = fs::File::create(&tmp).map_err(|e| map_io(op, path, e))?;
        file.write_all(bytes).map_err(|e| map_io(op, path, e))?;
        file.sync_all().map_err(|e| map_io(op, path, e))?;
        drop(file);
        fs::rename(&tmp, &full).map_err(|e| map_io(op, path, e))?;
        Ok(WriteReceipt {
            etag: content_etag(bytes),
            size: bytes.len() as u64,
        })
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(key);
            }
        }
        Ok(())
    }

    fn all_keys(&self, op: &'static str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        match self.walk(&self.root, &mut keys) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(map_io(op, ".", e)),
        }
        keys.sort();
        Ok(keys)
    }
}

fn sibling_temp(full: &Path) -> PathBuf {
    let mut rng = rand::rng();
    let nonce: u64 = rng.random();
    let name = full
        .file_name()
        .map_or_else(|| "tmp".to_owned(), |n| n.to_string_lossy().into_owned());
    full.with_file_name(format!(".{name}.tmp-{nonce:016x}"))
}

fn content_etag(bytes: &[u8]) -> Etag {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = format!("{:x}", hasher.finalize());
    Etag::new(format!("{:x}-{}", bytes.len(), &digest[..16]))
}

fn map_io(op: &'static str, path: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound {
            op,
            path: path.to_owned(),
        },
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            op,
            path: path.to_owned(),
        },
        _ => StorageError::Io {
            op,
            path: path.to_owned(),
            source: e,
        },
    }
}

fn mtime_ms(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl StorageBackend for LocalBackend {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.resolve("read", path)?;
        fs::read(&full).map_err(|e| map_io("read", path, e))
    }

    fn read_range(&self, path: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        if start > end {
            return Err(StorageError::Validation {
                op: "read_range",
                path: path.to_owned(),
                reason: format!("range start {start} exceeds end {end}"),
            });
        }
        let full = self.resolve("read_range", path)?;
        let data = fs::read(&full).map_err(|e| map_io("read_range", path, e))?;
        let len = data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len) as usize;
        Ok(data[start..end].to_vec())
    }

    fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve("exists", path)?;
        Ok(full.is_file())
    }

    fn stat(&self, path: &str) -> Result<FileStat, StorageError> {
        let full = self.resolve("stat", path)?;
        let meta = fs::metadata(&full).map_err(|e| map_io("stat", path, e))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound {
                op: "stat",
                path: path.to_owned(),
            });
        }
        let data = fs::read(&full).map_err(|e| map_io("stat", path, e))?;
        Ok(FileStat {
            size: meta.len(),
            etag: content_etag(&data),
            mtime_ms: mtime_ms(&meta),
        })
    }

    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError> {
        let keys: Vec<String> = self
            .all_keys("list")?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        Ok(paginate_keys(&keys, prefix, opts))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError> {
        self.write_file("write", path, bytes)
    }

    fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<WriteReceipt, StorageError> {
        self.write_file("write_atomic", path, bytes)
    }

    fn write_conditional(
        &self,
        path: &str,
        bytes: &[u8],
        precondition: &Precondition<'_>,
    ) -> Result<WriteReceipt, StorageError> {
        let _guard = self.cas_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match self.stat(path) {
            Ok(stat) => Some(stat.etag),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        match (precondition, current) {
            (Precondition::Absent, Some(_)) => Err(StorageError::AlreadyExists {
                op: "write_conditional",
                path: path.to_owned(),
            }),
            (Precondition::Match(_), None) => Err(StorageError::ETagMismatch {
                op: "write_conditional",
                path: path.to_owned(),
                current: None,
            }),
            (Precondition::Match(expected), Some(actual)) if actual != **expected => {
                Err(StorageError::ETagMismatch {
                    op: "write_conditional",
                    path: path.to_owned(),
                    current: Some(actual),
                })
            }
            _ => self.write_file("write_conditional", path, bytes),
        }
    }

    fn append(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve("append", path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io("append", path, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&full)
            .map_err(|e| map_io("append", path, e))?;
        file.write_all(bytes).map_err(|e| map_io("append", path, e))?;
        file.sync_all().map_err(|e| map_io("append", path, e))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve("delete", path)?;
        fs::remove_file(&full).map_err(|e| map_io("delete", path, e))
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys: Vec<String> = self
            .all_keys("delete_prefix")?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &keys {
            let full = self.root.join(key);
            fs::remove_file(&full).map_err(|e| map_io("delete_prefix", key, e))?;
        }
        Ok(keys.len())
    }

    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve("mkdir", path)?;
        fs::create_dir_all(&full).map_err(|e| map_io("mkdir", path, e))
    }

    fn rmdir(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let full = self.resolve("rmdir", path)?;
        if !full.is_dir() {
            return Err(StorageError::NotFound {
                op: "rmdir",
                path: path.to_owned(),
            });
        }
        if recursive {
            fs::remove_dir_all(&full).map_err(|e| map_io("rmdir", path, e))
        } else {
            fs::remove_dir(&full).map_err(|e| {
                if e.kind() == std::io::ErrorKind::DirectoryNotEmpty {
                    StorageError::DirectoryNotEmpty {
                        op: "rmdir",
                        path: path.to_owned(),
                    }
                } else {
                    map_io("rmdir", path, e)
                }
            })
        }
    }

    fn copy(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.resolve("copy", from)?;
        let dst = self.resolve("copy", to)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io("copy", to, e))?;
        }
        fs::copy(&src, &dst).map(|_| ()).map_err(|e| map_io("copy", from, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let src = self.resolve("rename", from)?;
        let dst = self.resolve("rename", to)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io("rename", to, e))?;
        }
        fs::rename(&src, &dst).map_err(|e| map_io("rename", from, e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let b = LocalBackend::new(dir.path().join("store")).unwrap();
        (dir, b)
    }

    #[test]
    fn write_read_round_trip_creates_parents() {
        let (_dir, b) = backend();
        b.write("a/b/c.txt", b"nested").unwrap();
        assert_eq!(b.read("a/b/c.txt").unwrap(), b"nested");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let (_dir, b) = backend();
        b.write_atomic("data/file.json", b"{}").unwrap();
        let listing = b.list("data/", &ListOptions::default()).unwrap();
        assert_eq!(listing.files, vec!["data/file.json"]);
    }

    #[test]
    fn etag_is_stable_for_same_content() {
        let (_dir, b) = backend();
        let r1 = b.write("f", b"same").unwrap();
        let r2 = b.write("f", b"same").unwrap();
        assert_eq!(r1.etag, r2.etag);
        let r3 = b.write("f", b"diff").unwrap();
        assert_ne!(r1.etag, r3.etag);
    }

    #[test]
    fn stat_matches_write_receipt() {
        let (_dir, b) = backend();
        let receipt = b.write("f", b"hello").unwrap();
        let stat = b.stat("f").unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.etag, receipt.etag);
        assert!(stat.mtime_ms > 0);
    }

    #[test]
    fn conditional_create_only_and_cas() {
        let (_dir, b) = backend();
        let first = b
            .write_conditional("lock", b"a", &Precondition::Absent)
            .unwrap();
        assert!(b
            .write_conditional("lock", b"b", &Precondition::Absent)
            .unwrap_err()
            .is_already_exists());
        b.write_conditional("lock", b"c", &Precondition::Match(&first.etag))
            .unwrap();
        assert!(matches!(
            b.write_conditional("lock", b"d", &Precondition::Match(&first.etag)),
            Err(StorageError::ETagMismatch { .. })
        ));
    }

    #[test]
    fn append_accumulates() {
        let (_dir, b) = backend();
        b.append("log.jsonl", b"{}\n").unwrap();
        b.append("log.jsonl", b"{}\n").unwrap();
        assert_eq!(b.read("log.jsonl").unwrap(), b"{}\n{}\n");
    }

    #[test]
    fn list_recurses_and_sorts() {
        let (_dir, b) = backend();
        b.write("z/1", b"").unwrap();
        b.write("a/2", b"").unwrap();
        b.write("a/1", b"").unwrap();
        let all = b.list("", &ListOptions::default()).unwrap();
        assert_eq!(all.files, vec!["a/1", "a/2", "z/1"]);
    }

    #[test]
    fn rmdir_respects_recursive_flag() {
        let (_dir, b) = backend();
        b.write("d/file", b"x").unwrap();
        assert!(matches!(
            b.rmdir("d", false),
            Err(StorageError::DirectoryNotEmpty { .. })
        ));
        b.rmdir("d", true).unwrap();
        assert!(!b.exists("d/file").unwrap());
    }

    #[test]
    fn copy_and_rename() {
        let (_dir, b) = backend();
        b.write("src", b"data").unwrap();
        b.copy("src", "sub/copy").unwrap();
        b.rename("src", "sub/moved").unwrap();
        assert_eq!(b.read("sub/copy").unwrap(), b"data");
        assert_eq!(b.read("sub/moved").unwrap(), b"data");
        assert!(!b.exists("src").unwrap());
    }

    #[test]
    fn delete_prefix_only_touches_prefix() {
        let (_dir, b) = backend();
        b.write("tmp/a", b"").unwrap();
        b.write("tmp/deep/b", b"").unwrap();
        b.write("keep/c", b"").unwrap();
        assert_eq!(b.delete_prefix("tmp/").unwrap(), 2);
        assert!(b.exists("keep/c").unwrap());
    }
}
