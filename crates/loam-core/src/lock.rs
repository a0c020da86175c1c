//! Resource-scoped, TTL-bounded distributed locks.
//!
//! A lock is a JSON state file at `_meta/locks/<resource>.lock`, created with
//! a create-only conditional write — the one cross-process atomicity
//! primitive the storage contract guarantees. Expiry is wall-clock: a lock
//! whose `expiresAt` has passed is unlocked for everyone else, whatever its
//! holder believes. There is no coordinator, no heartbeat; just CAS and TTL.
//!
//! Within one process the scheduling model is cooperative — `acquire` spins
//! with a sleep between retries. Across processes it is competitive via the
//! conditional write.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Precondition, StorageBackend, StorageError};
use crate::clock;

/// Prefix all lock files live under.
pub const LOCKS_PREFIX: &str = "_meta/locks";

fn lock_file_path(resource: &str) -> String {
    format!("{LOCKS_PREFIX}/{resource}.lock")
}

// ---------------------------------------------------------------------------
// LockState
// ---------------------------------------------------------------------------

/// The persisted body of a lock file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    /// The logical resource this lock covers.
    pub resource: String,
    /// Instance-scoped id of the holder.
    pub holder: String,
    /// When the lock was taken, ms since epoch.
    #[serde(rename = "acquiredAt")]
    pub acquired_at: u64,
    /// When the lock lapses, ms since epoch.
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
    /// Free-form holder-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl LockState {
    /// Whether the lock has lapsed at `now_ms`.
    #[must_use]
    pub const fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at < now_ms
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for a single acquisition attempt.
#[derive(Clone, Debug)]
pub struct LockOptions {
    /// How long the lock is held before lapsing, in ms.
    pub timeout_ms: u64,
    /// Override the manager's holder id (tests, mostly).
    pub holder: Option<String>,
    /// Metadata persisted into the lock file.
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            holder: None,
            metadata: None,
        }
    }
}

/// Options for a blocking [`LockManager::acquire`].
#[derive(Clone, Debug)]
pub struct AcquireOptions {
    /// Give up after this long waiting for the resource, in ms.
    pub wait_timeout_ms: u64,
    /// Pause between attempts, in ms.
    pub retry_interval_ms: u64,
    /// Per-attempt options.
    pub lock: LockOptions,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
            retry_interval_ms: 100,
            lock: LockOptions::default(),
        }
    }
}

/// Outcome of a single non-blocking attempt.
#[derive(Debug)]
pub enum TryAcquire {
    /// The lock is ours.
    Acquired(Lock),
    /// Someone else holds it.
    Busy {
        /// The current holder, when the lock file was readable.
        current_holder: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// LockError
// ---------------------------------------------------------------------------

/// Errors from lock operations.
#[derive(Debug)]
pub enum LockError {
    /// `acquire` gave up waiting.
    AcquisitionTimeout {
        /// The contested resource.
        resource: String,
        /// How long we waited, ms.
        waited_ms: u64,
        /// Who held it when we gave up, if readable.
        current_holder: Option<String>,
    },

    /// The resource name is not usable as a lock file name.
    InvalidResource {
        name: String,
        reason: String,
    },

    /// A storage operation failed.
    Storage(StorageError),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquisitionTimeout {
                resource,
                waited_ms,
                current_holder,
            } => {
                write!(
                    f,
                    "timed out after {waited_ms}ms waiting for lock '{resource}'"
                )?;
                if let Some(holder) = current_holder {
                    write!(f, " (held by {holder})")?;
                }
                write!(
                    f,
                    "\n  To fix: retry later, or force-release if the holder is dead."
                )
            }
            Self::InvalidResource { name, reason } => {
                write!(f, "invalid lock resource '{name}': {reason}")
            }
            Self::Storage(e) => write!(f, "lock storage operation failed: {e}"),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for LockError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

/// Acquires and inspects locks over one storage backend.
///
/// The manager's holder id is random per instance; every lock it takes is
/// attributed to that id unless overridden per call.
pub struct LockManager {
    storage: Arc<dyn StorageBackend>,
    holder_id: String,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("holder_id", &self.holder_id)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    /// Create a manager with a fresh random holder id.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        let suffix = Alphanumeric.sample_string(&mut rand::rng(), 12);
        Self {
            storage,
            holder_id: format!("holder-{suffix}"),
        }
    }

    /// This manager's holder id.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// One non-blocking acquisition attempt.
    ///
    /// An existing lock file whose `expiresAt` has passed (or that does not
    /// parse) is treated as unlocked and taken over with a compare-and-swap
    /// on its etag, so two takers of a stale lock cannot both win.
    ///
    /// # Errors
    /// `InvalidResource` for unusable names; storage failures verbatim.
    pub fn try_acquire(
        &self,
        resource: &str,
        opts: &LockOptions,
    ) -> Result<TryAcquire, LockError> {
        validate_resource(resource)?;
        let path = lock_file_path(resource);
        let holder = opts.holder.clone().unwrap_or_else(|| self.holder_id.clone());
        let now = clock::now_ms();
        let state = LockState {
            resource: resource.to_owned(),
            holder: holder.clone(),
            acquired_at: now,
            expires_at: now + opts.timeout_ms,
            metadata: opts.metadata.clone(),
        };
        let body = serde_json::to_vec(&state).map_err(|e| LockError::Storage(StorageError::Io {
            op: "try_acquire",
            path: path.clone(),
            source: std::io::Error::other(e),
        }))?;

        // Fast path: create-only.
        match self.storage.write_conditional(&path, &body, &Precondition::Absent) {
            Ok(_) => {
                debug!(resource, holder, "lock acquired");
                return Ok(TryAcquire::Acquired(self.make_lock(state, path)));
            }
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }

        // Slow path: the file exists. Stale or corrupt → take over via CAS.
        let existing = match self.storage.read(&path) {
            Ok(bytes) => serde_json::from_slice::<LockState>(&bytes).ok(),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(current) = &existing
            && !current.is_expired_at(now)
        {
            return Ok(TryAcquire::Busy {
                current_holder: Some(current.holder.clone()),
            });
        }
        let etag = match self.storage.stat(&path) {
            Ok(stat) => stat.etag,
            // Raced a release: one clean retry of the create-only path.
            Err(e) if e.is_not_found() => {
                return match self.storage.write_conditional(&path, &body, &Precondition::Absent) {
                    Ok(_) => Ok(TryAcquire::Acquired(self.make_lock(state, path))),
                    Err(e) if e.is_already_exists() => Ok(TryAcquire::Busy {
                        current_holder: None,
                    }),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };
        match self
            .storage
            .write_conditional(&path, &body, &Precondition::Match(&etag))
        {
            Ok(_) => {
                debug!(resource, holder, "stale lock taken over");
                Ok(TryAcquire::Acquired(self.make_lock(state, path)))
            }
            Err(StorageError::ETagMismatch { .. } | StorageError::AlreadyExists { .. }) => {
                Ok(TryAcquire::Busy {
                    current_holder: existing.map(|s| s.holder),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acquire, retrying until `wait_timeout_ms` elapses.
    ///
    /// # Errors
    /// `AcquisitionTimeout` when the wait budget runs out.
    pub fn acquire(&self, resource: &str, opts: &AcquireOptions) -> Result<Lock, LockError> {
        let started = clock::now_ms();
        let mut last_holder = None;
        loop {
            match self.try_acquire(resource, &opts.lock)? {
                TryAcquire::Acquired(lock) => return Ok(lock),
                TryAcquire::Busy { current_holder } => last_holder = current_holder,
            }
            let waited = clock::now_ms().saturating_sub(started);
            if waited >= opts.wait_timeout_ms {
                return Err(LockError::AcquisitionTimeout {
                    resource: resource.to_owned(),
                    waited_ms: waited,
                    current_holder: last_holder,
                });
            }
            std::thread::sleep(Duration::from_millis(opts.retry_interval_ms));
        }
    }

    /// Delete the lock file regardless of holder. Returns whether a file
    /// was actually removed.
    ///
    /// # Errors
    /// Storage failures other than `NotFound`.
    pub fn force_release(&self, resource: &str) -> Result<bool, LockError> {
        validate_resource(resource)?;
        match self.storage.delete(&lock_file_path(resource)) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// The current live lock state for `resource`, if any.
    ///
    /// Expired or unreadable lock files read as unlocked.
    ///
    /// # Errors
    /// Storage failures other than `NotFound`.
    pub fn is_locked(&self, resource: &str) -> Result<Option<LockState>, LockError> {
        validate_resource(resource)?;
        match self.storage.read(&lock_file_path(resource)) {
            Ok(bytes) => Ok(serde_json::from_slice::<LockState>(&bytes)
                .ok()
                .filter(|s| !s.is_expired_at(clock::now_ms()))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All live locks. Expired entries are excluded.
    ///
    /// # Errors
    /// Storage failures.
    pub fn list_locks(&self) -> Result<Vec<LockState>, LockError> {
        let listing = self
            .storage
            .list(&format!("{LOCKS_PREFIX}/"), &crate::backend::ListOptions::default())?;
        let now = clock::now_ms();
        let mut locks = Vec::new();
        for path in listing.files {
            match self.storage.read(&path) {
                Ok(bytes) => {
                    if let Ok(state) = serde_json::from_slice::<LockState>(&bytes)
                        && !state.is_expired_at(now)
                    {
                        locks.push(state);
                    }
                }
                // Raced a release between list and read.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(locks)
    }

    fn make_lock(&self, state: LockState, path: String) -> Lock {
        Lock {
            storage: self.storage.clone(),
            path,
            resource: state.resource.clone(),
            holder: state.holder.clone(),
            inner: Mutex::new(LockInner {
                expires_at: state.expires_at,
                released: false,
            }),
        }
    }
}

fn validate_resource(resource: &str) -> Result<(), LockError> {
    let invalid = |reason: &str| LockError::InvalidResource {
        name: resource.to_owned(),
        reason: reason.to_owned(),
    };
    if resource.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if resource.contains('/') {
        return Err(invalid("must not contain '/'"));
    }
    if resource.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("must not contain whitespace or control characters"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LockInner {
    expires_at: u64,
    released: bool,
}

/// A held lock.
///
/// Dropping a `Lock` without releasing leaves the file to lapse by TTL —
/// release explicitly (or use [`with_lock`]) for prompt handover.
pub struct Lock {
    storage: Arc<dyn StorageBackend>,
    path: String,
    resource: String,
    holder: String,
    inner: Mutex<LockInner>,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("resource", &self.resource)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

impl Lock {
    /// The locked resource.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The holder id this lock was taken under.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release the lock.
    ///
    /// Deletes the file only while we are still the persisted holder —
    /// after expiry and takeover the file belongs to someone else and is
    /// left alone. Idempotent.
    ///
    /// # Errors
    /// Storage failures other than `NotFound`.
    pub fn release(&self) -> Result<(), LockError> {
        let mut inner = self.lock_inner();
        if inner.released {
            return Ok(());
        }
        inner.released = true;
        drop(inner);
        match self.storage.read(&self.path) {
            Ok(bytes) => {
                if let Ok(state) = serde_json::from_slice::<LockState>(&bytes)
                    && state.holder == self.holder
                {
                    match self.storage.delete(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Push `expiresAt` out by `new_timeout_ms` from now.
    ///
    /// Returns `false` (without touching the file) when the lock was
    /// released, expired, or taken over.
    ///
    /// # Errors
    /// Storage failures other than `NotFound`.
    pub fn extend(&self, new_timeout_ms: u64) -> Result<bool, LockError> {
        let mut inner = self.lock_inner();
        let now = clock::now_ms();
        if inner.released || inner.expires_at < now {
            return Ok(false);
        }
        let bytes = match self.storage.read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let Ok(mut state) = serde_json::from_slice::<LockState>(&bytes) else {
            return Ok(false);
        };
        if state.holder != self.holder {
            return Ok(false);
        }
        state.expires_at = now + new_timeout_ms;
        let body = serde_json::to_vec(&state).map_err(|e| LockError::Storage(StorageError::Io {
            op: "extend",
            path: self.path.clone(),
            source: std::io::Error::other(e),
        }))?;
        self.storage.write_atomic(&self.path, &body)?;
        inner.expires_at = state.expires_at;
        Ok(true)
    }

    /// Whether the lock is still held: not released and not past expiry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let inner = self.lock_inner();
        !inner.released && clock::now_ms() <= inner.expires_at
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, LockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// with_lock
// ---------------------------------------------------------------------------

/// Run `op` under a lock on `resource`, releasing on every exit path.
///
/// # Errors
/// `LockError` (via `E`) when acquisition times out; otherwise whatever
/// `op` returns.
pub fn with_lock<T, E>(
    manager: &LockManager,
    resource: &str,
    opts: &AcquireOptions,
    op: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: From<LockError>,
{
    let lock = manager.acquire(resource, opts)?;
    let result = op();
    if let Err(e) = lock.release() {
        // The TTL will reap the file; the operation's own result wins.
        warn!(resource, error = %e, "failed to release lock");
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn manager() -> (Arc<MemoryBackend>, LockManager) {
        let storage = Arc::new(MemoryBackend::new());
        let mgr = LockManager::new(storage.clone());
        (storage, mgr)
    }

    fn plant_lock(storage: &MemoryBackend, resource: &str, holder: &str, expires_at: u64) {
        let state = LockState {
            resource: resource.to_owned(),
            holder: holder.to_owned(),
            acquired_at: 0,
            expires_at,
            metadata: None,
        };
        storage
            .write(
                &lock_file_path(resource),
                &serde_json::to_vec(&state).unwrap(),
            )
            .unwrap();
    }

    // -- try_acquire --

    #[test]
    fn acquire_and_release_round_trip() {
        let (storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr.try_acquire("merge", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        assert!(lock.is_valid());
        assert!(storage.exists("_meta/locks/merge.lock").unwrap());
        lock.release().unwrap();
        assert!(!lock.is_valid());
        assert!(!storage.exists("_meta/locks/merge.lock").unwrap());
    }

    #[test]
    fn second_taker_sees_busy_with_holder() {
        let (_storage, mgr) = manager();
        let TryAcquire::Acquired(_lock) =
            mgr.try_acquire("merge", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        match mgr.try_acquire("merge", &LockOptions::default()).unwrap() {
            TryAcquire::Busy { current_holder } => {
                assert_eq!(current_holder.as_deref(), Some(mgr.holder_id()));
            }
            TryAcquire::Acquired(_) => panic!("expected busy"),
        }
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let (storage, mgr) = manager();
        plant_lock(&storage, "merge", "dead-holder", 1);
        let TryAcquire::Acquired(lock) = mgr.try_acquire("merge", &LockOptions::default()).unwrap()
        else {
            panic!("expected takeover of expired lock");
        };
        assert_eq!(lock.holder(), mgr.holder_id());
    }

    #[test]
    fn corrupt_lock_file_is_taken_over() {
        let (storage, mgr) = manager();
        storage
            .write("_meta/locks/merge.lock", b"not json at all")
            .unwrap();
        assert!(matches!(
            mgr.try_acquire("merge", &LockOptions::default()).unwrap(),
            TryAcquire::Acquired(_)
        ));
    }

    #[test]
    fn invalid_resource_names_rejected() {
        let (_storage, mgr) = manager();
        for name in ["", "a/b", "has space", "tab\there"] {
            assert!(
                matches!(
                    mgr.try_acquire(name, &LockOptions::default()),
                    Err(LockError::InvalidResource { .. })
                ),
                "expected '{name}' rejected"
            );
        }
        // Namespaced resources use ':' and are fine.
        assert!(mgr.try_acquire("namespace:users", &LockOptions::default()).is_ok());
    }

    // -- release semantics --

    #[test]
    fn release_is_idempotent() {
        let (_storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr.try_acquire("r", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn release_leaves_foreign_lock_alone() {
        let (storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr.try_acquire("r", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        // Simulate expiry + takeover by another holder.
        plant_lock(&storage, "r", "other-holder", clock::now_ms() + 60_000);
        lock.release().unwrap();
        assert!(storage.exists("_meta/locks/r.lock").unwrap(), "foreign lock must survive");
    }

    // -- extend --

    #[test]
    fn extend_pushes_expiry_while_held() {
        let (_storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr
            .try_acquire(
                "r",
                &LockOptions {
                    timeout_ms: 30_000,
                    ..LockOptions::default()
                },
            )
            .unwrap()
        else {
            panic!("expected acquisition");
        };
        assert!(lock.extend(120_000).unwrap());
        assert!(lock.is_valid());
    }

    #[test]
    fn extend_after_release_returns_false() {
        let (_storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr.try_acquire("r", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        lock.release().unwrap();
        assert!(!lock.extend(1_000).unwrap());
    }

    #[test]
    fn extend_after_takeover_returns_false() {
        let (storage, mgr) = manager();
        let TryAcquire::Acquired(lock) = mgr.try_acquire("r", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        plant_lock(&storage, "r", "usurper", clock::now_ms() + 60_000);
        assert!(!lock.extend(1_000).unwrap());
    }

    // -- force_release / is_locked / list_locks --

    #[test]
    fn force_release_on_unlocked_returns_false() {
        let (_storage, mgr) = manager();
        assert!(!mgr.force_release("nothing").unwrap());
    }

    #[test]
    fn force_release_removes_foreign_lock() {
        let (storage, mgr) = manager();
        plant_lock(&storage, "r", "someone", clock::now_ms() + 60_000);
        assert!(mgr.force_release("r").unwrap());
        assert!(mgr.is_locked("r").unwrap().is_none());
    }

    #[test]
    fn is_locked_ignores_expired() {
        let (storage, mgr) = manager();
        plant_lock(&storage, "stale", "dead", 1);
        assert!(mgr.is_locked("stale").unwrap().is_none());
        plant_lock(&storage, "live", "alive", clock::now_ms() + 60_000);
        let state = mgr.is_locked("live").unwrap().unwrap();
        assert_eq!(state.holder, "alive");
    }

    #[test]
    fn list_locks_excludes_expired() {
        let (storage, mgr) = manager();
        plant_lock(&storage, "a", "h1", clock::now_ms() + 60_000);
        plant_lock(&storage, "b", "h2", 1);
        let locks = mgr.list_locks().unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].resource, "a");
    }

    // -- with_lock --

    #[test]
    fn with_lock_releases_on_success() {
        let (_storage, mgr) = manager();
        let value: Result<i32, LockError> =
            with_lock(&mgr, "merge", &AcquireOptions::default(), || Ok(42));
        assert_eq!(value.unwrap(), 42);
        assert!(mgr.is_locked("merge").unwrap().is_none());
    }

    #[test]
    fn with_lock_releases_on_error() {
        let (_storage, mgr) = manager();
        let result: Result<(), LockError> =
            with_lock(&mgr, "merge", &AcquireOptions::default(), || {
                Err(LockError::InvalidResource {
                    name: "sentinel".to_owned(),
                    reason: "sentinel".to_owned(),
                })
            });
        assert!(result.is_err());
        assert!(mgr.is_locked("merge").unwrap().is_none(), "lock must not leak");
    }

    #[test]
    fn with_lock_times_out_when_contested() {
        let (_storage, mgr) = manager();
        let TryAcquire::Acquired(_held) = mgr.try_acquire("merge", &LockOptions::default()).unwrap()
        else {
            panic!("expected acquisition");
        };
        let opts = AcquireOptions {
            wait_timeout_ms: 50,
            retry_interval_ms: 10,
            lock: LockOptions::default(),
        };
        let result: Result<(), LockError> = with_lock(&mgr, "merge", &opts, || Ok(()));
        assert!(matches!(
            result,
            Err(LockError::AcquisitionTimeout { .. })
        ));
    }

    #[test]
    fn metadata_round_trips_through_lock_file() {
        let (_storage, mgr) = manager();
        let mut metadata = BTreeMap::new();
        metadata.insert("operation".to_owned(), serde_json::json!("checkout"));
        let TryAcquire::Acquired(_lock) = mgr
            .try_acquire(
                "merge",
                &LockOptions {
                    metadata: Some(metadata.clone()),
                    ..LockOptions::default()
                },
            )
            .unwrap()
        else {
            panic!("expected acquisition");
        };
        let state = mgr.is_locked("merge").unwrap().unwrap();
        assert_eq!(state.metadata, Some(metadata));
    }
}
