//! Mutation events.
//!
//! An [`Event`] is the immutable record of one mutation. The operation is a
//! tagged variant ([`EventPayload`]) — CREATE carries only an `after` image,
//! DELETE only a `before` image, UPDATE both, and the relationship ops carry
//! the tuple — rather than one struct with many optional fields.
//!
//! Events with the same target form a total order by `(ts, id)`; ULID ids
//! are time-ordered, so the id alone is a deterministic tie-breaker.
//!
//! Serialized form (one JSONL line):
//!
//! ```json
//! {"id":"01J8...","ts":1712000000000,"ns":"posts","eid":"p1",
//!  "op":"UPDATE","before":{...},"after":{...}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use super::entity::Document;
use super::id::{EntityId, Namespace};

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// A time-ordered unique event id (ULID).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Ulid);

// Process-wide generator: ids minted in the same millisecond stay
// monotonic, so the (ts, id) tie-break is generation order.
static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

impl EventId {
    /// Generate a fresh id from the current wall clock. Ids are monotonic
    /// within this process, even within one millisecond.
    #[must_use]
    pub fn generate() -> Self {
        let mut generator = GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
        Self(generator.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Wrap an existing ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// The embedded timestamp, ms since epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = ulid::DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The entity an event applies to: namespace plus local id.
///
/// Displayed as `<namespace>:<local-id>` (the event-log grouping key).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    /// The namespace of the target entity.
    pub ns: Namespace,
    /// The local id of the target entity (no namespace prefix).
    pub eid: String,
}

impl Target {
    /// Build a target from namespace and local id.
    #[must_use]
    pub fn new(ns: Namespace, eid: impl Into<String>) -> Self {
        Self {
            ns,
            eid: eid.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns, self.eid)
    }
}

// ---------------------------------------------------------------------------
// PatchOps
// ---------------------------------------------------------------------------

/// Commutative patch operators carried by an UPDATE.
///
/// Concurrent applications of these compose regardless of order, which is
/// what lets the three-way merge fold them instead of conflicting:
/// `$inc 5` + `$inc 3` = `$inc 8`; `$add`/`$remove` with disjoint elements
/// union cleanly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchOps {
    /// Numeric increments by field.
    #[serde(rename = "$inc", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub inc: BTreeMap<String, f64>,

    /// Numeric decrements by field.
    #[serde(rename = "$dec", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub dec: BTreeMap<String, f64>,

    /// Set-add elements by field.
    #[serde(rename = "$add", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub add: BTreeMap<String, Vec<Value>>,

    /// Set-remove elements by field.
    #[serde(rename = "$remove", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub remove: BTreeMap<String, Vec<Value>>,
}

impl PatchOps {
    /// Whether no operator is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inc.is_empty() && self.dec.is_empty() && self.add.is_empty() && self.remove.is_empty()
    }

    /// Every field any operator touches.
    #[must_use]
    pub fn touched_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .inc
            .keys()
            .chain(self.dec.keys())
            .chain(self.add.keys())
            .chain(self.remove.keys())
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// The mutation an event records, tagged by `op`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// Entity created — carries the full `after` image only.
    Create {
        /// The complete state after creation.
        after: Document,
    },

    /// Entity updated — carries both images, plus commutative ops when the
    /// write used them.
    Update {
        /// State before the update, when the writer had it.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        before: Option<Document>,
        /// The fields the update set (shallow patch, not the full state).
        after: Document,
        /// Commutative operators, when the write used `_ops`.
        #[serde(rename = "_ops", skip_serializing_if = "Option::is_none", default)]
        ops: Option<PatchOps>,
    },

    /// Entity deleted — carries the final `before` image only.
    Delete {
        /// State at deletion, when the writer had it.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        before: Option<Document>,
    },

    /// Relationship link created from `f` via predicate `p` (reverse `r`)
    /// to `t`.
    RelCreate {
        f: EntityId,
        p: String,
        r: String,
        t: EntityId,
    },

    /// Relationship link removed.
    RelDelete {
        f: EntityId,
        p: String,
        r: String,
        t: EntityId,
    },
}

impl EventPayload {
    /// The wire token for this operation (`CREATE`, `UPDATE`, …).
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "CREATE",
            Self::Update { .. } => "UPDATE",
            Self::Delete { .. } => "DELETE",
            Self::RelCreate { .. } => "REL_CREATE",
            Self::RelDelete { .. } => "REL_DELETE",
        }
    }

    /// Whether this is a relationship op.
    #[must_use]
    pub const fn is_relationship(&self) -> bool {
        matches!(self, Self::RelCreate { .. } | Self::RelDelete { .. })
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One immutable mutation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique, time-ordered id.
    pub id: EventId,

    /// Mutation timestamp, ms since epoch.
    pub ts: u64,

    /// The entity this event applies to.
    #[serde(flatten)]
    pub target: Target,

    /// Actor that performed the mutation, if known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor: Option<String>,

    /// Free-form metadata (e.g. `{"migration": true}`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<BTreeMap<String, Value>>,

    /// The recorded mutation.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Build an event stamped with a fresh id and the current wall clock.
    #[must_use]
    pub fn now(target: Target, payload: EventPayload) -> Self {
        let id = EventId::generate();
        Self {
            id,
            ts: id.timestamp_ms(),
            target,
            actor: None,
            meta: None,
            payload,
        }
    }

    /// The `(ts, id)` ordering key. Total within one target.
    #[must_use]
    pub const fn order_key(&self) -> (u64, EventId) {
        (self.ts, self.id)
    }
}

/// Sort events into `(ts, id)` order in place.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by_key(Event::order_key);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
