//! Commutative-operation accumulation and folding.
//!
//! `$inc`/`$dec` compose by addition; `$add`/`$remove` compose as set
//! operations and commute across sides only when the touched elements are
//! disjoint. The merge engine uses [`OpsAccumulator`] to collapse each
//! side's op history per field, then [`fold_description`] to record what
//! the fold did (`$inc 5 + $inc 3 = $inc 8`).

use std::collections::BTreeMap;

use serde_json::Value;

use loam_core::model::PatchOps;

/// One side's accumulated commutative effect on its fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpsAccumulator {
    /// Net numeric delta per field (`$inc` minus `$dec`).
    pub delta: BTreeMap<String, f64>,
    /// Elements added per field.
    pub added: BTreeMap<String, Vec<Value>>,
    /// Elements removed per field.
    pub removed: BTreeMap<String, Vec<Value>>,
}

impl OpsAccumulator {
    /// Fold one event's ops into the accumulator.
    pub fn absorb(&mut self, ops: &PatchOps) {
        for (field, n) in &ops.inc {
            *self.delta.entry(field.clone()).or_default() += n;
        }
        for (field, n) in &ops.dec {
            *self.delta.entry(field.clone()).or_default() -= n;
        }
        for (field, elements) in &ops.add {
            let bucket = self.added.entry(field.clone()).or_default();
            for element in elements {
                if !bucket.contains(element) {
                    bucket.push(element.clone());
                }
            }
        }
        for (field, elements) in &ops.remove {
            let bucket = self.removed.entry(field.clone()).or_default();
            for element in elements {
                if !bucket.contains(element) {
                    bucket.push(element.clone());
                }
            }
        }
    }

    /// Every field any op touched.
    #[must_use]
    pub fn touched_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .delta
            .keys()
            .chain(self.added.keys())
            .chain(self.removed.keys())
            .map(String::as_str)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        fields
    }

    /// Whether this side touched `field` through ops at all.
    #[must_use]
    pub fn touches(&self, field: &str) -> bool {
        self.delta.contains_key(field)
            || self.added.contains_key(field)
            || self.removed.contains_key(field)
    }
}

/// Whether two sides' set ops on `field` commute: neither side adds an
/// element the other removes.
#[must_use]
pub fn sets_commute(ours: &OpsAccumulator, theirs: &OpsAccumulator, field: &str) -> bool {
    let empty = Vec::new();
    let our_added = ours.added.get(field).unwrap_or(&empty);
    let our_removed = ours.removed.get(field).unwrap_or(&empty);
    let their_added = theirs.added.get(field).unwrap_or(&empty);
    let their_removed = theirs.removed.get(field).unwrap_or(&empty);
    !our_added.iter().any(|e| their_removed.contains(e))
        && !their_added.iter().any(|e| our_removed.contains(e))
}

/// Describe the fold of both sides' ops on `field`.
#[must_use]
pub fn fold_description(ours: &OpsAccumulator, theirs: &OpsAccumulator, field: &str) -> String {
    if let (Some(a), Some(b)) = (ours.delta.get(field), theirs.delta.get(field)) {
        return format!("$inc {a} + $inc {b} = $inc {}", a + b);
    }
    let our_adds = ours.added.get(field).map_or(0, Vec::len);
    let their_adds = theirs.added.get(field).map_or(0, Vec::len);
    let our_removes = ours.removed.get(field).map_or(0, Vec::len);
    let their_removes = theirs.removed.get(field).map_or(0, Vec::len);
    format!(
        "$add {}+{} / $remove {}+{} (disjoint)",
        our_adds, their_adds, our_removes, their_removes
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
