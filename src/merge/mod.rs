//! Three-way event-stream merge.
//!
//! Inputs are the per-branch event streams since the common ancestor
//! (`base` is the ancestor's stream, used for grouping context). Events are
//! merged per target: one-sided targets pass through verbatim; two-sided
//! targets go through conflict detection with commutative-op
//! auto-resolution. Non-resolvable conflicts are *returned*, never thrown —
//! `success` is simply `conflicts.is_empty()`.

pub mod ops;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use loam_core::model::{Document, Event, EventId, EventPayload};

use self::ops::{fold_description, sets_commute, OpsAccumulator};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What kind of conflict was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// One side deleted while the other updated.
    DeleteUpdate,
    /// Both sides created the same target with different content.
    CreateCreate,
    /// Both sides set the same field to different values.
    ConcurrentUpdate,
}

/// A non-auto-resolvable divergence on one target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The conflict kind.
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// The contested target, `<ns>:<id>`.
    pub target: String,
    /// Our side's last relevant event.
    #[serde(rename = "ourEvent")]
    pub our_event: Event,
    /// Their side's last relevant event.
    #[serde(rename = "theirEvent")]
    pub their_event: Event,
    /// The contested field, for `concurrent_update`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
}

/// A field both sides touched that merged without conflict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMerge {
    /// The target, `<ns>:<id>`.
    pub target: String,
    /// The folded field.
    pub field: String,
    /// What the fold did, e.g. `$inc 5 + $inc 3 = $inc 8`.
    pub detail: String,
}

/// Which side a resolution favored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ours,
    Theirs,
}

/// A conflict cleared by the configured strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The conflict that was cleared.
    pub conflict: Conflict,
    /// The side whose event survived.
    pub winner: Side,
}

/// How remaining conflicts are resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Our side wins every conflict.
    Ours,
    /// Their side wins every conflict.
    Theirs,
    /// The later event (by `(ts, id)`) wins each conflict.
    Latest,
}

/// Merge options.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeOptions {
    /// When set, applied to every remaining conflict.
    pub resolution_strategy: Option<ResolutionStrategy>,
}

/// The full result of a merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Whether no conflicts remain.
    pub success: bool,
    /// The merged stream, in `(ts, id)` order.
    #[serde(rename = "mergedEvents")]
    pub merged_events: Vec<Event>,
    /// Unresolved conflicts.
    pub conflicts: Vec<Conflict>,
    /// Fields folded automatically.
    #[serde(rename = "autoMerged")]
    pub auto_merged: Vec<AutoMerge>,
    /// Conflicts cleared by the strategy.
    pub resolved: Vec<Resolution>,
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// One side's collapsed effect on a target since the common ancestor.
struct SideEffect<'a> {
    /// Field → (last set value, the event that set it).
    sets: BTreeMap<String, (&'a Value, &'a Event)>,
    /// Accumulated commutative ops.
    ops: OpsAccumulator,
    /// Field → last event that touched it (set or op).
    last_touch: BTreeMap<String, &'a Event>,
    /// The side's last event.
    last: &'a Event,
    /// The side's last CREATE, if any.
    create: Option<&'a Event>,
    /// Whether the side deleted the target at any point.
    has_delete: bool,
}

impl<'a> SideEffect<'a> {
    fn build(events: &'a [Event]) -> Self {
        let mut sets: BTreeMap<String, (&'a Value, &'a Event)> = BTreeMap::new();
        let mut acc = OpsAccumulator::default();
        let mut last_touch: BTreeMap<String, &'a Event> = BTreeMap::new();
        let mut create = None;
        let mut has_delete = false;
        for event in events {
            match &event.payload {
                EventPayload::Create { after } => {
                    create = Some(event);
                    has_delete = false;
                    record_sets(&mut sets, &mut last_touch, after, event);
                }
                EventPayload::Update { after, ops, .. } => {
                    record_sets(&mut sets, &mut last_touch, after, event);
                    if let Some(ops) = ops {
                        acc.absorb(ops);
                        for field in ops.touched_fields() {
                            last_touch.insert(field.to_owned(), event);
                        }
                    }
                }
                EventPayload::Delete { .. } => has_delete = true,
                EventPayload::RelCreate { .. } | EventPayload::RelDelete { .. } => {}
            }
        }
        Self {
            sets,
            ops: acc,
            last_touch,
            // Callers only build effects for non-empty streams.
            last: events.last().unwrap_or_else(|| unreachable!("non-empty side")),
            create,
            has_delete,
        }
    }

    fn touched_fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = self.sets.keys().cloned().collect();
        fields.extend(self.ops.touched_fields().into_iter().map(str::to_owned));
        fields
    }

    fn is_delete_terminal(&self) -> bool {
        matches!(self.last.payload, EventPayload::Delete { .. })
    }
}

fn record_sets<'a>(
    sets: &mut BTreeMap<String, (&'a Value, &'a Event)>,
    last_touch: &mut BTreeMap<String, &'a Event>,
    after: &'a Document,
    event: &'a Event,
) {
    for (field, value) in after {
        if field.starts_with('$') {
            continue;
        }
        sets.insert(field.clone(), (value, event));
        last_touch.insert(field.clone(), event);
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `ours` and `theirs` (both event streams since the common
/// ancestor) relative to `base` (the ancestor's stream).
#[must_use]
pub fn merge_event_streams(
    base: &[Event],
    ours: &[Event],
    theirs: &[Event],
    opts: &MergeOptions,
) -> MergeOutcome {
    // Group per target. Base events provide context only; they are not
    // re-emitted.
    let mut targets: BTreeMap<String, (Vec<Event>, Vec<Event>)> = BTreeMap::new();
    for event in base {
        targets.entry(event.target.to_string()).or_default();
    }
    for event in ours {
        targets
            .entry(event.target.to_string())
            .or_default()
            .0
            .push(event.clone());
    }
    for event in theirs {
        targets
            .entry(event.target.to_string())
            .or_default()
            .1
            .push(event.clone());
    }

    let mut merged: Vec<Event> = Vec::new();
    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut auto_merged: Vec<AutoMerge> = Vec::new();
    let mut resolved: Vec<Resolution> = Vec::new();

    for (target, (mut our_events, mut their_events)) in targets {
        our_events.sort_by_key(Event::order_key);
        their_events.sort_by_key(Event::order_key);
        match (our_events.is_empty(), their_events.is_empty()) {
            (true, true) => {}
            (false, true) => merged.extend(our_events),
            (true, false) => merged.extend(their_events),
            (false, false) => merge_target(
                &target,
                &our_events,
                &their_events,
                opts,
                &mut merged,
                &mut conflicts,
                &mut auto_merged,
                &mut resolved,
            ),
        }
    }

    merged.sort_by_key(Event::order_key);
    MergeOutcome {
        success: conflicts.is_empty(),
        merged_events: merged,
        conflicts,
        auto_merged,
        resolved,
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_target(
    target: &str,
    our_events: &[Event],
    their_events: &[Event],
    opts: &MergeOptions,
    merged: &mut Vec<Event>,
    conflicts: &mut Vec<Conflict>,
    auto_merged: &mut Vec<AutoMerge>,
    resolved: &mut Vec<Resolution>,
) {
    let ours = SideEffect::build(our_events);
    let theirs = SideEffect::build(their_events);
    let mut target_conflicts: Vec<Conflict> = Vec::new();
    let mut excluded: BTreeSet<EventId> = BTreeSet::new();

    if ours.is_delete_terminal() && theirs.is_delete_terminal() {
        // Both sides end deleted: a single DELETE wins. Keep the later
        // one, drop the other side's.
        let loser = if ours.last.order_key() >= theirs.last.order_key() {
            theirs.last
        } else {
            ours.last
        };
        excluded.insert(loser.id);
    } else if ours.has_delete || theirs.has_delete {
        target_conflicts.push(Conflict {
            conflict_type: ConflictType::DeleteUpdate,
            target: target.to_owned(),
            our_event: ours.last.clone(),
            their_event: theirs.last.clone(),
            field: None,
        });
    } else if let (Some(our_create), Some(their_create)) = (ours.create, theirs.create) {
        if create_image(our_create) == create_image(their_create) {
            // Identical creation: one copy is enough.
            excluded.insert(their_create.id);
        } else {
            target_conflicts.push(Conflict {
                conflict_type: ConflictType::CreateCreate,
                target: target.to_owned(),
                our_event: our_create.clone(),
                their_event: their_create.clone(),
                field: None,
            });
        }
    } else {
        // Field-level comparison.
        let mut fields = ours.touched_fields();
        fields.extend(theirs.touched_fields());
        for field in fields {
            let our_set = ours.sets.get(&field);
            let their_set = theirs.sets.get(&field);
            let our_ops = ours.ops.touches(&field);
            let their_ops = theirs.ops.touches(&field);
            let our_touched = our_set.is_some() || our_ops;
            let their_touched = their_set.is_some() || their_ops;
            if !(our_touched && their_touched) {
                continue;
            }
            match (our_set, their_set) {
                // Ops on both sides, no direct sets: fold when commutative.
                (None, None) => {
                    if sets_commute(&ours.ops, &theirs.ops, &field) {
                        auto_merged.push(AutoMerge {
                            target: target.to_owned(),
                            field: field.clone(),
                            detail: fold_description(&ours.ops, &theirs.ops, &field),
                        });
                    } else {
                        target_conflicts.push(field_conflict(target, &field, &ours, &theirs));
                    }
                }
                // Both set the field: equal values converge, different
                // values conflict.
                (Some((our_value, _)), Some((their_value, _))) => {
                    if our_value != their_value {
                        target_conflicts.push(field_conflict(target, &field, &ours, &theirs));
                    }
                }
                // A direct set racing an op is not commutative.
                _ => target_conflicts.push(field_conflict(target, &field, &ours, &theirs)),
            }
        }
    }

    // Apply the resolution strategy to whatever remains.
    if let Some(strategy) = opts.resolution_strategy {
        for conflict in target_conflicts.drain(..) {
            let winner = match strategy {
                ResolutionStrategy::Ours => Side::Ours,
                ResolutionStrategy::Theirs => Side::Theirs,
                ResolutionStrategy::Latest => {
                    if conflict.our_event.order_key() >= conflict.their_event.order_key() {
                        Side::Ours
                    } else {
                        Side::Theirs
                    }
                }
            };
            match conflict.conflict_type {
                // Delete vs update and create vs create are whole-target
                // fights: the losing side's stream drops out.
                ConflictType::DeleteUpdate | ConflictType::CreateCreate => {
                    let loser_events: &[Event] = match winner {
                        Side::Ours => their_events,
                        Side::Theirs => our_events,
                    };
                    excluded.extend(loser_events.iter().map(|e| e.id));
                }
                // Field fights drop only the losing event.
                ConflictType::ConcurrentUpdate => {
                    let loser_event = match winner {
                        Side::Ours => &conflict.their_event,
                        Side::Theirs => &conflict.our_event,
                    };
                    excluded.insert(loser_event.id);
                }
            }
            resolved.push(Resolution { conflict, winner });
        }
    }

    conflicts.extend(target_conflicts);
    merged.extend(
        our_events
            .iter()
            .chain(their_events.iter())
            .filter(|e| !excluded.contains(&e.id))
            .cloned(),
    );
}

fn field_conflict(
    target: &str,
    field: &str,
    ours: &SideEffect<'_>,
    theirs: &SideEffect<'_>,
) -> Conflict {
    Conflict {
        conflict_type: ConflictType::ConcurrentUpdate,
        target: target.to_owned(),
        our_event: (*ours.last_touch.get(field).unwrap_or(&ours.last)).clone(),
        their_event: (*theirs.last_touch.get(field).unwrap_or(&theirs.last)).clone(),
        field: Some(field.to_owned()),
    }
}

fn create_image(event: &Event) -> Option<&Document> {
    match &event.payload {
        EventPayload::Create { after } => Some(after),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
