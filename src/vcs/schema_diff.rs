//! Schema-evolution diff — compare two snapshots, classify what changed.
//!
//! There is no native rename detection: a rename surfaces as REMOVE_FIELD
//! plus ADD_FIELD. Breaking changes carry a severity, a plain-language
//! impact, and a migration hint the CLI can print verbatim.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use loam_core::model::{FieldDef, SchemaSnapshot};

// ---------------------------------------------------------------------------
// Change model
// ---------------------------------------------------------------------------

/// What kind of change a diff entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    AddCollection,
    DropCollection,
    AddField,
    RemoveField,
    ChangeType,
    ChangeRequired,
    AddIndex,
    RemoveIndex,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddCollection => "ADD_COLLECTION",
            Self::DropCollection => "DROP_COLLECTION",
            Self::AddField => "ADD_FIELD",
            Self::RemoveField => "REMOVE_FIELD",
            Self::ChangeType => "CHANGE_TYPE",
            Self::ChangeRequired => "CHANGE_REQUIRED",
            Self::AddIndex => "ADD_INDEX",
            Self::RemoveIndex => "REMOVE_INDEX",
        };
        f.write_str(name)
    }
}

/// One observed difference between two snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// The change kind.
    pub kind: ChangeKind,
    /// The collection the change is in.
    pub collection: String,
    /// The field, when field-scoped.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field: Option<String>,
    /// Human-readable description.
    pub detail: String,
}

/// How badly a breaking change bites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A change that existing data or readers cannot absorb silently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    /// The underlying change.
    #[serde(flatten)]
    pub change: SchemaChange,
    /// How bad it is.
    pub severity: Severity,
    /// What breaks.
    pub impact: String,
    /// What to do about it.
    #[serde(rename = "migrationHint")]
    pub migration_hint: String,
}

/// The full result of a diff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChanges {
    /// Every change, in collection order.
    pub changes: Vec<SchemaChange>,
    /// The subset that is breaking, most severe first.
    #[serde(rename = "breakingChanges")]
    pub breaking_changes: Vec<BreakingChange>,
    /// Whether the after-snapshot is compatible (no breaking changes).
    pub compatible: bool,
    /// One-line summary.
    pub summary: String,
}

impl SchemaChanges {
    /// `true` when there are no breaking changes.
    #[must_use]
    pub fn is_safe_to_apply(&self) -> bool {
        self.breaking_changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compare two schema snapshots.
#[must_use]
pub fn diff_schemas(before: &SchemaSnapshot, after: &SchemaSnapshot) -> SchemaChanges {
    let mut changes = Vec::new();

    for (name, after_schema) in &after.collections {
        match before.collections.get(name) {
            None => changes.push(SchemaChange {
                kind: ChangeKind::AddCollection,
                collection: name.clone(),
                field: None,
                detail: format!("collection '{name}' added"),
            }),
            Some(before_schema) => {
                diff_fields(name, &before_schema.fields, &after_schema.fields, &mut changes);
            }
        }
    }
    for name in before.collections.keys() {
        if !after.collections.contains_key(name) {
            changes.push(SchemaChange {
                kind: ChangeKind::DropCollection,
                collection: name.clone(),
                field: None,
                detail: format!("collection '{name}' dropped"),
            });
        }
    }

    let mut breaking_changes = detect_breaking_changes(&changes, after);
    breaking_changes.sort_by(|a, b| b.severity.cmp(&a.severity));
    let compatible = breaking_changes.is_empty();
    let summary = format!(
        "{} change(s), {} breaking",
        changes.len(),
        breaking_changes.len()
    );
    SchemaChanges {
        changes,
        breaking_changes,
        compatible,
        summary,
    }
}

fn diff_fields(
    collection: &str,
    before: &[FieldDef],
    after: &[FieldDef],
    changes: &mut Vec<SchemaChange>,
) {
    for field in after {
        let Some(prior) = before.iter().find(|f| f.name == field.name) else {
            changes.push(SchemaChange {
                kind: ChangeKind::AddField,
                collection: collection.to_owned(),
                field: Some(field.name.clone()),
                detail: format!(
                    "field '{}' added ({}{})",
                    field.name,
                    field.field_type,
                    if field.required { ", required" } else { "" }
                ),
            });
            continue;
        };
        if prior.field_type != field.field_type {
            changes.push(SchemaChange {
                kind: ChangeKind::ChangeType,
                collection: collection.to_owned(),
                field: Some(field.name.clone()),
                detail: format!(
                    "field '{}' changed type {} → {}",
                    field.name, prior.field_type, field.field_type
                ),
            });
        }
        if prior.required != field.required {
            changes.push(SchemaChange {
                kind: ChangeKind::ChangeRequired,
                collection: collection.to_owned(),
                field: Some(field.name.clone()),
                detail: format!(
                    "field '{}' required {} → {}",
                    field.name, prior.required, field.required
                ),
            });
        }
        if prior.indexed != field.indexed {
            changes.push(SchemaChange {
                kind: if field.indexed {
                    ChangeKind::AddIndex
                } else {
                    ChangeKind::RemoveIndex
                },
                collection: collection.to_owned(),
                field: Some(field.name.clone()),
                detail: format!(
                    "field '{}' index {}",
                    field.name,
                    if field.indexed { "added" } else { "removed" }
                ),
            });
        }
    }
    for field in before {
        if !after.iter().any(|f| f.name == field.name) {
            changes.push(SchemaChange {
                kind: ChangeKind::RemoveField,
                collection: collection.to_owned(),
                field: Some(field.name.clone()),
                detail: format!("field '{}' removed", field.name),
            });
        }
    }
}

/// Attach severity, impact, and a migration hint to each breaking change.
#[must_use]
pub fn detect_breaking_changes(
    changes: &[SchemaChange],
    after: &SchemaSnapshot,
) -> Vec<BreakingChange> {
    let mut out = Vec::new();
    for change in changes {
        let field_def = change.field.as_deref().and_then(|field| {
            after
                .collections
                .get(&change.collection)
                .and_then(|c| c.field(field))
        });
        let breaking = match change.kind {
            ChangeKind::AddCollection | ChangeKind::AddIndex | ChangeKind::RemoveIndex => None,
            ChangeKind::DropCollection => Some((
                Severity::Critical,
                "all rows in the collection become unreachable".to_owned(),
                "export the collection before applying, or keep it and mark it deprecated"
                    .to_owned(),
            )),
            ChangeKind::AddField => match field_def {
                Some(def) if def.required && def.default.is_some() => Some((
                    Severity::High,
                    "existing rows lack the field until rewritten with the default".to_owned(),
                    "run a backfill migration applying the declared default".to_owned(),
                )),
                Some(def) if def.required => Some((
                    Severity::High,
                    "existing rows lack the required field and fail validation".to_owned(),
                    "declare a default, or backfill the field before requiring it".to_owned(),
                )),
                _ => None,
            },
            ChangeKind::RemoveField => Some((
                Severity::High,
                "readers of the field lose it; old rows keep dead bytes until compaction"
                    .to_owned(),
                "if this is a rename, add the new field first and migrate values".to_owned(),
            )),
            ChangeKind::ChangeType => Some((
                Severity::Critical,
                "existing values no longer match the declared type".to_owned(),
                "add a new field of the new type and migrate values instead".to_owned(),
            )),
            ChangeKind::ChangeRequired => match field_def {
                Some(def) if def.required => Some((
                    Severity::High,
                    "rows missing the field fail validation".to_owned(),
                    "backfill the field before making it required".to_owned(),
                )),
                _ => None,
            },
        };
        if let Some((severity, impact, migration_hint)) = breaking {
            out.push(BreakingChange {
                change: change.clone(),
                severity,
                impact,
                migration_hint,
            });
        }
    }
    out
}

/// Group changes for display: Collections, Fields, Indexes, Type Changes.
#[must_use]
pub fn categorize_changes(changes: &[SchemaChange]) -> BTreeMap<String, Vec<SchemaChange>> {
    let mut out: BTreeMap<String, Vec<SchemaChange>> = BTreeMap::new();
    for change in changes {
        let bucket = match change.kind {
            ChangeKind::AddCollection | ChangeKind::DropCollection => "Collections",
            ChangeKind::AddField | ChangeKind::RemoveField | ChangeKind::ChangeRequired => "Fields",
            ChangeKind::AddIndex | ChangeKind::RemoveIndex => "Indexes",
            ChangeKind::ChangeType => "Type Changes",
        };
        out.entry(bucket.to_owned()).or_default().push(change.clone());
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::model::{CollectionSchema, FieldType};
    use serde_json::json;

    fn snapshot(collections: &[(&str, Vec<FieldDef>)]) -> SchemaSnapshot {
        SchemaSnapshot {
            hash: "h".to_owned(),
            captured_at: 0,
            collections: collections
                .iter()
                .map(|(name, fields)| {
                    (
                        (*name).to_owned(),
                        CollectionSchema {
                            hash: "c".to_owned(),
                            version: 1,
                            fields: fields.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn field(name: &str, field_type: FieldType) -> FieldDef {
        FieldDef::optional(name, field_type)
    }

    // -- identity --

    #[test]
    fn identical_snapshots_diff_empty_and_compatible() {
        let snap = snapshot(&[("posts", vec![field("title", FieldType::String)])]);
        let diff = diff_schemas(&snap, &snap);
        assert!(diff.changes.is_empty());
        assert!(diff.compatible);
        assert!(diff.is_safe_to_apply());
    }

    #[test]
    fn compatible_implies_safe_to_apply() {
        let before = snapshot(&[("posts", vec![])]);
        let after = snapshot(&[("posts", vec![field("title", FieldType::String)])]);
        let diff = diff_schemas(&before, &after);
        assert!(diff.compatible);
        assert!(diff.is_safe_to_apply());
    }

    // -- collection changes --

    #[test]
    fn add_collection_is_safe() {
        let diff = diff_schemas(&snapshot(&[]), &snapshot(&[("posts", vec![])]));
        assert_eq!(diff.changes[0].kind, ChangeKind::AddCollection);
        assert!(diff.compatible);
    }

    #[test]
    fn drop_collection_is_critical() {
        let diff = diff_schemas(&snapshot(&[("posts", vec![])]), &snapshot(&[]));
        assert_eq!(diff.changes[0].kind, ChangeKind::DropCollection);
        assert!(!diff.compatible);
        assert_eq!(diff.breaking_changes[0].severity, Severity::Critical);
    }

    // -- field changes --

    #[test]
    fn optional_field_add_is_safe() {
        let before = snapshot(&[("posts", vec![])]);
        let after = snapshot(&[("posts", vec![field("views", FieldType::Number)])]);
        let diff = diff_schemas(&before, &after);
        assert_eq!(diff.changes[0].kind, ChangeKind::AddField);
        assert!(diff.compatible);
    }

    #[test]
    fn required_field_add_with_default_is_high() {
        let mut required = field("status", FieldType::String);
        required.required = true;
        required.default = Some(json!("draft"));
        let diff = diff_schemas(&snapshot(&[("posts", vec![])]), &snapshot(&[("posts", vec![required])]));
        assert!(!diff.compatible);
        assert_eq!(diff.breaking_changes[0].severity, Severity::High);
        assert!(diff.breaking_changes[0].impact.contains("existing rows"));
    }

    #[test]
    fn required_field_add_without_default_is_breaking() {
        let mut required = field("status", FieldType::String);
        required.required = true;
        let diff = diff_schemas(&snapshot(&[("posts", vec![])]), &snapshot(&[("posts", vec![required])]));
        assert!(!diff.is_safe_to_apply());
        assert!(diff.breaking_changes[0].migration_hint.contains("default"));
    }

    #[test]
    fn remove_field_is_high() {
        let before = snapshot(&[("posts", vec![field("old", FieldType::String)])]);
        let after = snapshot(&[("posts", vec![])]);
        let diff = diff_schemas(&before, &after);
        assert_eq!(diff.changes[0].kind, ChangeKind::RemoveField);
        assert_eq!(diff.breaking_changes[0].severity, Severity::High);
    }

    #[test]
    fn type_change_is_critical() {
        let before = snapshot(&[("posts", vec![field("views", FieldType::String)])]);
        let after = snapshot(&[("posts", vec![field("views", FieldType::Number)])]);
        let diff = diff_schemas(&before, &after);
        assert_eq!(diff.changes[0].kind, ChangeKind::ChangeType);
        assert_eq!(diff.breaking_changes[0].severity, Severity::Critical);
    }

    #[test]
    fn required_flip_directions() {
        let optional = field("x", FieldType::String);
        let mut required = field("x", FieldType::String);
        required.required = true;

        // false → true: breaking.
        let diff = diff_schemas(
            &snapshot(&[("posts", vec![optional.clone()])]),
            &snapshot(&[("posts", vec![required.clone()])]),
        );
        assert!(!diff.compatible);
        assert_eq!(diff.breaking_changes[0].severity, Severity::High);

        // true → false: safe.
        let diff = diff_schemas(
            &snapshot(&[("posts", vec![required])]),
            &snapshot(&[("posts", vec![optional])]),
        );
        assert_eq!(diff.changes[0].kind, ChangeKind::ChangeRequired);
        assert!(diff.compatible);
    }

    #[test]
    fn index_changes_are_safe() {
        let plain = field("title", FieldType::String);
        let mut indexed = field("title", FieldType::String);
        indexed.indexed = true;
        let diff = diff_schemas(
            &snapshot(&[("posts", vec![plain.clone()])]),
            &snapshot(&[("posts", vec![indexed.clone()])]),
        );
        assert_eq!(diff.changes[0].kind, ChangeKind::AddIndex);
        assert!(diff.compatible);
        let diff = diff_schemas(
            &snapshot(&[("posts", vec![indexed])]),
            &snapshot(&[("posts", vec![plain])]),
        );
        assert_eq!(diff.changes[0].kind, ChangeKind::RemoveIndex);
        assert!(diff.compatible);
    }

    #[test]
    fn rename_surfaces_as_remove_plus_add() {
        let before = snapshot(&[("posts", vec![field("body", FieldType::String)])]);
        let after = snapshot(&[("posts", vec![field("content", FieldType::String)])]);
        let diff = diff_schemas(&before, &after);
        let kinds: Vec<ChangeKind> = diff.changes.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChangeKind::AddField));
        assert!(kinds.contains(&ChangeKind::RemoveField));
    }

    // -- ordering / grouping --

    #[test]
    fn breaking_changes_sort_most_severe_first() {
        let mut required = field("status", FieldType::String);
        required.required = true;
        let before = snapshot(&[
            ("posts", vec![field("views", FieldType::String)]),
            ("users", vec![]),
        ]);
        let after = snapshot(&[(
            "posts",
            vec![field("views", FieldType::Number), required],
        )]);
        let diff = diff_schemas(&before, &after);
        assert!(diff.breaking_changes.len() >= 2);
        assert_eq!(diff.breaking_changes[0].severity, Severity::Critical);
    }

    #[test]
    fn categorize_buckets_by_kind() {
        let mut indexed = field("title", FieldType::String);
        indexed.indexed = true;
        let before = snapshot(&[("posts", vec![field("title", FieldType::String), field("n", FieldType::String)])]);
        let after = snapshot(&[
            ("posts", vec![indexed, field("n", FieldType::Number)]),
            ("users", vec![]),
        ]);
        let diff = diff_schemas(&before, &after);
        let buckets = categorize_changes(&diff.changes);
        assert!(buckets.contains_key("Collections"));
        assert!(buckets.contains_key("Indexes"));
        assert!(buckets.contains_key("Type Changes"));
    }

    #[test]
    fn summary_counts_changes() {
        let diff = diff_schemas(&snapshot(&[("a", vec![])]), &snapshot(&[]));
        assert_eq!(diff.summary, "1 change(s), 1 breaking");
    }
}
