//! The JSONL line union — data, rel, event, and schema lines.
//!
//! Every line in a namespace's segment stream is exactly one of four
//! shapes, distinguishable without a wrapper tag:
//!
//! | Line | Discriminating keys |
//! |------|---------------------|
//! | [`DataLine`]   | `$id`, `$op` ∈ {c,u,d} |
//! | [`RelLine`]    | `$op` ∈ {l,u} plus `f`/`p`/`r`/`t`, no `$id` |
//! | [`SchemaLine`] | `op` = `"s"` |
//! | event line     | `id`/`ts`/`ns`/`eid`/`op` (see [`Event`]) |
//!
//! For any well-formed line exactly one of the `is_*_line` classifiers
//! returns true, and `parse(serialize(line)) == line`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use loam_core::model::{
    CollectionSchema, Document, EntityId, Event, EventId, Migration, Namespace,
};

// ---------------------------------------------------------------------------
// DataLine
// ---------------------------------------------------------------------------

/// The `$op` of a data line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataOp {
    /// Create.
    #[serde(rename = "c")]
    Create,
    /// Update (shallow patch).
    #[serde(rename = "u")]
    Update,
    /// Delete — the line carries only system fields.
    #[serde(rename = "d")]
    Delete,
}

/// One document mutation in the columnar log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataLine {
    /// Full entity id, `<ns>/<local>`.
    #[serde(rename = "$id")]
    pub id: EntityId,
    /// The mutation kind.
    #[serde(rename = "$op")]
    pub op: DataOp,
    /// Entity version after this mutation.
    #[serde(rename = "$v")]
    pub version: u64,
    /// Mutation timestamp, ms since epoch.
    #[serde(rename = "$ts")]
    pub ts: u64,
    /// User fields: the full document for `c`, the patch for `u`, empty
    /// for `d`.
    #[serde(flatten)]
    pub fields: Document,
}

// ---------------------------------------------------------------------------
// RelLine
// ---------------------------------------------------------------------------

/// The `$op` of a rel line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    /// Link.
    #[serde(rename = "l")]
    Link,
    /// Unlink.
    #[serde(rename = "u")]
    Unlink,
}

/// A relationship tuple mutation: link or unlink from `f` via predicate `p`
/// (reverse predicate `r`) to `t`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelLine {
    /// Link or unlink.
    #[serde(rename = "$op")]
    pub op: RelOp,
    /// Mutation timestamp, ms since epoch.
    #[serde(rename = "$ts")]
    pub ts: u64,
    /// Source entity.
    pub f: EntityId,
    /// Forward predicate.
    pub p: String,
    /// Reverse predicate.
    pub r: String,
    /// Target entity.
    pub t: EntityId,
}

// ---------------------------------------------------------------------------
// SchemaLine
// ---------------------------------------------------------------------------

/// The literal `"s"` op tag of a schema line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaOp {
    #[default]
    #[serde(rename = "s")]
    Schema,
}

/// A schema-evolution record in the mutation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaLine {
    /// Unique, time-ordered id.
    pub id: EventId,
    /// Timestamp, ms since epoch.
    pub ts: u64,
    /// Always `"s"`.
    pub op: SchemaOp,
    /// The namespace whose schema changed.
    pub ns: Namespace,
    /// The new schema (complete, not a delta).
    pub schema: CollectionSchema,
    /// How rows written under the previous version are read.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub migration: Option<Migration>,
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// Any one line of a segment stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Line {
    /// A document mutation.
    Data(DataLine),
    /// A relationship mutation.
    Rel(RelLine),
    /// A schema evolution record.
    Schema(SchemaLine),
    /// A CDC event record.
    Event(Event),
}

impl Line {
    /// Serialize to a single JSONL line (no trailing newline).
    ///
    /// # Errors
    /// Serialization failures.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one line of JSONL.
    ///
    /// # Errors
    /// Returns an error when the line matches none of the four shapes.
    pub fn parse(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ---------------------------------------------------------------------------
// Classifiers
// ---------------------------------------------------------------------------

/// Whether `value` has the shape of a data line.
#[must_use]
pub fn is_data_line(value: &Value) -> bool {
    value.get("$id").is_some()
        && matches!(
            value.get("$op").and_then(Value::as_str),
            Some("c" | "u" | "d")
        )
}

/// Whether `value` has the shape of a rel line.
#[must_use]
pub fn is_rel_line(value: &Value) -> bool {
    value.get("$id").is_none()
        && matches!(value.get("$op").and_then(Value::as_str), Some("l" | "u"))
        && value.get("f").is_some()
        && value.get("t").is_some()
}

/// Whether `value` has the shape of a schema line.
#[must_use]
pub fn is_schema_line(value: &Value) -> bool {
    value.get("op").and_then(Value::as_str) == Some("s") && value.get("schema").is_some()
}

/// Whether `value` has the shape of an event line.
#[must_use]
pub fn is_event_line(value: &Value) -> bool {
    value.get("$op").is_none()
        && value.get("eid").is_some()
        && matches!(
            value.get("op").and_then(Value::as_str),
            Some("CREATE" | "UPDATE" | "DELETE" | "REL_CREATE" | "REL_DELETE")
        )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::model::{EventPayload, FieldDef, FieldType, Target};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn sample_data_line() -> DataLine {
        DataLine {
            id: EntityId::parse("posts/p1").unwrap(),
            op: DataOp::Update,
            version: 3,
            ts: 1_000,
            fields: doc(json!({"title": "Hello"})),
        }
    }

    fn sample_rel_line() -> RelLine {
        RelLine {
            op: RelOp::Link,
            ts: 1_000,
            f: EntityId::parse("posts/p1").unwrap(),
            p: "author".to_owned(),
            r: "posts".to_owned(),
            t: EntityId::parse("users/u1").unwrap(),
        }
    }

    fn sample_schema_line() -> SchemaLine {
        SchemaLine {
            id: EventId::generate(),
            ts: 1_000,
            op: SchemaOp::Schema,
            ns: Namespace::new("posts").unwrap(),
            schema: CollectionSchema {
                hash: "h".to_owned(),
                version: 2,
                fields: vec![FieldDef::optional("title", FieldType::String)],
            },
            migration: Some(Migration::default()),
        }
    }

    fn sample_event_line() -> Event {
        Event {
            id: EventId::generate(),
            ts: 1_000,
            target: Target::new(Namespace::new("posts").unwrap(), "p1"),
            actor: None,
            meta: None,
            payload: EventPayload::Create {
                after: doc(json!({"title": "Hello"})),
            },
        }
    }

    fn to_value(line: &Line) -> Value {
        serde_json::from_str(&line.to_json_string().unwrap()).unwrap()
    }

    // -- round trips --

    #[test]
    fn data_line_round_trip() {
        let line = Line::Data(sample_data_line());
        let json = line.to_json_string().unwrap();
        assert!(json.contains("\"$op\":\"u\""));
        assert!(json.contains("\"$v\":3"));
        assert_eq!(Line::parse(&json).unwrap(), line);
    }

    #[test]
    fn rel_line_round_trip() {
        let line = Line::Rel(sample_rel_line());
        let json = line.to_json_string().unwrap();
        assert!(json.contains("\"$op\":\"l\""));
        assert!(json.contains("\"f\":\"posts/p1\""));
        assert_eq!(Line::parse(&json).unwrap(), line);
    }

    #[test]
    fn schema_line_round_trip() {
        let line = Line::Schema(sample_schema_line());
        let json = line.to_json_string().unwrap();
        assert!(json.contains("\"op\":\"s\""));
        assert_eq!(Line::parse(&json).unwrap(), line);
    }

    #[test]
    fn event_line_round_trip() {
        let line = Line::Event(sample_event_line());
        let json = line.to_json_string().unwrap();
        assert!(json.contains("\"op\":\"CREATE\""));
        assert_eq!(Line::parse(&json).unwrap(), line);
    }

    #[test]
    fn delete_data_line_carries_only_system_fields() {
        let line = DataLine {
            id: EntityId::parse("posts/p1").unwrap(),
            op: DataOp::Delete,
            version: 4,
            ts: 2_000,
            fields: Document::new(),
        };
        let json = serde_json::to_string(&line).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 4, "only $id/$op/$v/$ts");
    }

    // -- exactly-one classification --

    #[test]
    fn each_line_matches_exactly_one_classifier() {
        let lines = [
            Line::Data(sample_data_line()),
            Line::Rel(sample_rel_line()),
            Line::Schema(sample_schema_line()),
            Line::Event(sample_event_line()),
        ];
        for line in &lines {
            let value = to_value(line);
            let matches = [
                is_data_line(&value),
                is_rel_line(&value),
                is_schema_line(&value),
                is_event_line(&value),
            ];
            let count = matches.iter().filter(|&&m| m).count();
            assert_eq!(count, 1, "expected exactly one classifier for {line:?}, got {matches:?}");
        }
    }

    #[test]
    fn rel_update_op_does_not_classify_as_data() {
        // "$op":"u" is shared between data updates and rel unlinks; the
        // presence of "$id" is what distinguishes them.
        let unlink = RelLine {
            op: RelOp::Unlink,
            ..sample_rel_line()
        };
        let value = to_value(&Line::Rel(unlink));
        assert!(is_rel_line(&value));
        assert!(!is_data_line(&value));
    }

    #[test]
    fn untagged_parse_picks_the_right_variant() {
        let value = to_value(&Line::Rel(sample_rel_line()));
        match Line::parse(&value.to_string()).unwrap() {
            Line::Rel(_) => {}
            other => panic!("expected Rel, got {other:?}"),
        }
        let value = to_value(&Line::Schema(sample_schema_line()));
        match Line::parse(&value.to_string()).unwrap() {
            Line::Schema(_) => {}
            other => panic!("expected Schema, got {other:?}"),
        }
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(Line::parse("{\"unrelated\": true}").is_err());
        assert!(Line::parse("not json").is_err());
    }
}
