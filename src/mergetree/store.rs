//! The in-memory entity projection.
//!
//! Maps local entity id → latest materialized state for one namespace. The
//! engine folds every appended data line into the projection immediately
//! after the line lands, so the projection never lags a successful append.

use std::collections::BTreeMap;

use serde_json::Value;

use loam_core::model::{merge_shallow, Document, Entity};

use super::line::{DataLine, DataOp};

/// Per-namespace projection of the mutation log.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<String, Entity>,
}

impl EntityStore {
    /// An empty projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity directly (from a compacted blob).
    pub fn seed(&mut self, entity: Entity) {
        self.entities.insert(entity.id.local().to_owned(), entity);
    }

    /// Fold one data line into the projection.
    pub fn apply(&mut self, line: &DataLine) {
        let local = line.id.local().to_owned();
        match line.op {
            DataOp::Create => {
                let previous_version = self.entities.get(&local).map(|e| e.version);
                self.entities.insert(
                    local,
                    Entity {
                        id: line.id.clone(),
                        entity_type: extract_type(&line.fields).unwrap_or_default(),
                        version: previous_version.map_or(line.version, |v| v.max(line.version)),
                        created_at: line.ts,
                        updated_at: line.ts,
                        created_by: None,
                        updated_by: None,
                        deleted_at: None,
                        fields: strip_system_fields(&line.fields),
                    },
                );
            }
            DataOp::Update => {
                let entity = self.entities.entry(local).or_insert_with(|| Entity {
                    id: line.id.clone(),
                    entity_type: String::new(),
                    version: 0,
                    created_at: line.ts,
                    updated_at: line.ts,
                    created_by: None,
                    updated_by: None,
                    deleted_at: None,
                    fields: Document::new(),
                });
                merge_shallow(&mut entity.fields, &strip_system_fields(&line.fields));
                if let Some(entity_type) = extract_type(&line.fields) {
                    entity.entity_type = entity_type;
                }
                entity.version = entity.version.max(line.version);
                entity.updated_at = line.ts;
            }
            DataOp::Delete => {
                if let Some(entity) = self.entities.get_mut(&line.id.local().to_owned()) {
                    entity.deleted_at = Some(line.ts);
                    entity.version = entity.version.max(line.version);
                    entity.updated_at = line.ts;
                }
            }
        }
    }

    /// The entity at `local`, deleted or not.
    #[must_use]
    pub fn get(&self, local: &str) -> Option<&Entity> {
        self.entities.get(local)
    }

    /// All entities that are not deleted, in id order.
    #[must_use]
    pub fn live(&self) -> Vec<&Entity> {
        self.entities.values().filter(|e| !e.is_deleted()).collect()
    }

    /// Total tracked entities (tombstones included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the projection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn extract_type(doc: &Document) -> Option<String> {
    doc.get("$type").and_then(Value::as_str).map(str::to_owned)
}

fn strip_system_fields(doc: &Document) -> Document {
    doc.iter()
        .filter(|(k, _)| !k.starts_with('$'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::model::EntityId;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn line(op: DataOp, version: u64, ts: u64, fields: Value) -> DataLine {
        DataLine {
            id: EntityId::parse("posts/p1").unwrap(),
            op,
            version,
            ts,
            fields: doc(fields),
        }
    }

    #[test]
    fn create_then_update_then_delete() {
        let mut store = EntityStore::new();
        store.apply(&line(DataOp::Create, 1, 10, json!({"$type": "Post", "title": "A"})));
        store.apply(&line(DataOp::Update, 2, 20, json!({"title": "B"})));

        let entity = store.get("p1").unwrap();
        assert_eq!(entity.entity_type, "Post");
        assert_eq!(entity.fields["title"], json!("B"));
        assert_eq!(entity.version, 2);
        assert_eq!(store.live().len(), 1);

        store.apply(&line(DataOp::Delete, 3, 30, json!({})));
        assert!(store.get("p1").unwrap().is_deleted());
        assert!(store.live().is_empty());
        assert_eq!(store.len(), 1, "tombstone is still tracked");
    }

    #[test]
    fn create_replaces_existing_fields() {
        let mut store = EntityStore::new();
        store.apply(&line(DataOp::Create, 1, 10, json!({"a": 1, "b": 2})));
        store.apply(&line(DataOp::Create, 2, 20, json!({"a": 9})));
        let entity = store.get("p1").unwrap();
        assert_eq!(entity.fields["a"], json!(9));
        assert!(!entity.fields.contains_key("b"));
    }

    #[test]
    fn update_on_unknown_entity_materializes_it() {
        let mut store = EntityStore::new();
        store.apply(&line(DataOp::Update, 1, 10, json!({"x": true})));
        assert_eq!(store.get("p1").unwrap().fields["x"], json!(true));
    }

    #[test]
    fn delete_on_unknown_entity_is_a_no_op() {
        let mut store = EntityStore::new();
        store.apply(&line(DataOp::Delete, 1, 10, json!({})));
        assert!(store.is_empty());
    }

    #[test]
    fn seed_then_apply_continues_from_seeded_state() {
        let mut store = EntityStore::new();
        store.seed(Entity {
            id: EntityId::parse("posts/p1").unwrap(),
            entity_type: "Post".to_owned(),
            version: 7,
            created_at: 1,
            updated_at: 5,
            created_by: None,
            updated_by: None,
            deleted_at: None,
            fields: doc(json!({"title": "Seeded"})),
        });
        store.apply(&line(DataOp::Update, 8, 50, json!({"title": "Fresh"})));
        let entity = store.get("p1").unwrap();
        assert_eq!(entity.version, 8);
        assert_eq!(entity.fields["title"], json!("Fresh"));
        assert_eq!(entity.created_at, 1);
    }
}
