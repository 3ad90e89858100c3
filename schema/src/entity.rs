use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SchemaError;
use crate::field::FieldValue;

/// A payload of field envelopes destined for a mutation. Never carries `id`
/// (§3 Mutation payload) — `id` is re-set from the mutation's `resourceId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationPayload(BTreeMap<String, FieldValue>);

impl MutationPayload {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Result<Self, SchemaError> {
        if fields.contains_key("id") {
            return Err(SchemaError::IdInPayload);
        }
        Ok(Self(fields))
    }

    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        let field = field.into();
        debug_assert_ne!(field, "id", "id must never enter a mutation payload");
        self.0.insert(field, value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.0
    }
}

/// A materialized entity: `{ id, field1: envelope, field2: envelope, ... }`
/// (§3 Materialized entity). `id` is never itself a mergeable envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Apply a payload on top of this entity under per-field LWW. Returns
    /// the merged entity and the list of field names whose incoming value
    /// was accepted.
    pub fn merge_payload(&self, payload: &MutationPayload) -> (Entity, Vec<String>) {
        let mut merged = self.clone();
        let mut accepted = Vec::new();

        for (name, incoming) in payload.iter() {
            let stored = merged
                .fields
                .get(name)
                .cloned()
                .unwrap_or_else(|| FieldValue {
                    value: None,
                    meta: None,
                });
            if let Some(value) = stored.merge(incoming).into_accepted() {
                merged.fields.insert(name.clone(), value);
                accepted.push(name.clone());
            }
        }

        (merged, accepted)
    }

    /// Render the entity as a plain `{ field: value }` JSON object, the
    /// shape clients and query results expose (envelopes are an internal
    /// storage detail — §6 Payload encoding only requires `id` + `_meta` on
    /// the wire for mutation payloads, not on materialized query results).
    pub fn to_json(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        obj.insert("id".to_string(), JsonValue::String(self.id.clone()));
        for (name, field) in &self.fields {
            obj.insert(
                name.clone(),
                field.value.clone().unwrap_or(JsonValue::Null),
            );
        }
        JsonValue::Object(obj)
    }
}
