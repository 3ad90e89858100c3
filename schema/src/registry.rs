use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::relation::RelationSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub scalar_type: ScalarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub fields: BTreeMap<String, FieldSpec>,
    pub relations: BTreeMap<String, RelationSpec>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, spec: RelationSpec) -> Self {
        self.relations.insert(name.into(), spec);
        self
    }

    /// `{ localColumn -> relationName }` for every `one` relation (§4.2.2).
    pub fn one_relations_by_local_column(&self) -> BTreeMap<&str, (&str, &str)> {
        self.relations
            .iter()
            .filter_map(|(name, spec)| match spec {
                RelationSpec::One {
                    target,
                    local_column,
                } => Some((local_column.as_str(), (name.as_str(), target.as_str()))),
                RelationSpec::Many { .. } => None,
            })
            .collect()
    }

    /// Edge names to pre-seed an incoming-many reverse map with when a node
    /// of this type is created (§3, §4.1): the `target` type of each `many`
    /// relation this entity declares on itself is the type of node that
    /// will later link back to it.
    pub fn incoming_many_edge_types(&self) -> Vec<String> {
        self.relations
            .values()
            .filter(|spec| spec.is_many())
            .map(|spec| spec.target().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: EntitySchema) {
        self.entities.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, resource: &str) -> Result<&EntitySchema, SchemaError> {
        self.entities
            .get(resource)
            .ok_or_else(|| SchemaError::UnknownResource(resource.to_string()))
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Stable content hash over sorted entity name + field spec (§6
    /// Persisted state layout) used to decide whether the client disk
    /// cache's schema version must bump. Relations are intentionally
    /// excluded, matching the spec's literal wording.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for (name, schema) in &self.entities {
            hasher.update(name.as_bytes());
            let fields_json =
                serde_json::to_vec(&schema.fields).expect("field specs are always serializable");
            hasher.update(&fields_json);
        }
        let digest = hasher.finalize();
        u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_orgs_schemas() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            EntitySchema::new("orgs")
                .with_field(
                    "name",
                    FieldSpec {
                        scalar_type: ScalarType::String,
                        default: None,
                    },
                )
                .with_relation(
                    "users",
                    RelationSpec::Many {
                        target: "users".into(),
                        foreign_column: "orgId".into(),
                    },
                ),
        );
        registry.register(
            EntitySchema::new("users")
                .with_field(
                    "name",
                    FieldSpec {
                        scalar_type: ScalarType::String,
                        default: None,
                    },
                )
                .with_relation(
                    "org",
                    RelationSpec::One {
                        target: "orgs".into(),
                        local_column: "orgId".into(),
                    },
                ),
        );
        registry
    }

    #[test]
    fn incoming_many_edges_come_from_declared_many_relations() {
        let registry = users_orgs_schemas();
        let orgs = registry.get("orgs").unwrap();
        assert_eq!(orgs.incoming_many_edge_types(), vec!["users".to_string()]);
        let users = registry.get("users").unwrap();
        assert!(users.incoming_many_edge_types().is_empty());
    }

    #[test]
    fn one_relations_indexed_by_local_column() {
        let registry = users_orgs_schemas();
        let users = registry.get("users").unwrap();
        let map = users.one_relations_by_local_column();
        assert_eq!(map.get("orgId"), Some(&("org", "orgs")));
    }

    #[test]
    fn content_hash_changes_when_fields_change() {
        let mut registry = users_orgs_schemas();
        let before = registry.content_hash();
        registry.register(EntitySchema::new("orgs").with_field(
            "description",
            FieldSpec {
                scalar_type: ScalarType::String,
                default: None,
            },
        ));
        let after = registry.content_hash();
        assert_ne!(before, after);
    }

    #[test]
    fn unknown_resource_is_an_error() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.get("ghosts"),
            Err(SchemaError::UnknownResource(_))
        ));
    }
}
