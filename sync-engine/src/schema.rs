//! The schema this binary serves. A real deployment supplies its own
//! `SchemaRegistry`; this reference one exists so the binary has something
//! to boot against (schema-validation DSL / config loading is out of
//! scope, §1 Non-goals).

use sync_schema::{EntitySchema, FieldSpec, RelationSpec, ScalarType, SchemaRegistry};

pub fn demo_schema() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();

    registry.register(EntitySchema::new("orgs").with_field(
        "name",
        FieldSpec {
            scalar_type: ScalarType::String,
            default: None,
        },
    ));

    registry.register(
        EntitySchema::new("users")
            .with_field(
                "name",
                FieldSpec {
                    scalar_type: ScalarType::String,
                    default: None,
                },
            )
            .with_field(
                "orgId",
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

    registry.register(
        EntitySchema::new("posts")
            .with_field(
                "title",
                FieldSpec {
                    scalar_type: ScalarType::String,
                    default: None,
                },
            )
            .with_field(
                "likes",
                FieldSpec {
                    scalar_type: ScalarType::Number,
                    default: Some(serde_json::json!(0)),
                },
            )
            .with_field(
                "authorId",
                FieldSpec {
                    scalar_type: ScalarType::String,
                    default: None,
                },
            )
            .with_relation(
                "author",
                RelationSpec::One {
                    target: "users".into(),
                    local_column: "authorId".into(),
                },
            ),
    );

    registry
}
