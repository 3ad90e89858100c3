//! Splits a nested "consolidated state" payload — the shape a bootstrap
//! `REPLY` carries, with included relations inlined — into one confirmed
//! `INSERT` mutation per entity (§4.2.5).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value as JsonValue;
use sync_schema::{FieldValue, MutationPayload, SchemaRegistry};
use sync_wire::Procedure;

use crate::error::StoreError;
use crate::types::DefaultMutation;

/// One flattened `INSERT` ready to be folded into the store.
pub(crate) struct FlattenedInsert {
    pub resource: String,
    pub mutation: DefaultMutation,
}

/// Recursively walks `payload_json` (a materialized entity with relations
/// inlined), producing an `INSERT` for every nested entity it finds before
/// the one for `resource` itself, so targets exist by the time relation
/// maintenance runs on the parent's own local-column fields.
pub(crate) fn flatten<'a>(
    schema: &'a SchemaRegistry,
    resource: &'a str,
    payload_json: JsonValue,
    out: &'a mut Vec<FlattenedInsert>,
) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + 'a>> {
    Box::pin(async move {
        let JsonValue::Object(mut obj) = payload_json else {
            return Err(StoreError::MissingId);
        };
        let id = obj
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(StoreError::MissingId)?;

        let entity_schema = schema.get(resource)?.clone();
        for (relation_name, relation_spec) in &entity_schema.relations {
            let Some(value) = obj.remove(relation_name) else {
                continue;
            };
            match relation_spec {
                sync_schema::RelationSpec::One { target, .. } => {
                    if value.is_object() {
                        let nested = value.get("value").cloned().unwrap_or(value);
                        if nested.is_object() {
                            flatten(schema, target, nested, out).await?;
                        }
                    }
                }
                sync_schema::RelationSpec::Many { target, .. } => {
                    let items = value
                        .get("value")
                        .and_then(|v| v.as_array())
                        .cloned()
                        .or_else(|| value.as_array().cloned())
                        .unwrap_or_default();
                    for item in items {
                        if item.is_object() {
                            flatten(schema, target, item, out).await?;
                        }
                    }
                }
            }
        }

        let mut fields = BTreeMap::new();
        for (key, value) in obj {
            let field: FieldValue =
                serde_json::from_value(value).map_err(|_| StoreError::MalformedField(key.clone()))?;
            fields.insert(key, field);
        }
        let payload = MutationPayload::new(fields)?;

        out.push(FlattenedInsert {
            resource: resource.to_string(),
            mutation: DefaultMutation {
                id: format!("bootstrap:{resource}:{id}"),
                resource: resource.to_string(),
                resource_id: id,
                procedure: Procedure::Insert,
                payload,
            },
        });
        Ok(())
    })
}
