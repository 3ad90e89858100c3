//! Query evaluation against the optimistic pool (§4.2.6): candidate-id
//! derivation, include-tree materialization, sort, and the where/limit pass.

use std::cmp::Ordering;

use serde_json::{json, Value as JsonValue};
use sync_graph::{NodeKey, ReverseEdge};
use sync_schema::{Entity, RelationSpec, SchemaRegistry};
use sync_wire::{FieldMatch, Include, IncludeTree, Query, SortDirection, SortKey, WhereClause};

use crate::types::StoreState;

enum IdSelector {
    All,
    One(String),
    Many(Vec<String>),
}

/// `where.id`'s shape decides the candidate set (§4.2.6 step 2): a bare
/// scalar or `$eq` narrows to one id, `$in` to a list, anything else (or no
/// `id` clause at all) falls back to every id in the resource's pool — still
/// correct since the later where/limit pass re-filters the materialized
/// result, just less of a shortcut.
fn extract_id_selector(where_clause: Option<&WhereClause>) -> IdSelector {
    let Some(clause) = where_clause else {
        return IdSelector::All;
    };
    let top_level: Vec<&WhereClause> = match clause {
        WhereClause::And(items) => items.iter().collect(),
        other => vec![other],
    };
    for item in top_level {
        if let WhereClause::Field(name, field_match) = item {
            if name == "id" {
                return match field_match {
                    FieldMatch::Eq(v) => v
                        .as_str()
                        .map(|s| IdSelector::One(s.to_string()))
                        .unwrap_or(IdSelector::All),
                    FieldMatch::In(items) => {
                        IdSelector::Many(items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    }
                    _ => IdSelector::All,
                };
            }
        }
    }
    IdSelector::All
}

pub(crate) fn candidate_ids(state: &StoreState, query: &Query) -> Vec<String> {
    let Some(pool) = state.optimistic.get(&query.resource) else {
        return Vec::new();
    };
    match extract_id_selector(query.r#where.as_ref()) {
        IdSelector::All => pool.keys().cloned().collect(),
        IdSelector::One(id) => {
            if pool.contains_key(&id) {
                vec![id]
            } else {
                Vec::new()
            }
        }
        IdSelector::Many(ids) => ids.into_iter().filter(|id| pool.contains_key(id)).collect(),
    }
}

/// Materializes one entity and its included relations, recursively. Missing
/// nodes (not present in the optimistic pool) yield `None`.
pub(crate) fn materialize(
    state: &StoreState,
    schema: &SchemaRegistry,
    resource: &str,
    id: &str,
    include: Option<&IncludeTree>,
) -> Option<JsonValue> {
    let entity = state.optimistic.get(resource)?.get(id)?;
    let mut obj = entity.to_json();
    if let (Some(tree), Ok(entity_schema)) = (include, schema.get(resource)) {
        let JsonValue::Object(map) = &mut obj else {
            unreachable!("Entity::to_json always returns an object")
        };
        for (relation_name, inc) in tree {
            let Some(relation_spec) = entity_schema.relations.get(relation_name) else {
                continue;
            };
            if matches!(inc, Include::Flag(false)) {
                continue;
            }
            let nested_include = match inc {
                Include::Nested(nested) => Some(nested),
                _ => None,
            };
            match relation_spec {
                RelationSpec::One { target, local_column } => {
                    let value = entity
                        .fields
                        .get(local_column)
                        .and_then(|f| f.value.as_ref())
                        .and_then(|v| v.as_str())
                        .and_then(|target_id| materialize(state, schema, target, target_id, nested_include));
                    map.insert(relation_name.clone(), json!({ "value": value }));
                }
                RelationSpec::Many { target, .. } => {
                    let source_key = NodeKey::new(resource, id);
                    let ids = match state.graph.referenced_by(&source_key, target) {
                        Some(ReverseEdge::Many(set)) => {
                            let mut ids: Vec<&String> = set.iter().collect();
                            ids.sort();
                            ids.into_iter().cloned().collect()
                        }
                        Some(ReverseEdge::One(Some(id))) => vec![id.clone()],
                        _ => Vec::new(),
                    };
                    let items: Vec<JsonValue> = ids
                        .iter()
                        .filter_map(|target_id| materialize(state, schema, target, target_id, nested_include))
                        .collect();
                    map.insert(relation_name.clone(), json!({ "value": items }));
                }
            }
        }
    }
    Some(obj)
}

/// Missing fields sort as less-than-present under `asc` and
/// greater-than-present under `desc` (§9 Open Question: sort on missing
/// fields).
fn compare_for_sort(a: &JsonValue, b: &JsonValue, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let av = a.get(&key.key).filter(|v| !v.is_null());
        let bv = b.get(&key.key).filter(|v| !v.is_null());
        let ord = match (av, bv) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => {
                if key.direction == SortDirection::Asc {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Some(_), None) => {
                if key.direction == SortDirection::Asc {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Some(a), Some(b)) => {
                let cmp = compare_scalars(a, b).unwrap_or(Ordering::Equal);
                if key.direction == SortDirection::Desc {
                    cmp.reverse()
                } else {
                    cmp
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn compare_scalars(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64().and_then(|a| b.as_f64().map(|b| a.total_cmp(&b))),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// The full §4.2.6 pipeline from step 3 onward, given an already-locked
/// state: materialize candidates, sort, then filter by `where` capping at
/// `limit` counting accepted items only.
pub(crate) fn run_query(state: &StoreState, schema: &SchemaRegistry, query: &Query) -> JsonValue {
    let ids = candidate_ids(state, query);
    let mut materialized: Vec<JsonValue> = ids
        .iter()
        .filter_map(|id| materialize(state, schema, &query.resource, id, query.include.as_ref()))
        .collect();

    if let Some(sort) = &query.sort {
        materialized.sort_by(|a, b| compare_for_sort(a, b, sort));
    }

    if query.limit == Some(0) {
        return JsonValue::Array(Vec::new());
    }

    let mut output = Vec::new();
    for item in materialized {
        let keep = query.r#where.as_ref().map(|w| w.matches(&item)).unwrap_or(true);
        if keep {
            output.push(item);
            if let Some(limit) = query.limit {
                if output.len() >= limit {
                    break;
                }
            }
        }
    }
    JsonValue::Array(output)
}

/// Per-field LWW merge of a single payload field against a prior optimistic
/// entity's value, used for relation maintenance (§4.2.2) — independent of
/// the full payload merge so a field that won't ultimately survive a later
/// authoritative re-fold can still be used to drive a best-effort link
/// update the moment it arrives.
pub(crate) fn merged_field_value<'a>(
    prior: &'a Entity,
    local_column: &str,
    payload: &sync_schema::MutationPayload,
) -> Option<JsonValue> {
    let incoming = payload.get(local_column)?;
    let stored = prior.fields.get(local_column).cloned().unwrap_or_default();
    stored.merge(incoming).into_accepted().and_then(|v| v.value)
}
