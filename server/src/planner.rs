//! The server query planner (§4.4): builds a depth-first plan over a
//! query's `include` tree, executes it step by step against a
//! [`StorageBatcher`], then assembles the nested result shape.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use sync_schema::{RelationSpec, SchemaRegistry};
use sync_wire::{FieldMatch, Include, IncludeTree, Query, WhereClause};

use crate::authorization::AuthDecision;
use crate::error::ServerError;

/// The SQL (or any other) persistence engine is an external collaborator —
/// this trait is the seam the planner drives.
#[async_trait]
pub trait StorageBatcher: Send + Sync {
    /// Fetches every materialized entity of `resource` matching
    /// `where_clause`. Implementations are expected to coalesce identical
    /// `(resource, where)` fetches issued within a single planner run.
    async fn fetch(&self, resource: &str, where_clause: &WhereClause) -> Result<Vec<JsonValue>, ServerError>;
}

#[derive(Debug, Clone)]
enum RelationRef {
    Root,
    One { local_column: String },
    Many { foreign_column: String },
}

/// One node of the plan (§4.4 point 1). `get_where`/`reference_getter` are
/// expressed as methods dispatching on [`RelationRef`] rather than literal
/// stored closures — the relation shapes are a closed set, so this reads
/// more plainly than boxing a `Fn` per step.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_id: String,
    pub prev_step_id: Option<String>,
    pub resource: String,
    pub is_many: bool,
    pub collection_name: String,
    pub included: IncludeTree,
    relation: RelationRef,
}

impl PlanStep {
    /// The `where` clause used to fetch this step's rows for one parent:
    /// `{ id: <id> }` for a `one` relation, `{ foreignColumn: <id> }` for a
    /// `many` relation.
    fn get_where(&self, id: &str) -> WhereClause {
        match &self.relation {
            RelationRef::Root => WhereClause::Field("id".into(), FieldMatch::Eq(id.into())),
            RelationRef::One { .. } => WhereClause::Field("id".into(), FieldMatch::Eq(id.into())),
            RelationRef::Many { foreign_column } => {
                WhereClause::Field(foreign_column.clone(), FieldMatch::Eq(id.into()))
            }
        }
    }
}

/// Depth-first plan build over `include`, root first (§4.4 point 1).
pub fn build_plan(schema: &SchemaRegistry, root: &str, include: Option<&IncludeTree>) -> Vec<PlanStep> {
    let mut steps = vec![PlanStep {
        step_id: String::new(),
        prev_step_id: None,
        resource: root.to_string(),
        is_many: false,
        collection_name: root.to_string(),
        included: include.cloned().unwrap_or_default(),
        relation: RelationRef::Root,
    }];
    if let Some(tree) = include {
        walk_include(schema, root, "", tree, &mut steps);
    }
    steps
}

fn walk_include(
    schema: &SchemaRegistry,
    resource: &str,
    prev_step_id: &str,
    tree: &IncludeTree,
    out: &mut Vec<PlanStep>,
) {
    let Ok(entity_schema) = schema.get(resource) else {
        return;
    };
    for (name, include) in tree {
        let Some(relation_spec) = entity_schema.relations.get(name) else {
            continue;
        };
        let step_id = if prev_step_id.is_empty() {
            name.clone()
        } else {
            format!("{prev_step_id}.{name}")
        };
        let nested = match include {
            Include::Nested(nested) => nested.clone(),
            Include::Flag(_) => IncludeTree::default(),
        };
        let relation = match relation_spec {
            RelationSpec::One { local_column, .. } => RelationRef::One {
                local_column: local_column.clone(),
            },
            RelationSpec::Many { foreign_column, .. } => RelationRef::Many {
                foreign_column: foreign_column.clone(),
            },
        };
        let target = relation_spec.target().to_string();
        out.push(PlanStep {
            step_id: step_id.clone(),
            prev_step_id: Some(prev_step_id.to_string()),
            resource: target.clone(),
            is_many: relation_spec.is_many(),
            collection_name: name.clone(),
            included: nested.clone(),
            relation,
        });
        if !nested.is_empty() {
            walk_include(schema, &target, &step_id, &nested, out);
        }
    }
}

/// Per-step results keyed by the id of the row in the *parent* step that
/// produced them (root's single bucket is keyed by the empty string).
type StepResults = HashMap<String, Vec<JsonValue>>;

/// Executes the plan (§4.4 point 2): root first, then each child step
/// fetches its rows per distinct parent id. Partial per-parent failures are
/// discarded silently, matching the spec's framing of this pass.
pub async fn execute_plan(
    steps: &[PlanStep],
    batcher: &dyn StorageBatcher,
    root_where: Option<&WhereClause>,
    read_auth: &AuthDecision,
) -> Result<HashMap<String, StepResults>, ServerError> {
    let mut results: HashMap<String, StepResults> = HashMap::new();

    for step in steps {
        let mut bucket: StepResults = HashMap::new();
        match &step.prev_step_id {
            None => {
                let mut clauses = Vec::new();
                if let Some(where_clause) = root_where {
                    clauses.push(where_clause.clone());
                }
                if let Some(auth_where) = read_auth.as_where() {
                    clauses.push(auth_where.clone());
                }
                let effective = combine_and(clauses);
                let rows = match &effective {
                    Some(clause) => batcher.fetch(&step.resource, clause).await?,
                    None => batcher.fetch(&step.resource, &WhereClause::And(Vec::new())).await?,
                };
                bucket.insert(String::new(), rows);
            }
            Some(prev_step_id) => {
                let parent_results = results.get(prev_step_id).cloned().unwrap_or_default();
                let parent_rows: Vec<JsonValue> = parent_results.into_values().flatten().collect();
                for parent in &parent_rows {
                    let Some(parent_id) = parent.get("id").and_then(JsonValue::as_str) else {
                        continue;
                    };
                    let seed_id = match &step.relation {
                        RelationRef::One { local_column } => {
                            parent.get(local_column).and_then(JsonValue::as_str).map(str::to_string)
                        }
                        _ => Some(parent_id.to_string()),
                    };
                    let Some(seed_id) = seed_id else {
                        bucket.insert(parent_id.to_string(), Vec::new());
                        continue;
                    };
                    let where_clause = step.get_where(&seed_id);
                    match batcher.fetch(&step.resource, &where_clause).await {
                        Ok(rows) => {
                            bucket.insert(parent_id.to_string(), rows);
                        }
                        Err(_) => {
                            bucket.insert(parent_id.to_string(), Vec::new());
                        }
                    }
                }
            }
        }
        results.insert(step.step_id.clone(), bucket);
    }

    Ok(results)
}

fn combine_and(clauses: Vec<WhereClause>) -> Option<WhereClause> {
    match clauses.len() {
        0 => None,
        1 => clauses.into_iter().next(),
        _ => Some(WhereClause::And(clauses)),
    }
}

/// Assembles the nested result shape (§4.4 point 3): walk step results in
/// reverse (leaves first), attaching each child's rows under its relation's
/// field on the parent. Empty `many` fields become `{ value: [] }`, empty
/// `one` fields become `{ value: null }`, so included-but-absent relations
/// still carry the wire shape a client expects.
pub fn assemble(steps: &[PlanStep], mut results: HashMap<String, StepResults>) -> Vec<JsonValue> {
    for step in steps.iter().rev() {
        if step.prev_step_id.is_none() {
            continue;
        }
        let Some(prev_step_id) = &step.prev_step_id else { continue };
        let Some(bucket) = results.remove(&step.step_id) else {
            continue;
        };
        let Some(parent_bucket) = results.get_mut(prev_step_id) else {
            continue;
        };
        for rows in parent_bucket.values_mut() {
            for parent in rows.iter_mut() {
                let Some(parent_id) = parent.get("id").and_then(JsonValue::as_str).map(str::to_string) else {
                    continue;
                };
                let child_rows = bucket.get(&parent_id).cloned().unwrap_or_default();
                let value = if step.is_many {
                    json!({ "value": child_rows })
                } else {
                    json!({ "value": child_rows.into_iter().next() })
                };
                if let JsonValue::Object(map) = parent {
                    map.insert(step.collection_name.clone(), value);
                }
            }
        }
    }

    results
        .remove("")
        .and_then(|mut bucket| bucket.remove(""))
        .unwrap_or_default()
}

/// Runs the full planner pipeline for one `QUERY`/`SUBSCRIBE` request.
pub async fn run_query(
    schema: &SchemaRegistry,
    batcher: &dyn StorageBatcher,
    query: &Query,
    read_auth: &AuthDecision,
) -> Result<Vec<JsonValue>, ServerError> {
    let steps = build_plan(schema, &query.resource, query.include.as_ref());
    let results = execute_plan(&steps, batcher, query.r#where.as_ref(), read_auth).await?;
    let mut rows = assemble(&steps, results);

    if let Some(sort) = &query.sort {
        rows.sort_by(|a, b| crate::sorting::compare_for_sort(a, b, sort));
    }
    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}
