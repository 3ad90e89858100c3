use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sync_schema::SchemaRegistry;

use crate::where_clause::WhereClause;

/// A recursive map selecting which relations to inline under a query
/// result (§3 Glossary: Include tree).
pub type IncludeTree = BTreeMap<String, Include>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Include {
    Flag(bool),
    Nested(IncludeTree),
}

/// The transitive set of resource names reachable by walking an include
/// tree from `root` (§3 Glossary: Flat include set), extended per the §9
/// Open Question to also walk relation-valued `where` subclauses so a
/// collection subscription re-evaluates when a *joined* resource mutates,
/// not only when the root or an included resource does.
pub fn flat_include_resources(
    schema: &SchemaRegistry,
    root: &str,
    include: Option<&IncludeTree>,
    where_clause: Option<&WhereClause>,
) -> HashSet<String> {
    let mut out = HashSet::new();
    if let Some(tree) = include {
        walk_include(schema, root, tree, &mut out);
    }
    if let Some(clause) = where_clause {
        walk_where_relations(schema, root, clause, &mut out);
    }
    out
}

fn walk_include(schema: &SchemaRegistry, resource: &str, tree: &IncludeTree, out: &mut HashSet<String>) {
    let Ok(entity) = schema.get(resource) else {
        return;
    };
    for (relation_name, include) in tree {
        let Some(relation) = entity.relations.get(relation_name) else {
            continue;
        };
        let target = relation.target().to_string();
        out.insert(target.clone());
        if let Include::Nested(nested) = include {
            walk_include(schema, &target, nested, out);
        }
    }
}

fn walk_where_relations(
    schema: &SchemaRegistry,
    resource: &str,
    clause: &WhereClause,
    out: &mut HashSet<String>,
) {
    let Ok(entity) = schema.get(resource) else {
        return;
    };
    for field in clause.referenced_fields() {
        if let Some(relation) = entity.relations.get(field) {
            out.insert(relation.target().to_string());
        }
    }
}
