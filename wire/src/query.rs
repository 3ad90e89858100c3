use serde::{Deserialize, Serialize};

use crate::include::IncludeTree;
use crate::where_clause::WhereClause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub key: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub r#where: Option<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub include: Option<IncludeTree>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort: Option<Vec<SortKey>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<usize>,
}

/// Opaque stable hash of a normalized query (§4.2 Query key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(pub [u8; 32]);

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex_encode(&self.0))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn query_key(query: &Query) -> QueryKey {
    let normalized =
        serde_json::to_vec(query).expect("Query is always serializable into a stable JSON shape");
    let digest = blake3::hash(&normalized);
    QueryKey(*digest.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_queries_hash_identically() {
        let a = Query {
            resource: "users".into(),
            ..Default::default()
        };
        let b = Query {
            resource: "users".into(),
            ..Default::default()
        };
        assert_eq!(query_key(&a), query_key(&b));
    }

    #[test]
    fn different_queries_hash_differently() {
        let a = Query {
            resource: "users".into(),
            ..Default::default()
        };
        let b = Query {
            resource: "posts".into(),
            ..Default::default()
        };
        assert_ne!(query_key(&a), query_key(&b));
    }
}
