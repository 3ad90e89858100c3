//! The `where` clause AST and evaluator (§4.2.9).
//!
//! A bare scalar on a field means equality. An object on a field that does
//! not carry any recognized `$`-operator key is a nested predicate on a
//! relation/object, evaluated against that field's own value. `$not` flips
//! the polarity of its subtree; the flip is carried as an `invert` flag
//! threaded down to the terminal scalar comparisons rather than negating a
//! computed boolean after the fact, matching the comment's description of
//! how the original engine applies it — the flag passes through `$and`/`$or`
//! unchanged (no De Morgan rewrite of the combinator), so `$not` inverts
//! every leaf comparison in its subtree rather than restructuring it.

use std::cmp::Ordering;

use serde::de::{Error as DeError, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
    Not(Box<WhereClause>),
    Field(String, FieldMatch),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    Eq(JsonValue),
    In(Vec<JsonValue>),
    Gt(JsonValue),
    Gte(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    Not(Box<FieldMatch>),
    /// Multiple operators on the same field (`{ $gt: 1, $lt: 10 }`), ANDed.
    All(Vec<FieldMatch>),
    /// The field's value does not look like an operator object — it is a
    /// nested predicate evaluated against that field's own value.
    Nested(Box<WhereClause>),
}

const OPERATORS: &[&str] = &["$eq", "$in", "$not", "$gt", "$gte", "$lt", "$lte"];

fn looks_like_operator_object(map: &serde_json::Map<String, JsonValue>) -> bool {
    !map.is_empty() && map.keys().all(|k| OPERATORS.contains(&k.as_str()))
}

fn parse_field_match(value: &JsonValue) -> Result<FieldMatch, String> {
    match value {
        JsonValue::Object(map) if looks_like_operator_object(map) => {
            let mut parts = Vec::new();
            for (key, val) in map {
                let part = match key.as_str() {
                    "$eq" => FieldMatch::Eq(val.clone()),
                    "$in" => {
                        let items = val
                            .as_array()
                            .ok_or_else(|| "$in requires an array".to_string())?
                            .clone();
                        FieldMatch::In(items)
                    }
                    "$gt" => FieldMatch::Gt(val.clone()),
                    "$gte" => FieldMatch::Gte(val.clone()),
                    "$lt" => FieldMatch::Lt(val.clone()),
                    "$lte" => FieldMatch::Lte(val.clone()),
                    "$not" => FieldMatch::Not(Box::new(parse_field_match(val)?)),
                    other => return Err(format!("unknown field operator {other}")),
                };
                parts.push(part);
            }
            if parts.len() == 1 {
                Ok(parts.into_iter().next().unwrap())
            } else {
                Ok(FieldMatch::All(parts))
            }
        }
        JsonValue::Object(_) => {
            Ok(FieldMatch::Nested(Box::new(parse_where_value(value)?)))
        }
        scalar => Ok(FieldMatch::Eq(scalar.clone())),
    }
}

fn parse_where_value(value: &JsonValue) -> Result<WhereClause, String> {
    let JsonValue::Object(map) = value else {
        return Err("where clause must be a JSON object".to_string());
    };

    let mut clauses = Vec::new();
    for (key, val) in map {
        let clause = match key.as_str() {
            "$and" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| "$and requires an array".to_string())?;
                let parsed: Result<Vec<_>, _> = items.iter().map(parse_where_value).collect();
                WhereClause::And(parsed?)
            }
            "$or" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| "$or requires an array".to_string())?;
                let parsed: Result<Vec<_>, _> = items.iter().map(parse_where_value).collect();
                WhereClause::Or(parsed?)
            }
            "$not" => WhereClause::Not(Box::new(parse_where_value(val)?)),
            field => WhereClause::Field(field.to_string(), parse_field_match(val)?),
        };
        clauses.push(clause);
    }

    if clauses.len() == 1 {
        Ok(clauses.into_iter().next().unwrap())
    } else {
        Ok(WhereClause::And(clauses))
    }
}

impl<'de> Deserialize<'de> for WhereClause {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct WhereVisitor;
        impl<'de> Visitor<'de> for WhereVisitor {
            type Value = WhereClause;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a where-clause object")
            }
            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let value: JsonValue =
                    Deserialize::deserialize(serde::de::value::MapAccessDeserializer::new(map))?;
                parse_where_value(&value).map_err(DeError::custom)
            }
        }
        deserializer.deserialize_map(WhereVisitor)
    }
}

impl Serialize for WhereClause {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl WhereClause {
    pub fn to_json(&self) -> JsonValue {
        match self {
            WhereClause::And(items) => {
                serde_json::json!({ "$and": items.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            WhereClause::Or(items) => {
                serde_json::json!({ "$or": items.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            WhereClause::Not(inner) => serde_json::json!({ "$not": inner.to_json() }),
            WhereClause::Field(name, fm) => {
                serde_json::json!({ name.clone(): fm.to_json() })
            }
        }
    }

    /// Evaluate against a materialized JSON object. `invert` starts `false`.
    pub fn matches(&self, obj: &JsonValue) -> bool {
        self.eval(obj, false)
    }

    fn eval(&self, obj: &JsonValue, invert: bool) -> bool {
        match self {
            WhereClause::And(items) => items.iter().all(|c| c.eval(obj, invert)),
            WhereClause::Or(items) => items.iter().any(|c| c.eval(obj, invert)),
            WhereClause::Not(inner) => inner.eval(obj, !invert),
            WhereClause::Field(name, fm) => {
                let field_value = obj.get(name).cloned().unwrap_or(JsonValue::Null);
                fm.eval(&field_value, invert)
            }
        }
    }

    /// Only the first level of this clause (no descent into relation-valued
    /// field predicates) — used by the server subscription manager (§4.5),
    /// which re-evaluates first-level `where` only and defers relation
    /// subclauses to a full query re-run.
    pub fn matches_first_level(&self, obj: &JsonValue) -> bool {
        self.eval_first_level(obj, false)
    }

    fn eval_first_level(&self, obj: &JsonValue, invert: bool) -> bool {
        match self {
            WhereClause::And(items) => items.iter().all(|c| c.eval_first_level(obj, invert)),
            WhereClause::Or(items) => items.iter().any(|c| c.eval_first_level(obj, invert)),
            WhereClause::Not(inner) => inner.eval_first_level(obj, !invert),
            WhereClause::Field(name, fm) => {
                if matches!(fm, FieldMatch::Nested(_)) {
                    // Relation-valued subclause: ignored at first level.
                    return true;
                }
                let field_value = obj.get(name).cloned().unwrap_or(JsonValue::Null);
                fm.eval(&field_value, invert)
            }
        }
    }

    /// Field names referenced anywhere in this clause, flattening `$and`/
    /// `$or`/`$not` recursively (§9 Open Question: deep-where authorization
    /// expansion, and the flat-include-resources extension — both need the
    /// same flattening).
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            WhereClause::And(items) | WhereClause::Or(items) => {
                for item in items {
                    item.collect_fields(out);
                }
            }
            WhereClause::Not(inner) => inner.collect_fields(out),
            WhereClause::Field(name, fm) => {
                out.push(name.as_str());
                fm.collect_nested(out);
            }
        }
    }
}

impl FieldMatch {
    fn eval(&self, value: &JsonValue, invert: bool) -> bool {
        match self {
            FieldMatch::Eq(expected) => (value == expected) ^ invert,
            FieldMatch::In(items) => items.contains(value) ^ invert,
            FieldMatch::Gt(expected) => {
                matches!(compare_json(value, expected), Some(Ordering::Greater)) ^ invert
            }
            FieldMatch::Gte(expected) => {
                matches!(
                    compare_json(value, expected),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ) ^ invert
            }
            FieldMatch::Lt(expected) => {
                matches!(compare_json(value, expected), Some(Ordering::Less)) ^ invert
            }
            FieldMatch::Lte(expected) => {
                matches!(
                    compare_json(value, expected),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                ) ^ invert
            }
            FieldMatch::Not(inner) => inner.eval(value, !invert),
            FieldMatch::All(parts) => parts.iter().all(|p| p.eval(value, invert)),
            FieldMatch::Nested(inner) => inner.eval(value, invert),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            FieldMatch::Eq(v) => v.clone(),
            FieldMatch::In(items) => serde_json::json!({ "$in": items }),
            FieldMatch::Gt(v) => serde_json::json!({ "$gt": v }),
            FieldMatch::Gte(v) => serde_json::json!({ "$gte": v }),
            FieldMatch::Lt(v) => serde_json::json!({ "$lt": v }),
            FieldMatch::Lte(v) => serde_json::json!({ "$lte": v }),
            FieldMatch::Not(inner) => serde_json::json!({ "$not": inner.to_json() }),
            FieldMatch::All(parts) => {
                let mut obj = serde_json::Map::new();
                for part in parts {
                    if let JsonValue::Object(m) = part.to_json() {
                        obj.extend(m);
                    }
                }
                JsonValue::Object(obj)
            }
            FieldMatch::Nested(inner) => inner.to_json(),
        }
    }

    fn collect_nested<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FieldMatch::Not(inner) => inner.collect_nested(out),
            FieldMatch::All(parts) => {
                for part in parts {
                    part.collect_nested(out);
                }
            }
            // The relation field itself was already pushed by the caller
            // (`collect_fields`'s `WhereClause::Field` arm); the nested
            // clause's own field names belong to the related entity, not
            // this one, so they aren't reported here.
            FieldMatch::Nested(_) => {}
            _ => {}
        }
    }
}

fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            a.as_f64().and_then(|a| b.as_f64().map(|b| a.total_cmp(&b)))
        }
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
