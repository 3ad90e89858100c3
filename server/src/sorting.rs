use std::cmp::Ordering;

use serde_json::Value as JsonValue;
use sync_wire::{SortDirection, SortKey};

/// Missing fields sort as less-than-present under `asc`, greater-than-present
/// under `desc` — the same pinned rule the client store uses (§9 Open
/// Question: sort on missing fields), kept independent here since the
/// server has no dependency on the client's query execution module.
pub(crate) fn compare_for_sort(a: &JsonValue, b: &JsonValue, sort: &[SortKey]) -> Ordering {
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
