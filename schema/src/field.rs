use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Per-field last-writer-wins metadata. Absence is the lowest possible
/// priority: a field with no `_meta` always loses a merge against one that
/// has it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub timestamp: DateTime<Utc>,
}

/// A materialized field: `{ value, _meta }` (§3 Materialized field value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldValue {
    pub value: Option<JsonValue>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none", default)]
    pub meta: Option<FieldMeta>,
}

impl FieldValue {
    pub fn new(value: JsonValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            meta: Some(FieldMeta { timestamp }),
        }
    }

    pub fn null(timestamp: DateTime<Utc>) -> Self {
        Self {
            value: None,
            meta: Some(FieldMeta { timestamp }),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta.as_ref().map(|m| m.timestamp)
    }

    /// Merge `incoming` onto `self` under last-writer-wins by `_meta.timestamp`.
    ///
    /// A stored field with no `_meta` always loses. An incoming field with
    /// no `_meta` is accepted only if the stored field also has none. Ties
    /// go to `incoming`, so a confirmed mutation can overwrite an optimistic
    /// field carrying the identical timestamp.
    pub fn merge(&self, incoming: &FieldValue) -> MergeOutcome {
        match (self.timestamp(), incoming.timestamp()) {
            (None, _) => MergeOutcome::Accepted(incoming.clone()),
            (Some(_), None) => MergeOutcome::Rejected,
            (Some(stored_ts), Some(incoming_ts)) => {
                if incoming_ts >= stored_ts {
                    MergeOutcome::Accepted(incoming.clone())
                } else {
                    MergeOutcome::Rejected
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Accepted(FieldValue),
    Rejected,
}

impl MergeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MergeOutcome::Accepted(_))
    }

    pub fn into_accepted(self) -> Option<FieldValue> {
        match self {
            MergeOutcome::Accepted(v) => Some(v),
            MergeOutcome::Rejected => None,
        }
    }
}
