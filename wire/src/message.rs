//! Wire protocol messages (§6 External interfaces). Every message carries
//! an opaque `id`, unique per message, tagged by `type`.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::query::Query;

/// `"INSERT"` / `"UPDATE"` are the two built-in default-mutation
/// procedures; anything else names a custom procedure (§3 Mutation
/// record / custom mutation message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Procedure {
    Insert,
    Update,
    Custom(String),
}

impl Serialize for Procedure {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Procedure::Insert => serializer.serialize_str("INSERT"),
            Procedure::Update => serializer.serialize_str("UPDATE"),
            Procedure::Custom(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Procedure {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "INSERT" => Procedure::Insert,
            "UPDATE" => Procedure::Update,
            _ => Procedure::Custom(raw),
        })
    }
}

impl Procedure {
    pub fn is_default(&self) -> bool {
        matches!(self, Procedure::Insert | Procedure::Update)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "QUERY")]
    Query {
        id: String,
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        id: String,
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe {
        id: String,
        #[serde(flatten)]
        query: Query,
    },
    #[serde(rename = "MUTATE")]
    Mutate {
        id: String,
        resource: String,
        #[serde(rename = "resourceId", skip_serializing_if = "Option::is_none", default)]
        resource_id: Option<String>,
        procedure: Procedure,
        // The spec's §3 prose calls the custom-procedure body "input" while
        // §6's wire shape calls it "payload"; both names are accepted on
        // the way in and "payload" is always written on the way out.
        #[serde(alias = "input", skip_serializing_if = "Option::is_none", default)]
        payload: Option<JsonValue>,
    },
    #[serde(rename = "REJECT")]
    Reject {
        id: String,
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },
    #[serde(rename = "REPLY")]
    Reply { id: String, data: JsonValue },
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Query { id, .. }
            | Message::Subscribe { id, .. }
            | Message::Unsubscribe { id, .. }
            | Message::Mutate { id, .. }
            | Message::Reject { id, .. }
            | Message::Reply { id, .. } => id,
        }
    }
}

/// HTTP surface error shape (§6): `{ message, code, details? }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_QUERY")]
    InvalidQuery,
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "INVALID_RESOURCE")]
    InvalidResource,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INTERNAL_SERVER_ERROR")]
    InternalServerError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<JsonValue>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

pub fn parse_message(raw: &str) -> Result<Message, crate::error::WireError> {
    serde_json::from_str(raw).map_err(|e| crate::error::WireError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutate_round_trips_default_procedure() {
        let msg = Message::Mutate {
            id: "m1".into(),
            resource: "users".into(),
            resource_id: Some("u1".into()),
            procedure: Procedure::Insert,
            payload: Some(serde_json::json!({ "name": { "value": "Ann" } })),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"INSERT\""));
        let parsed = parse_message(&json).unwrap();
        matches!(parsed, Message::Mutate { procedure: Procedure::Insert, .. });
    }

    #[test]
    fn custom_procedure_accepts_legacy_input_key() {
        let json = serde_json::json!({
            "type": "MUTATE",
            "id": "m2",
            "resource": "users",
            "procedure": "sendWelcomeEmail",
            "input": { "template": "hello" }
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        match msg {
            Message::Mutate { procedure, payload, .. } => {
                assert_eq!(procedure, Procedure::Custom("sendWelcomeEmail".into()));
                assert!(payload.is_some());
            }
            _ => panic!("expected Mutate"),
        }
    }

    #[test]
    fn query_message_flattens_query_fields() {
        let json = serde_json::json!({
            "type": "QUERY",
            "id": "q1",
            "resource": "users"
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        match msg {
            Message::Query { query, .. } => assert_eq!(query.resource, "users"),
            _ => panic!("expected Query"),
        }
    }
}
