use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("mutation payload must not contain an \"id\" field")]
    IdInPayload,

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("resource {resource} has no relation named {relation}")]
    UnknownRelation { resource: String, relation: String },

    #[error("resource {resource} has no field named {field}")]
    UnknownField { resource: String, field: String },
}
