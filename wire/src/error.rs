use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid where-clause operator: {0}")]
    InvalidWhereOperator(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}
