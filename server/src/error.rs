use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// The five HTTP/wire error codes (§6 External interfaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidQuery,
    InvalidRequest,
    InvalidResource,
    NotFound,
    InternalServerError,
}

impl From<ErrorCode> for sync_wire::ErrorCode {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidQuery => sync_wire::ErrorCode::InvalidQuery,
            ErrorCode::InvalidRequest => sync_wire::ErrorCode::InvalidRequest,
            ErrorCode::InvalidResource => sync_wire::ErrorCode::InvalidResource,
            ErrorCode::NotFound => sync_wire::ErrorCode::NotFound,
            ErrorCode::InternalServerError => sync_wire::ErrorCode::InternalServerError,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    InvalidQuery(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown resource: {0}")]
    InvalidResource(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Resource already exists")]
    AlreadyExists,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Mutation rejected")]
    MutationRejected,

    #[error(transparent)]
    Schema(#[from] sync_schema::SchemaError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::InvalidQuery(_) => ErrorCode::InvalidQuery,
            ServerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ServerError::InvalidResource(_) => ErrorCode::InvalidResource,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Schema(_)
            | ServerError::AlreadyExists
            | ServerError::NotAuthorized
            | ServerError::MutationRejected => ErrorCode::InvalidRequest,
            ServerError::Storage(_) => ErrorCode::InternalServerError,
        }
    }

    fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidQuery | ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidResource => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `{ message, code, details? }` wire error shape (§6).
    pub fn to_error_body(&self) -> sync_wire::ErrorBody {
        sync_wire::ErrorBody::new(self.code().into(), self.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_error_body())).into_response()
    }
}
