use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] sync_schema::SchemaError),

    #[error(transparent)]
    Graph(#[from] sync_graph::GraphError),

    #[error("mutation {0:?} not found")]
    MutationNotFound(String),

    #[error("consolidated payload is missing an \"id\" field")]
    MissingId,

    #[error("consolidated payload field {0:?} is not a valid field envelope")]
    MalformedField(String),
}
