use thiserror::Error;

/// Transport-layer failures (§7 Kind: transport failure) — always
/// recoverable by reconnecting; the caller never sees these except as the
/// cause wrapped in a [`ClientError::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport failure: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("disk cache io error: {0}")]
    Io(String),
    #[error("disk cache serialization error: {0}")]
    Serde(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] sync_store::StoreError),

    #[error(transparent)]
    DiskCache(#[from] DiskCacheError),

    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("reply timeout")]
    Timeout,

    #[error("mutation rejected: {0}")]
    Rejected(String),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}
