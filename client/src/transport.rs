use async_trait::async_trait;
use sync_wire::Message;

use crate::error::TransportError;

/// The WebSocket/HTTP transport seam (§1, §4.3): a production implementation
/// is an external collaborator, out of scope here same as `spec.md` scopes
/// it — this trait plus the reconnect/replay state machine around it is
/// what's in scope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(), TransportError>;
    async fn send(&self, msg: &Message) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<Message, TransportError>;
}
