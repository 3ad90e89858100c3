//! The client connection (§4.3): reconnect/replay state machine, refcounted
//! subscriptions, custom-mutation request/reply, and the disk-cache seam
//! that rehydrates an [`sync_store::OptimisticStore`] across restarts.

mod config;
mod connection;
mod disk_cache;
mod error;
mod transport;

pub use config::ClientConfig;
pub use connection::{ClientConnection, LoadHandle};
pub use disk_cache::{CachedState, DiskCache, JsonFileDiskCache};
pub use error::{ClientError, DiskCacheError, TransportError};
pub use transport::Transport;

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;
    use sync_schema::{EntitySchema, FieldSpec, SchemaRegistry, ScalarType};
    use sync_wire::{Message, Procedure};
    use tokio::sync::Mutex;

    use super::*;

    /// An in-process `Transport` double: inbound messages are fed in via
    /// [`MockTransport::push_inbound`] and outbound sends are captured in
    /// `sent` for assertions, rather than touching a real socket.
    struct MockTransport {
        inbound: Mutex<VecDeque<Message>>,
        sent: Mutex<Vec<Message>>,
    }

    impl MockTransport {
        fn new(inbound: Vec<Message>) -> Self {
            Self {
                inbound: Mutex::new(inbound.into()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _url: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, msg: &Message) -> Result<(), TransportError> {
            self.sent.lock().await.push(msg.clone());
            Ok(())
        }

        async fn recv(&self) -> Result<Message, TransportError> {
            loop {
                if let Some(msg) = self.inbound.lock().await.pop_front() {
                    return Ok(msg);
                }
                // No more scripted inbound messages: park instead of
                // busy-looping, since a real transport would block here too.
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        }
    }

    fn schema() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry.register(EntitySchema::new("users").with_field(
            "name",
            FieldSpec {
                scalar_type: ScalarType::String,
                default: None,
            },
        ));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn connect_bootstraps_schema_query_on_open() {
        let transport = Arc::new(MockTransport::new(Vec::new()));
        let connection = ClientConnection::new(
            transport.clone(),
            schema(),
            ClientConfig::new("ws://localhost/test"),
            None,
        );

        connection.connect().await.unwrap();

        let sent = transport.sent.lock().await;
        assert!(sent.iter().any(|m| matches!(m, Message::Query { query, .. } if query.resource == "users")));
    }

    #[tokio::test]
    async fn inbound_mutate_applies_confirmed_mutation_to_store() {
        let mutate = Message::Mutate {
            id: "m1".into(),
            resource: "users".into(),
            resource_id: Some("u1".into()),
            procedure: Procedure::Insert,
            payload: Some(json!({
                "name": { "value": "Ann" }
            })),
        };
        let transport = Arc::new(MockTransport::new(vec![mutate]));
        let connection = ClientConnection::new(
            transport,
            schema(),
            ClientConfig::new("ws://localhost/test"),
            None,
        );

        connection.connect().await.unwrap();

        // The receive loop runs on a spawned task; yield until it has had a
        // chance to drain the scripted inbound message.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let query = sync_wire::Query {
            resource: "users".into(),
            ..Default::default()
        };
        let result = connection.store().get(&query, None, true).await;
        assert_eq!(result[0]["name"], "Ann");
    }
}
