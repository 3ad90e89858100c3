//! Reconnect replay (§4.3): after a transport failure, the next `open`
//! re-queries every schema resource, re-subscribes tracked queries, and
//! resends whatever is still in the optimistic stack.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sync_client::{ClientConfig, ClientConnection, Transport, TransportError};
use sync_schema::{EntitySchema, FieldSpec, FieldValue, MutationPayload, SchemaRegistry, ScalarType};
use sync_store::DefaultMutation;
use sync_wire::{Message, Procedure, Query};
use tokio::sync::Mutex;

struct FlakyTransport {
    connect_calls: AtomicUsize,
    inbound: Mutex<VecDeque<Message>>,
    sent: Mutex<Vec<Message>>,
}

impl FlakyTransport {
    fn new() -> Self {
        Self {
            connect_calls: AtomicUsize::new(0),
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn connect(&self, _url: &str) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
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
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }
}

fn schema() -> Arc<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("posts").with_field(
        "title",
        FieldSpec {
            scalar_type: ScalarType::String,
            default: None,
        },
    ));
    Arc::new(registry)
}

#[tokio::test]
async fn reconnect_resends_tracked_subscription_and_optimistic_stack() {
    let transport = Arc::new(FlakyTransport::new());
    let connection = ClientConnection::new(
        transport.clone(),
        schema(),
        ClientConfig::new("ws://localhost/test"),
        None,
    );
    connection.connect().await.unwrap();

    let handle = connection
        .load(Query {
            resource: "posts".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut payload = std::collections::BTreeMap::new();
    payload.insert(
        "title".to_string(),
        FieldValue::new("Draft".into(), Utc::now()),
    );
    connection
        .store()
        .add_mutation(
            DefaultMutation {
                id: "p1-insert".into(),
                resource: "posts".into(),
                resource_id: "p1".into(),
                procedure: Procedure::Insert,
                payload: MutationPayload::new(payload).unwrap(),
            },
            true,
        )
        .await
        .unwrap();

    transport.sent.lock().await.clear();

    // Re-running `connect` exercises exactly the same bootstrap sequence a
    // real reconnect runs after a transport failure (§4.3 "On open").
    connection.connect().await.unwrap();

    let sent = transport.sent.lock().await;
    assert!(sent.iter().any(|m| matches!(m, Message::Query { query, .. } if query.resource == "posts")));
    assert!(sent.iter().any(|m| matches!(m, Message::Subscribe { query, .. } if query.resource == "posts")));
    assert!(sent.iter().any(|m| matches!(
        m,
        Message::Mutate { resource, resource_id, .. }
            if resource == "posts" && resource_id.as_deref() == Some("p1")
    )));

    handle.unload().await.unwrap();
}
