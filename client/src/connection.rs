use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sync_schema::{FieldValue, MutationPayload, SchemaRegistry};
use sync_store::{CustomMutationMessage, DefaultMutation, OptimisticStore};
use sync_wire::{query_key, Message, Procedure, Query, QueryKey};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::disk_cache::{CachedState, DiskCache};
use crate::error::ClientError;
use crate::transport::Transport;

struct SubscriptionRef {
    query: Query,
    refcount: usize,
}

#[derive(Default)]
struct ConnectionState {
    subscriptions: HashMap<QueryKey, SubscriptionRef>,
    pending_replies: HashMap<String, oneshot::Sender<Result<JsonValue, String>>>,
}

/// Owns one logical connection to a sync server (§4.3). Cheaply
/// `Clone`-able — every clone shares the same transport, subscriptions,
/// pending replies, and optimistic store, which is what lets the receive
/// loop and the public API run as separate tasks over one connection.
#[derive(Clone)]
pub struct ClientConnection {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    schema: Arc<SchemaRegistry>,
    store: OptimisticStore,
    disk_cache: Option<Arc<dyn DiskCache>>,
    state: Arc<Mutex<ConnectionState>>,
}

impl ClientConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        schema: Arc<SchemaRegistry>,
        config: ClientConfig,
        disk_cache: Option<Arc<dyn DiskCache>>,
    ) -> Self {
        let store = OptimisticStore::new(Arc::clone(&schema));
        Self {
            transport,
            config,
            schema,
            store,
            disk_cache,
            state: Arc::new(Mutex::new(ConnectionState::default())),
        }
    }

    pub fn store(&self) -> &OptimisticStore {
        &self.store
    }

    /// Loads any persisted disk-cache state, connects, runs the bootstrap
    /// sequence, and spawns the dedicated inbound receive loop (§5: the
    /// client core is single-threaded and cooperative — mapped here as one
    /// task draining inbound messages to completion, in order, before the
    /// next is handled).
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        if let Some(cache) = &self.disk_cache {
            if let Some(cached) = cache.load().await? {
                if cached.schema_version == self.schema.content_hash() {
                    self.store.restore(cached.entities, cached.meta).await?;
                } else {
                    warn!("disk cache schema version is stale, discarding cached state");
                }
            }
        }

        self.establish(0).await
    }

    #[instrument(skip(self))]
    async fn establish(&self, mut attempt: u32) -> Result<(), ClientError> {
        loop {
            match self.transport.connect(&self.config.url).await {
                Ok(()) => {
                    self.on_open().await?;
                    self.spawn_receive_loop();
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_reconnect_attempts {
                        error!(error = %err, attempt, "reconnect attempts exhausted");
                        return Err(ClientError::ReconnectExhausted);
                    }
                    warn!(error = %err, attempt, "connect failed, backing off");
                    tokio::time::sleep(self.config.reconnect_backoff).await;
                }
            }
        }
    }

    /// §4.3 "On open": bootstrap query every resource, re-subscribe every
    /// tracked query with a live refcount, then resend the optimistic stack
    /// in order — run in that exact sequence on every open, including
    /// reconnect.
    async fn on_open(&self) -> Result<(), ClientError> {
        for resource in self.schema.resources() {
            let query = Query {
                resource: resource.to_string(),
                ..Default::default()
            };
            self.transport
                .send(&Message::Query {
                    id: Uuid::new_v4().to_string(),
                    query,
                })
                .await?;
        }

        let tracked: Vec<Query> = {
            let state = self.state.lock().await;
            state
                .subscriptions
                .values()
                .filter(|sub| sub.refcount > 0)
                .map(|sub| sub.query.clone())
                .collect()
        };
        for query in tracked {
            self.transport
                .send(&Message::Subscribe {
                    id: Uuid::new_v4().to_string(),
                    query,
                })
                .await?;
        }

        for mutation in self.store.pending_mutations().await {
            self.transport
                .send(&Message::Mutate {
                    id: mutation.id,
                    resource: mutation.resource,
                    resource_id: Some(mutation.resource_id),
                    procedure: mutation.procedure,
                    payload: Some(payload_to_json(&mutation.payload)),
                })
                .await?;
        }

        Ok(())
    }

    fn spawn_receive_loop(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.transport.recv().await {
                    Ok(message) => {
                        if let Err(err) = this.dispatch(message).await {
                            error!(error = %err, "failed to handle inbound message");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "transport closed, attempting reconnect");
                        if let Err(err) = this.establish(0).await {
                            error!(error = %err, "reconnect failed permanently, connection stays closed");
                        }
                        return;
                    }
                }
            }
        });
    }

    async fn dispatch(&self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::Mutate {
                id,
                resource,
                resource_id,
                procedure,
                payload,
            } => {
                let resource_id = resource_id
                    .ok_or_else(|| ClientError::Protocol("MUTATE from server missing resourceId".into()))?;
                let payload = payload_from_json(payload.unwrap_or(JsonValue::Null))?;
                self.store
                    .add_mutation(
                        DefaultMutation {
                            id,
                            resource,
                            resource_id,
                            procedure,
                            payload,
                        },
                        false,
                    )
                    .await?;
            }
            Message::Reject { id, resource, message } => {
                let pending = {
                    let mut state = self.state.lock().await;
                    state.pending_replies.remove(&id)
                };
                if let Some(sender) = pending {
                    let _ = sender.send(Err(message.unwrap_or_default()));
                    self.store.undo_custom_mutation(&id).await?;
                } else {
                    self.store.undo_mutation(&resource, &id).await?;
                }
            }
            Message::Reply { id, data } => {
                let pending = {
                    let mut state = self.state.lock().await;
                    state.pending_replies.remove(&id)
                };
                if let Some(sender) = pending {
                    let _ = sender.send(Ok(data));
                    self.store.confirm_custom_mutation(&id).await?;
                } else {
                    let resource = data
                        .get("resource")
                        .and_then(JsonValue::as_str)
                        .ok_or_else(|| ClientError::Protocol("REPLY missing resource".into()))?
                        .to_string();
                    let items = data
                        .get("data")
                        .and_then(JsonValue::as_array)
                        .cloned()
                        .unwrap_or_default();
                    self.store.load_consolidated_state(&resource, items).await?;
                }
            }
            Message::Query { .. } | Message::Subscribe { .. } | Message::Unsubscribe { .. } => {
                warn!("client received a server-only message type, ignoring");
            }
        }
        self.persist_to_disk_cache().await;
        Ok(())
    }

    /// Refcounted subscribe: `SUBSCRIBE` is sent only on the 0→1
    /// transition. Returns an unsubscribe closure equivalent — call
    /// [`LoadHandle::unload`] to drop the refcount and send `UNSUBSCRIBE` on
    /// 1→0 (§4.3 Outbound `load(query)`).
    pub async fn load(&self, query: Query) -> Result<LoadHandle, ClientError> {
        let key = query_key(&query);
        let first = {
            let mut state = self.state.lock().await;
            let entry = state.subscriptions.entry(key).or_insert_with(|| SubscriptionRef {
                query: query.clone(),
                refcount: 0,
            });
            entry.refcount += 1;
            entry.refcount == 1
        };
        if first {
            self.transport
                .send(&Message::Subscribe {
                    id: Uuid::new_v4().to_string(),
                    query,
                })
                .await?;
        }
        Ok(LoadHandle {
            connection: self.clone(),
            key,
        })
    }

    async fn unload(&self, key: QueryKey) -> Result<(), ClientError> {
        let (last, query) = {
            let mut state = self.state.lock().await;
            match state.subscriptions.get_mut(&key) {
                Some(entry) => {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    (entry.refcount == 0, entry.query.clone())
                }
                None => return Ok(()),
            }
        };
        if last {
            self.transport
                .send(&Message::Unsubscribe {
                    id: Uuid::new_v4().to_string(),
                    query,
                })
                .await?;
        }
        Ok(())
    }

    /// Sends a custom-procedure mutation message and resolves on `REPLY`,
    /// rejects on `REJECT`, or times out after the configured reply timeout
    /// (§4.3 `genericMutate`, §5 cancellation/timeouts).
    #[instrument(skip(self, payload))]
    pub async fn generic_mutate(
        &self,
        resource: &str,
        procedure: &str,
        payload: JsonValue,
    ) -> Result<JsonValue, ClientError> {
        let message_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending_replies.insert(message_id.clone(), tx);
        }

        self.store
            .add_custom_mutation_message(CustomMutationMessage {
                id: message_id.clone(),
                resource: resource.to_string(),
                procedure: procedure.to_string(),
                payload: Some(payload.clone()),
            })
            .await;

        self.transport
            .send(&Message::Mutate {
                id: message_id.clone(),
                resource: resource.to_string(),
                resource_id: None,
                procedure: Procedure::Custom(procedure.to_string()),
                payload: Some(payload),
            })
            .await?;

        match tokio::time::timeout(self.config.reply_timeout, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(message))) => Err(ClientError::Rejected(message)),
            Ok(Err(_canceled)) => Err(ClientError::Rejected("connection closed".into())),
            Err(_elapsed) => {
                let mut state = self.state.lock().await;
                state.pending_replies.remove(&message_id);
                drop(state);
                self.store.undo_custom_mutation(&message_id).await?;
                Err(ClientError::Timeout)
            }
        }
    }

    /// Registers which optimistic default mutations a custom procedure call
    /// queued, so a later confirm/reject unwinds them together (§4.2.4).
    /// Callers queue their own optimistic `DefaultMutation`s via
    /// [`OptimisticStore::add_mutation`] before calling this.
    pub async fn register_custom_mutation(&self, message_id: &str, queued: Vec<(String, String)>) {
        self.store.register_custom_mutation(message_id, queued).await;
    }

    async fn persist_to_disk_cache(&self) {
        let Some(cache) = &self.disk_cache else {
            return;
        };
        let state = CachedState {
            schema_version: self.schema.content_hash(),
            entities: self.store.export_entities().await,
            meta: self.store.export_meta().await,
        };
        cache.save(state).await;
    }
}

/// Handle returned by [`ClientConnection::load`]; dropping it does not
/// unsubscribe — callers must call [`LoadHandle::unload`] explicitly so
/// unsubscription stays inside the async runtime and can be awaited
/// (§4.3: unsubscribe is synchronous and idempotent on the wire, but wire
/// sends here are async).
pub struct LoadHandle {
    connection: ClientConnection,
    key: QueryKey,
}

impl LoadHandle {
    pub async fn unload(self) -> Result<(), ClientError> {
        self.connection.unload(self.key).await
    }
}

fn payload_to_json(payload: &MutationPayload) -> JsonValue {
    serde_json::to_value(payload.fields()).expect("field envelopes are always serializable")
}

fn payload_from_json(raw: JsonValue) -> Result<MutationPayload, ClientError> {
    let object = match raw {
        JsonValue::Object(map) => map,
        JsonValue::Null => Default::default(),
        other => {
            return Err(ClientError::Protocol(format!(
                "expected a payload object, got {other}"
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (name, value) in object {
        let field: FieldValue = serde_json::from_value(value)
            .map_err(|_| ClientError::Protocol(format!("field {name:?} is not a valid field envelope")))?;
        fields.insert(name, field);
    }

    MutationPayload::new(fields).map_err(|e| ClientError::Store(e.into()))
}
