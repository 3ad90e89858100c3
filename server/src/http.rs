//! Transport surface (§6): an axum router exposing the WS endpoint (wire
//! `Message` frames) and a parallel HTTP surface (`GET /<resource>`,
//! `POST /<resource>/insert|update|<procedure>`), grounded on
//! `afewell-hh-Demon/runtime/src/server/mod.rs`'s `Router::new().route(...)
//! .nest(...).layer(TraceLayer)` and `runtime/src/server/rituals/mod.rs`'s
//! `Extension<Arc<_>>` + `Json` extractor pattern.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query as AxumQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sync_wire::{query_key, Message, Procedure, Query, QueryKey};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::authorization::AuthContext;
use crate::engine::SyncEngine;
use crate::error::ServerError;

pub fn routes(engine: Arc<SyncEngine>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/{resource}", get(query_resource))
        .route("/{resource}/{procedure}", post(mutate_resource))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    #[serde(rename = "where")]
    where_json: Option<String>,
    include: Option<String>,
    sort: Option<String>,
    limit: Option<usize>,
}

async fn query_resource(
    State(engine): State<Arc<SyncEngine>>,
    Path(resource): Path<String>,
    AxumQuery(params): AxumQuery<QueryParams>,
) -> Response {
    let query = match build_query(resource, params) {
        Ok(query) => query,
        Err(err) => return err.into_response(),
    };
    match engine.run_query(&query, &AuthContext::default()).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => err.into_response(),
    }
}

fn build_query(resource: String, params: QueryParams) -> Result<Query, ServerError> {
    let where_clause = params
        .where_json
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e: serde_json::Error| ServerError::InvalidQuery(e.to_string()))?;
    let include = params
        .include
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e: serde_json::Error| ServerError::InvalidQuery(e.to_string()))?;
    let sort = params
        .sort
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e: serde_json::Error| ServerError::InvalidQuery(e.to_string()))?;
    Ok(Query {
        resource,
        r#where: where_clause,
        include,
        sort,
        limit: params.limit,
    })
}

#[derive(Debug, Deserialize)]
struct MutateBody {
    #[serde(rename = "resourceId")]
    resource_id: Option<String>,
    #[serde(default)]
    payload: Option<JsonValue>,
}

async fn mutate_resource(
    State(engine): State<Arc<SyncEngine>>,
    Path((resource, procedure)): Path<(String, String)>,
    Json(body): Json<MutateBody>,
) -> Response {
    let procedure = match procedure.as_str() {
        "insert" => Procedure::Insert,
        "update" => Procedure::Update,
        other => Procedure::Custom(other.to_string()),
    };
    let mutation_id = uuid::Uuid::new_v4().to_string();
    match engine
        .handle_mutation(
            &resource,
            &AuthContext::default(),
            &mutation_id,
            body.resource_id,
            procedure,
            body.payload,
        )
        .await
    {
        Ok(entity) => Json(entity).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn ws_upgrade(State(engine): State<Arc<SyncEngine>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

/// One WS connection's subscription bookkeeping: which live query a given
/// `QueryKey` maps to, so `UNSUBSCRIBE` can tear it down (§4.5/§6).
async fn handle_socket(socket: WebSocket, engine: Arc<SyncEngine>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let forward = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut live: HashMap<QueryKey, crate::subscriptions::SubscriptionHandle> = HashMap::new();
    let ctx = AuthContext::default();

    while let Some(Ok(frame)) = receiver.next().await {
        let WsMessage::Text(text) = frame else { continue };
        let parsed = sync_wire::parse_message(&text);
        let Ok(message) = parsed else {
            warn!("dropped malformed inbound frame");
            continue;
        };

        match message {
            Message::Query { id, query } => {
                match engine.run_query(&query, &ctx).await {
                    Ok(rows) => {
                        let _ = out_tx.send(Message::Reply {
                            id,
                            data: serde_json::json!({ "resource": query.resource, "data": rows }),
                        });
                    }
                    Err(err) => {
                        let _ = out_tx.send(Message::Reject {
                            id,
                            resource: query.resource,
                            message: Some(err.to_string()),
                        });
                    }
                }
            }
            Message::Subscribe { id, query } => {
                let key = query_key(&query);
                match engine.run_query(&query, &ctx).await {
                    Ok(rows) => {
                        let _ = out_tx.send(Message::Reply {
                            id,
                            data: serde_json::json!({ "resource": query.resource, "data": rows }),
                        });
                        let tx = out_tx.clone();
                        let handle = engine.subscribe(query.clone(), &ctx, move |mutation| {
                            let _ = tx.send(Message::Mutate {
                                id: mutation.id.clone(),
                                resource: mutation.resource.clone(),
                                resource_id: Some(mutation.resource_id.clone()),
                                procedure: mutation.procedure.clone(),
                                payload: Some(
                                    serde_json::to_value(mutation.payload.fields())
                                        .unwrap_or(JsonValue::Null),
                                ),
                            });
                        });
                        if let Some(handle) = handle {
                            live.insert(key, handle);
                        }
                    }
                    Err(err) => {
                        let _ = out_tx.send(Message::Reject {
                            id,
                            resource: query.resource,
                            message: Some(err.to_string()),
                        });
                    }
                }
            }
            Message::Unsubscribe { query, .. } => {
                if let Some(handle) = live.remove(&query_key(&query)) {
                    engine.unsubscribe(&handle);
                }
            }
            Message::Mutate {
                id,
                resource,
                resource_id,
                procedure,
                payload,
            } => match engine
                .handle_mutation(&resource, &ctx, &id, resource_id, procedure, payload)
                .await
            {
                Ok(entity) => {
                    let _ = out_tx.send(Message::Reply { id, data: entity });
                }
                Err(err) => {
                    let _ = out_tx.send(Message::Reject {
                        id,
                        resource,
                        message: Some(err.to_string()),
                    });
                }
            },
            Message::Reject { .. } | Message::Reply { .. } => {
                // Clients never send these; ignore rather than error.
            }
        }
    }

    for handle in live.into_values() {
        engine.unsubscribe(&handle);
    }
    forward.abort();
    info!("websocket connection closed");
}
