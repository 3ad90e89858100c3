use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sync_schema::MutationPayload;
use sync_wire::{Procedure, Query, QueryKey};

/// One entry of a resource's mutation stack (§3 Mutation record). Only
/// `INSERT`/`UPDATE` ever live here — custom procedures get their own
/// bookkeeping via [`CustomMutationMessage`]. Serializable so the client
/// disk cache can persist the stack verbatim (§6 Persisted state layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultMutation {
    pub id: String,
    pub resource: String,
    pub resource_id: String,
    pub procedure: Procedure,
    pub payload: MutationPayload,
}

/// A pending custom-procedure message (§4.2.4), tracking the `DefaultMutation`
/// ids it optimistically queued so they can be undone on confirm or reject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomMutationMessage {
    pub id: String,
    pub resource: String,
    pub procedure: String,
    pub payload: Option<JsonValue>,
}

pub(crate) type CollectionCallback = Box<dyn Fn(&JsonValue) + Send + Sync>;

pub(crate) struct SubscriptionEntry {
    pub query: Query,
    pub flat_include_resources: std::collections::HashSet<String>,
    pub callbacks: Vec<(u64, CollectionCallback)>,
    pub next_callback_id: u64,
}

#[derive(Default)]
pub(crate) struct StoreState {
    pub authoritative: HashMap<String, HashMap<String, sync_schema::Entity>>,
    pub optimistic: HashMap<String, HashMap<String, sync_schema::Entity>>,
    pub mutation_stack: HashMap<String, VecDeque<DefaultMutation>>,
    pub custom_mutation_stack: Vec<CustomMutationMessage>,
    pub custom_mutation_index: HashMap<String, Vec<(String, String)>>,
    pub graph: sync_graph::ObjectGraph,
    pub collection_subscriptions: HashMap<QueryKey, SubscriptionEntry>,
    pub query_snapshots: HashMap<QueryKey, JsonValue>,
}
