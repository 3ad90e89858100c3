//! The client-side optimistic store (§4.2): an authoritative pool, an
//! optimistic overlay folded on top of it per-resource, an object graph
//! tracking relations between entities, and reactive collection
//! subscriptions with deep-equality change detection.
//!
//! Mirrors the `Arc<RwLock<_>>` shared-state shape the rest of this
//! workspace uses for anything more than one task touches concurrently —
//! a single [`OptimisticStore`] handle is cloned across the client's
//! connection, its reconnect/replay logic, and every open subscription.

mod consolidated;
mod error;
mod query_exec;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sync_graph::NodeKey;
use sync_schema::{Entity, SchemaRegistry};
use sync_wire::{flat_include_resources, query_key, Query, QueryKey};
use tokio::sync::RwLock;

pub use error::StoreError;
pub use types::{CustomMutationMessage, DefaultMutation};

use types::{StoreState, SubscriptionEntry};

/// The bookkeeping half of the client disk cache's persisted meta store
/// (§6 Persisted state layout): mutation stacks plus custom-mutation
/// tracking, independent of the authoritative entity tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedMeta {
    pub mutation_stack: HashMap<String, Vec<DefaultMutation>>,
    pub custom_mutation_stack: Vec<CustomMutationMessage>,
    pub custom_mutation_index: HashMap<String, Vec<(String, String)>>,
}

#[derive(Clone)]
pub struct OptimisticStore {
    schema: Arc<SchemaRegistry>,
    state: Arc<RwLock<StoreState>>,
}

/// Handle returned by [`OptimisticStore::subscribe`]. Call
/// [`CollectionSubscription::unsubscribe`] when the caller no longer wants
/// updates; the last handle for a query tears down its snapshot too.
pub struct CollectionSubscription {
    store: OptimisticStore,
    key: QueryKey,
    callback_id: u64,
}

impl CollectionSubscription {
    pub async fn unsubscribe(self) {
        let mut state = self.store.state.write().await;
        let Some(entry) = state.collection_subscriptions.get_mut(&self.key) else {
            return;
        };
        entry.callbacks.retain(|(id, _)| *id != self.callback_id);
        if entry.callbacks.is_empty() {
            state.collection_subscriptions.remove(&self.key);
            state.query_snapshots.remove(&self.key);
        }
    }
}

impl OptimisticStore {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self {
            schema,
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    /// Applies a default (`INSERT`/`UPDATE`) mutation (§4.2.1-§4.2.2).
    /// Optimistic mutations are pushed onto the resource's FIFO stack;
    /// confirmed ones are merged into `authoritative` and any optimistic
    /// entry sharing their id is dropped from the stack first.
    pub async fn add_mutation(
        &self,
        mutation: DefaultMutation,
        optimistic: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.apply_mutation_locked(&mut state, mutation, optimistic)?;
        Ok(())
    }

    fn apply_mutation_locked(
        &self,
        state: &mut StoreState,
        mutation: DefaultMutation,
        optimistic: bool,
    ) -> Result<(), StoreError> {
        let resource = mutation.resource.clone();
        let resource_id = mutation.resource_id.clone();

        let source_key = NodeKey::new(resource.clone(), resource_id.clone());
        if !state.graph.contains(&source_key) {
            let incoming = self.schema.get(&resource)?.incoming_many_edge_types();
            state.graph.create_node(source_key.clone(), &incoming)?;
        }

        let prior_optimistic = state
            .optimistic
            .get(&resource)
            .and_then(|pool| pool.get(&resource_id))
            .cloned()
            .unwrap_or_else(|| Entity::new(resource_id.clone()));

        if optimistic {
            state
                .mutation_stack
                .entry(resource.clone())
                .or_default()
                .push_back(mutation.clone());
        } else {
            if let Some(stack) = state.mutation_stack.get_mut(&resource) {
                stack.retain(|m| m.id != mutation.id);
            }
            let authoritative = state
                .authoritative
                .entry(resource.clone())
                .or_default()
                .entry(resource_id.clone())
                .or_insert_with(|| Entity::new(resource_id.clone()));
            let (merged, _accepted) = authoritative.merge_payload(&mutation.payload);
            *authoritative = merged;
        }

        recompute_optimistic(state, &resource, &resource_id);
        self.maintain_relations(state, &resource, &resource_id, &prior_optimistic, &mutation)?;
        self.notify(state, &resource, &resource_id);

        Ok(())
    }

    /// Reads each `one` relation's local column off the incoming payload,
    /// LWW-merges it against the entity's prior optimistic value, and on
    /// acceptance creates the target node (if missing) and links to it —
    /// overwriting whatever the column previously pointed at (§4.2.2).
    fn maintain_relations(
        &self,
        state: &mut StoreState,
        resource: &str,
        resource_id: &str,
        prior_optimistic: &Entity,
        mutation: &DefaultMutation,
    ) -> Result<(), StoreError> {
        let entity_schema = self.schema.get(resource)?.clone();
        let local_columns = entity_schema.one_relations_by_local_column();

        for (local_column, (_relation_name, target_type)) in local_columns {
            let Some(target_id) =
                query_exec::merged_field_value(prior_optimistic, local_column, &mutation.payload)
                    .and_then(|v| v.as_str().map(str::to_string))
            else {
                continue;
            };

            let target_key = NodeKey::new(target_type, target_id.clone());
            if !state.graph.contains(&target_key) {
                let incoming = self.schema.get(target_type)?.incoming_many_edge_types();
                state.graph.create_node(target_key.clone(), &incoming)?;
            }
            let source_key = NodeKey::new(resource, resource_id);
            state.graph.create_link(&source_key, &target_key)?;
        }
        Ok(())
    }

    /// Removes an optimistic mutation from its resource's stack and
    /// recomputes/notifies (§4.2.3).
    pub async fn undo_mutation(&self, resource: &str, mutation_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        self.undo_mutation_locked(&mut state, resource, mutation_id)?;
        Ok(())
    }

    fn undo_mutation_locked(
        &self,
        state: &mut StoreState,
        resource: &str,
        mutation_id: &str,
    ) -> Result<String, StoreError> {
        let resource_id = state
            .mutation_stack
            .get(resource)
            .and_then(|stack| stack.iter().find(|m| m.id == mutation_id))
            .map(|m| m.resource_id.clone())
            .ok_or_else(|| StoreError::MutationNotFound(mutation_id.to_string()))?;

        if let Some(stack) = state.mutation_stack.get_mut(resource) {
            stack.retain(|m| m.id != mutation_id);
        }
        recompute_optimistic(state, resource, &resource_id);
        self.notify(state, resource, &resource_id);
        Ok(resource_id)
    }

    /// Appends a pending custom-procedure message to the custom mutation
    /// stack (§4.2.4).
    pub async fn add_custom_mutation_message(&self, message: CustomMutationMessage) {
        let mut state = self.state.write().await;
        state.custom_mutation_stack.push(message);
    }

    /// Records which optimistic default mutations a custom message produced
    /// (§4.2.4), so they can later be undone together on confirm or reject.
    pub async fn register_custom_mutation(&self, message_id: &str, queued: Vec<(String, String)>) {
        let mut state = self.state.write().await;
        state.custom_mutation_index.insert(message_id.to_string(), queued);
    }

    /// Undoes each registered optimistic mutation (the authoritative server
    /// mutations arrive independently via the normal stream), clears the
    /// index entry, and removes the pending message (§4.2.4).
    pub async fn confirm_custom_mutation(&self, message_id: &str) -> Result<(), StoreError> {
        self.unwind_custom_mutation(message_id).await?;
        Ok(())
    }

    /// Same as [`OptimisticStore::confirm_custom_mutation`] but for
    /// rejection — returns the `(resource, resource_id, mutation_id)`
    /// triples undone so the caller can reject user-level promises (§4.2.4).
    pub async fn undo_custom_mutation(
        &self,
        message_id: &str,
    ) -> Result<Vec<(String, String, String)>, StoreError> {
        self.unwind_custom_mutation(message_id).await
    }

    async fn unwind_custom_mutation(
        &self,
        message_id: &str,
    ) -> Result<Vec<(String, String, String)>, StoreError> {
        let entries = {
            let mut state = self.state.write().await;
            state.custom_mutation_index.remove(message_id).unwrap_or_default()
        };

        let mut undone = Vec::new();
        for (resource, mutation_id) in entries {
            let mut state = self.state.write().await;
            match self.undo_mutation_locked(&mut state, &resource, &mutation_id) {
                Ok(resource_id) => undone.push((resource, resource_id, mutation_id)),
                Err(StoreError::MutationNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let mut state = self.state.write().await;
        state.custom_mutation_stack.retain(|m| m.id != message_id);
        Ok(undone)
    }

    /// Flattens a nested consolidated-state payload (relations inlined)
    /// into confirmed `INSERT`s, nested entities first (§4.2.5).
    pub async fn load_consolidated_state(
        &self,
        resource: &str,
        payloads: Vec<JsonValue>,
    ) -> Result<(), StoreError> {
        let mut flattened = Vec::new();
        for payload in payloads {
            consolidated::flatten(&self.schema, resource, payload, &mut flattened).await?;
        }
        for item in flattened {
            self.add_mutation(item.mutation, false).await?;
        }
        Ok(())
    }

    /// Runs a query against the optimistic pool, returning a cached
    /// snapshot when one exists for `key` and `force` is false (§4.2.6).
    pub async fn get(&self, query: &Query, key: Option<QueryKey>, force: bool) -> JsonValue {
        if !force {
            if let Some(key) = key {
                let state = self.state.read().await;
                if let Some(snapshot) = state.query_snapshots.get(&key) {
                    return snapshot.clone();
                }
            }
        }

        let result = {
            let state = self.state.read().await;
            query_exec::run_query(&state, &self.schema, query)
        };

        if !force {
            if let Some(key) = key {
                let mut state = self.state.write().await;
                if state.collection_subscriptions.contains_key(&key) {
                    state.query_snapshots.insert(key, result.clone());
                }
            }
        }

        result
    }

    /// Subscribes a callback to a query's result (§4.2.7). The first
    /// subscriber for a given [`QueryKey`] computes its flat include set
    /// once and shares it with later subscribers to the same key.
    pub async fn subscribe<F>(&self, query: Query, callback: F) -> CollectionSubscription
    where
        F: Fn(&JsonValue) + Send + Sync + 'static,
    {
        let key = query_key(&query);
        let mut state = self.state.write().await;
        let schema = Arc::clone(&self.schema);
        let entry = state.collection_subscriptions.entry(key).or_insert_with(|| {
            let flat =
                flat_include_resources(&schema, &query.resource, query.include.as_ref(), query.r#where.as_ref());
            SubscriptionEntry {
                query: query.clone(),
                flat_include_resources: flat,
                callbacks: Vec::new(),
                next_callback_id: 0,
            }
        });
        let callback_id = entry.next_callback_id;
        entry.next_callback_id += 1;
        entry.callbacks.push((callback_id, Box::new(callback)));

        CollectionSubscription {
            store: self.clone(),
            key,
            callback_id,
        }
    }

    /// Every mutation still in flight, resource names in sorted order and
    /// FIFO within each resource — the exact order the client's reconnect
    /// replay resends them in (§4.3 "On open" step 3).
    pub async fn pending_mutations(&self) -> Vec<DefaultMutation> {
        let state = self.state.read().await;
        let mut resources: Vec<&String> = state.mutation_stack.keys().collect();
        resources.sort();
        resources
            .into_iter()
            .flat_map(|resource| state.mutation_stack[resource].iter().cloned())
            .collect()
    }

    /// The authoritative pool only — what the disk cache persists (§6). The
    /// optimistic overlay is derived and never itself persisted.
    pub async fn export_entities(&self) -> HashMap<String, HashMap<String, Entity>> {
        self.state.read().await.authoritative.clone()
    }

    /// The mutation-stack/custom-mutation bookkeeping half of the persisted
    /// meta store (§6).
    pub async fn export_meta(&self) -> PersistedMeta {
        let state = self.state.read().await;
        PersistedMeta {
            mutation_stack: state
                .mutation_stack
                .iter()
                .map(|(resource, stack)| (resource.clone(), stack.iter().cloned().collect()))
                .collect(),
            custom_mutation_stack: state.custom_mutation_stack.clone(),
            custom_mutation_index: state.custom_mutation_index.clone(),
        }
    }

    /// Rehydrates a cold store from a previously persisted authoritative
    /// pool and meta store (disk-cache load on client startup, §6). Nodes
    /// for every entity are created first so the second pass can always
    /// link `one` relations regardless of which resource was restored
    /// first.
    pub async fn restore(
        &self,
        entities: HashMap<String, HashMap<String, Entity>>,
        meta: PersistedMeta,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        for (resource, pool) in &entities {
            let incoming = self.schema.get(resource)?.incoming_many_edge_types();
            for id in pool.keys() {
                let key = NodeKey::new(resource.clone(), id.clone());
                if !state.graph.contains(&key) {
                    state.graph.create_node(key, &incoming)?;
                }
            }
        }

        for (resource, pool) in &entities {
            let local_columns = self.schema.get(resource)?.one_relations_by_local_column();
            for (id, entity) in pool {
                for (local_column, (_name, target_type)) in &local_columns {
                    let Some(target_id) = entity
                        .fields
                        .get(*local_column)
                        .and_then(|f| f.value.as_ref())
                        .and_then(|v| v.as_str())
                    else {
                        continue;
                    };
                    let source_key = NodeKey::new(resource.clone(), id.clone());
                    let target_key = NodeKey::new(target_type.to_string(), target_id.to_string());
                    if state.graph.contains(&target_key) {
                        state.graph.create_link(&source_key, &target_key)?;
                    }
                }
            }
        }

        for (resource, pool) in entities {
            state.authoritative.insert(resource.clone(), pool.clone());
            for id in pool.keys() {
                recompute_optimistic(&mut state, &resource, id);
            }
        }

        state.mutation_stack = meta
            .mutation_stack
            .into_iter()
            .map(|(resource, stack)| (resource, stack.into_iter().collect()))
            .collect();
        state.custom_mutation_stack = meta.custom_mutation_stack;
        state.custom_mutation_index = meta.custom_mutation_index;

        for resource in state.mutation_stack.keys().cloned().collect::<Vec<_>>() {
            let ids: Vec<String> = state.mutation_stack[&resource]
                .iter()
                .map(|m| m.resource_id.clone())
                .collect();
            for id in ids {
                recompute_optimistic(&mut state, &resource, &id);
            }
        }

        Ok(())
    }

    /// Notification discipline (§4.2.8): every collection subscription
    /// whose root resource or flat include set names `resource` is
    /// recomputed and, if the result changed by deep equality, replaces its
    /// snapshot and fires its callbacks (panics in one callback are caught
    /// and logged, not propagated). The graph node itself is always
    /// notified too, since a plain field mutation doesn't otherwise touch
    /// the graph.
    fn notify(&self, state: &mut StoreState, resource: &str, id: &str) {
        let keys: Vec<QueryKey> = state
            .collection_subscriptions
            .iter()
            .filter(|(_, entry)| entry.query.resource == resource || entry.flat_include_resources.contains(resource))
            .map(|(key, _)| *key)
            .collect();

        for key in keys {
            let Some(query) = state.collection_subscriptions.get(&key).map(|e| e.query.clone()) else {
                continue;
            };
            let new_result = query_exec::run_query(state, &self.schema, &query);
            let changed = state
                .query_snapshots
                .get(&key)
                .map(|old| old != &new_result)
                .unwrap_or(true);
            if !changed {
                continue;
            }
            state.query_snapshots.insert(key, new_result.clone());
            if let Some(entry) = state.collection_subscriptions.get(&key) {
                for (_, callback) in &entry.callbacks {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&new_result)));
                    if outcome.is_err() {
                        tracing::error!(query = %key, "collection subscription callback panicked");
                    }
                }
            }
        }

        state.graph.notify(&NodeKey::new(resource, id));
    }
}

fn recompute_optimistic(state: &mut StoreState, resource: &str, id: &str) {
    let base = state
        .authoritative
        .get(resource)
        .and_then(|pool| pool.get(id))
        .cloned()
        .unwrap_or_else(|| Entity::new(id));

    let folded = state.mutation_stack.get(resource).map_or_else(
        || base.clone(),
        |stack| {
            stack
                .iter()
                .filter(|m| m.resource_id == id)
                .fold(base.clone(), |acc, m| acc.merge_payload(&m.payload).0)
        },
    );

    state
        .optimistic
        .entry(resource.to_string())
        .or_default()
        .insert(id.to_string(), folded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use sync_schema::{EntitySchema, FieldSpec, FieldValue, RelationSpec, ScalarType};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn schema() -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        registry.register(
            EntitySchema::new("orgs")
                .with_field(
                    "name",
                    FieldSpec {
                        scalar_type: ScalarType::String,
                        default: None,
                    },
                )
                .with_relation(
                    "users",
                    RelationSpec::Many {
                        target: "users".into(),
                        foreign_column: "orgId".into(),
                    },
                ),
        );
        registry.register(
            EntitySchema::new("users")
                .with_field(
                    "name",
                    FieldSpec {
                        scalar_type: ScalarType::String,
                        default: None,
                    },
                )
                .with_relation(
                    "org",
                    RelationSpec::One {
                        target: "orgs".into(),
                        local_column: "orgId".into(),
                    },
                ),
        );
        Arc::new(registry)
    }

    fn payload(fields: &[(&str, JsonValue, i64)]) -> sync_schema::MutationPayload {
        let mut map = BTreeMap::new();
        for (name, value, at) in fields {
            map.insert(name.to_string(), FieldValue::new(value.clone(), ts(*at)));
        }
        sync_schema::MutationPayload::new(map).unwrap()
    }

    #[tokio::test]
    async fn optimistic_mutation_does_not_touch_authoritative() {
        let store = OptimisticStore::new(schema());
        store
            .add_mutation(
                DefaultMutation {
                    id: "m1".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Ann".into(), 0)]),
                },
                true,
            )
            .await
            .unwrap();

        let query = Query {
            resource: "users".into(),
            ..Default::default()
        };
        let result = store.get(&query, None, true).await;
        assert_eq!(result[0]["name"], "Ann");

        // Authoritative pool is untouched by an optimistic mutation.
        let state = store.state.read().await;
        assert!(state.authoritative.get("users").is_none());
    }

    #[tokio::test]
    async fn confirmed_mutation_drops_matching_optimistic_entry() {
        let store = OptimisticStore::new(schema());
        let mutation = DefaultMutation {
            id: "m1".into(),
            resource: "users".into(),
            resource_id: "u1".into(),
            procedure: sync_wire::Procedure::Insert,
            payload: payload(&[("name", "Ann".into(), 0)]),
        };
        store.add_mutation(mutation.clone(), true).await.unwrap();
        store.add_mutation(mutation, false).await.unwrap();

        let state = store.state.read().await;
        assert!(state.mutation_stack.get("users").unwrap().is_empty());
        assert_eq!(
            state.authoritative.get("users").unwrap().get("u1").unwrap().fields["name"].value,
            Some("Ann".into())
        );
    }

    #[tokio::test]
    async fn undo_mutation_reverts_to_authoritative_value() {
        let store = OptimisticStore::new(schema());
        store
            .add_mutation(
                DefaultMutation {
                    id: "base".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Ann".into(), 0)]),
                },
                false,
            )
            .await
            .unwrap();
        store
            .add_mutation(
                DefaultMutation {
                    id: "opt".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Update,
                    payload: payload(&[("name", "Benedict".into(), 5)]),
                },
                true,
            )
            .await
            .unwrap();

        let query = Query {
            resource: "users".into(),
            ..Default::default()
        };
        let before = store.get(&query, None, true).await;
        assert_eq!(before[0]["name"], "Benedict");

        store.undo_mutation("users", "opt").await.unwrap();

        let after = store.get(&query, None, true).await;
        assert_eq!(after[0]["name"], "Ann");
    }

    #[tokio::test]
    async fn relation_maintenance_links_and_materializes_one_relation() {
        let store = OptimisticStore::new(schema());
        store
            .add_mutation(
                DefaultMutation {
                    id: "m-org".into(),
                    resource: "orgs".into(),
                    resource_id: "o1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Acme".into(), 0)]),
                },
                false,
            )
            .await
            .unwrap();
        store
            .add_mutation(
                DefaultMutation {
                    id: "m-user".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Ann".into(), 0), ("orgId", "o1".into(), 0)]),
                },
                false,
            )
            .await
            .unwrap();

        let mut include = sync_wire::IncludeTree::new();
        include.insert("org".to_string(), sync_wire::Include::Flag(true));
        let query = Query {
            resource: "users".into(),
            include: Some(include),
            ..Default::default()
        };
        let result = store.get(&query, None, true).await;
        assert_eq!(result[0]["org"]["value"]["name"], "Acme");
    }

    #[tokio::test]
    async fn many_relation_materializes_via_reverse_edge() {
        let store = OptimisticStore::new(schema());
        store
            .add_mutation(
                DefaultMutation {
                    id: "m-org".into(),
                    resource: "orgs".into(),
                    resource_id: "o1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Acme".into(), 0)]),
                },
                false,
            )
            .await
            .unwrap();
        store
            .add_mutation(
                DefaultMutation {
                    id: "m-user".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Ann".into(), 0), ("orgId", "o1".into(), 0)]),
                },
                false,
            )
            .await
            .unwrap();

        let mut include = sync_wire::IncludeTree::new();
        include.insert("users".to_string(), sync_wire::Include::Flag(true));
        let query = Query {
            resource: "orgs".into(),
            include: Some(include),
            ..Default::default()
        };
        let result = store.get(&query, None, true).await;
        let users = result[0]["users"]["value"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["name"], "Ann");
    }

    #[tokio::test]
    async fn subscription_fires_once_per_distinct_result() {
        let store = OptimisticStore::new(schema());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let query = Query {
            resource: "users".into(),
            ..Default::default()
        };
        let handle = store
            .subscribe(query, move |_| {
                hits_clone.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .await;

        store
            .add_mutation(
                DefaultMutation {
                    id: "m1".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Insert,
                    payload: payload(&[("name", "Ann".into(), 0)]),
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        // Undoing and re-adding the exact same mutation produces an
        // identical result, so the second notification is suppressed.
        store.undo_mutation("users", "m1").await.unwrap();
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);

        handle.unsubscribe().await;
        let state = store.state.read().await;
        assert!(state.collection_subscriptions.is_empty());
    }

    #[tokio::test]
    async fn custom_mutation_resolve_undoes_queued_defaults() {
        let store = OptimisticStore::new(schema());
        store
            .add_mutation(
                DefaultMutation {
                    id: "queued-1".into(),
                    resource: "users".into(),
                    resource_id: "u1".into(),
                    procedure: sync_wire::Procedure::Update,
                    payload: payload(&[("name", "Pending".into(), 0)]),
                },
                true,
            )
            .await
            .unwrap();
        store
            .add_custom_mutation_message(CustomMutationMessage {
                id: "msg-1".into(),
                resource: "users".into(),
                procedure: "promote".into(),
                payload: None,
            })
            .await;
        store
            .register_custom_mutation("msg-1", vec![("users".to_string(), "queued-1".to_string())])
            .await;

        let undone = store.undo_custom_mutation("msg-1").await.unwrap();
        assert_eq!(undone, vec![("users".to_string(), "u1".to_string(), "queued-1".to_string())]);

        let state = store.state.read().await;
        assert!(state.mutation_stack.get("users").unwrap().is_empty());
        assert!(!state.custom_mutation_index.contains_key("msg-1"));
    }

    #[tokio::test]
    async fn load_consolidated_state_splits_nested_relations() {
        let store = OptimisticStore::new(schema());
        let payload = serde_json::json!({
            "id": "u1",
            "name": { "value": "Ann", "_meta": { "timestamp": "1970-01-01T00:00:00Z" } },
            "orgId": { "value": "o1", "_meta": { "timestamp": "1970-01-01T00:00:00Z" } },
            "org": {
                "id": "o1",
                "name": { "value": "Acme", "_meta": { "timestamp": "1970-01-01T00:00:00Z" } }
            }
        });
        store.load_consolidated_state("users", vec![payload]).await.unwrap();

        let query = Query {
            resource: "orgs".into(),
            ..Default::default()
        };
        let result = store.get(&query, None, true).await;
        assert_eq!(result[0]["name"], "Acme");
    }
}
