//! Server subscription manager (§4.5): per-resource subscription map,
//! first-level `where` + authorization evaluation, and the INSERT/UPDATE
//! transition table that decides what a mutation looks like on the wire.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use sync_schema::{Entity, MutationPayload};
use sync_wire::{Procedure, Query, WhereClause};
use tracing::error;

pub type SubscriptionCallback = Arc<dyn Fn(&ServerMutation) + Send + Sync>;

/// A mutation as it goes out to a subscribed client — the server-side twin
/// of the client store's `DefaultMutation` (§3 Mutation record).
#[derive(Debug, Clone)]
pub struct ServerMutation {
    pub id: String,
    pub resource: String,
    pub resource_id: String,
    pub procedure: Procedure,
    pub payload: MutationPayload,
}

struct Subscription {
    query: Query,
    authorization_where: Option<WhereClause>,
    callback: SubscriptionCallback,
}

#[derive(Default)]
pub struct SubscriptionManager {
    by_resource: RwLock<HashMap<String, HashMap<u64, Subscription>>>,
    next_id: AtomicU64,
}

pub struct SubscriptionHandle {
    resource: String,
    id: u64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a live stream (§4.5 `subscribeToMutations`). `authorization_where`
    /// is the route's `read(ctx)` decision when it returned a `WhereClause`.
    pub fn subscribe_to_mutations(
        &self,
        query: Query,
        authorization_where: Option<WhereClause>,
        callback: SubscriptionCallback,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        let resource = query.resource.clone();
        self.by_resource
            .write()
            .unwrap()
            .entry(resource.clone())
            .or_default()
            .insert(
                id,
                Subscription {
                    query,
                    authorization_where,
                    callback,
                },
            );
        SubscriptionHandle { resource, id }
    }

    /// Synchronous and idempotent (§5 Cancellation/timeouts).
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(subs) = self.by_resource.write().unwrap().get_mut(&handle.resource) {
            subs.remove(&handle.id);
        }
    }

    /// `notifySubscribers` (§4.5): evaluates first-level `where` and
    /// `authorizationWhere` against the merged entity, then emits an INSERT
    /// or UPDATE per the transition table. Panicking callbacks are caught
    /// and logged; the remaining subscribers still run.
    pub fn notify_subscribers(
        &self,
        resource: &str,
        mutation_id: &str,
        procedure: &Procedure,
        payload: &MutationPayload,
        previous: Option<&Entity>,
        current: &Entity,
    ) {
        let current_json = current.to_json();
        let previous_json = previous.map(Entity::to_json);

        let subs: Vec<(Query, Option<WhereClause>, SubscriptionCallback)> = {
            let guard = self.by_resource.read().unwrap();
            let Some(subs) = guard.get(resource) else {
                return;
            };
            subs.values()
                .map(|s| (s.query.clone(), s.authorization_where.clone(), Arc::clone(&s.callback)))
                .collect()
        };

        for (query, authorization_where, callback) in subs {
            let authorized = authorization_where
                .as_ref()
                .map(|w| w.matches_first_level(&current_json))
                .unwrap_or(true);
            if !authorized {
                continue;
            }

            let now_matches = query
                .r#where
                .as_ref()
                .map(|w| w.matches_first_level(&current_json))
                .unwrap_or(true);
            let before_matches = previous_json
                .as_ref()
                .map(|p| query.r#where.as_ref().map(|w| w.matches_first_level(p)).unwrap_or(true))
                .unwrap_or(false);

            if !now_matches && !before_matches {
                continue;
            }

            let outgoing = if !before_matches && now_matches {
                ServerMutation {
                    id: mutation_id.to_string(),
                    resource: resource.to_string(),
                    resource_id: current.id.clone(),
                    procedure: Procedure::Insert,
                    payload: MutationPayload::new(current.fields.clone())
                        .expect("entity fields never contain an id key"),
                }
            } else {
                ServerMutation {
                    id: mutation_id.to_string(),
                    resource: resource.to_string(),
                    resource_id: current.id.clone(),
                    procedure: procedure.clone(),
                    payload: payload.clone(),
                }
            };

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| (callback)(&outgoing)));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                error!(%resource, subscriber_error = %message, "subscription callback panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
