//! Ties a [`SchemaRegistry`], the storage seam, and the registered
//! [`Route`]s together into the single object the transport surface drives.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sync_schema::SchemaRegistry;
use sync_wire::{Procedure, Query};

use crate::authorization::{AuthContext, AuthDecision};
use crate::error::ServerError;
use crate::planner::run_query as planner_run_query;
use crate::route::{AsBatcher, EntityStorage, Route};
use crate::subscriptions::{ServerMutation, SubscriptionHandle, SubscriptionManager};

pub struct SyncEngine {
    schema: Arc<SchemaRegistry>,
    storage: Arc<dyn EntityStorage>,
    routes: HashMap<String, Route>,
    subscriptions: SubscriptionManager,
}

impl SyncEngine {
    pub fn new(schema: SchemaRegistry, storage: Arc<dyn EntityStorage>) -> Self {
        Self {
            schema: Arc::new(schema),
            storage,
            routes: HashMap::new(),
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.insert(route.resource.clone(), route);
        self
    }

    fn route(&self, resource: &str) -> Result<&Route, ServerError> {
        self.routes
            .get(resource)
            .ok_or_else(|| ServerError::InvalidResource(resource.to_string()))
    }

    /// Runs a `QUERY`/`SUBSCRIBE` read: §4.4's planner, gated by the route's
    /// `read` authorization.
    pub async fn run_query(&self, query: &Query, ctx: &AuthContext) -> Result<Vec<JsonValue>, ServerError> {
        let read_auth = self.route(&query.resource)?.read_authorization(ctx);
        planner_run_query(&self.schema, &AsBatcher(self.storage.as_ref()), query, &read_auth).await
    }

    /// Runs `handleMutation` (§4.6) for the resource named by `resource`.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_mutation(
        &self,
        resource: &str,
        ctx: &AuthContext,
        mutation_id: &str,
        resource_id: Option<String>,
        procedure: Procedure,
        payload: Option<JsonValue>,
    ) -> Result<JsonValue, ServerError> {
        let route = self.route(resource)?;
        route
            .handle_mutation(
                &self.schema,
                self.storage.as_ref(),
                &self.subscriptions,
                ctx,
                mutation_id,
                resource_id,
                procedure,
                payload,
            )
            .await
    }

    /// Installs a live subscription (§4.5), gated the same way `run_query`
    /// is: `Deny` never installs a callback, `Where` is carried forward so
    /// `notify_subscribers` can re-check it per mutation.
    pub fn subscribe(
        &self,
        query: Query,
        ctx: &AuthContext,
        callback: impl Fn(&ServerMutation) + Send + Sync + 'static,
    ) -> Option<SubscriptionHandle> {
        let route = self.routes.get(&query.resource)?;
        let decision = route.read_authorization(ctx);
        if matches!(decision, AuthDecision::Deny) {
            return None;
        }
        let authorization_where = decision.as_where().cloned();
        Some(
            self.subscriptions
                .subscribe_to_mutations(query, authorization_where, Arc::new(callback)),
        )
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle);
    }
}
