//! Route / mutation dispatcher (§4.6): one [`Route`] per resource, wiring
//! its [`Authorization`] triad and custom-procedure handlers to
//! `handle_mutation`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sync_schema::{Entity, FieldValue, MutationPayload, SchemaRegistry};
use sync_wire::{Include, IncludeTree, Procedure, WhereClause};

use crate::authorization::{AuthContext, AuthDecision, Authorization};
use crate::error::ServerError;
use crate::planner::{run_query, StorageBatcher};
use crate::subscriptions::SubscriptionManager;

/// The read/write half of the storage seam. [`StorageBatcher::fetch`]
/// covers query execution; routes additionally need point lookups and
/// writes, which is what a real SQL driver (or the in-memory reference
/// implementation) provides here.
#[async_trait]
pub trait EntityStorage: StorageBatcher {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Entity>, ServerError>;
    async fn insert(&self, resource: &str, entity: Entity) -> Result<(), ServerError>;
    async fn update(&self, resource: &str, entity: Entity) -> Result<(), ServerError>;
}

/// Borrows a `dyn EntityStorage` as a `dyn StorageBatcher` for the planner.
/// A plain supertrait method call would do this implicitly, but handing the
/// planner a trait object by value needs an explicit, named adapter rather
/// than relying on dyn-upcasting coercion.
pub(crate) struct AsBatcher<'a>(pub &'a dyn EntityStorage);

#[async_trait]
impl<'a> StorageBatcher for AsBatcher<'a> {
    async fn fetch(&self, resource: &str, where_clause: &WhereClause) -> Result<Vec<JsonValue>, ServerError> {
        self.0.fetch(resource, where_clause).await
    }
}

/// A custom procedure's declared validator plus handler (§4.6 "Custom
/// procedure"). `handle` receives the storage seam directly — the spec's
/// `{ req, db }` handler argument.
#[async_trait]
pub trait CustomProcedure: Send + Sync {
    fn validate(&self, input: &JsonValue) -> Result<(), ServerError> {
        let _ = input;
        Ok(())
    }

    async fn handle(
        &self,
        ctx: &AuthContext,
        storage: &dyn EntityStorage,
        resource_id: Option<&str>,
        input: JsonValue,
    ) -> Result<JsonValue, ServerError>;
}

pub struct Route {
    pub resource: String,
    authorization: Arc<dyn Authorization>,
    procedures: HashMap<String, Arc<dyn CustomProcedure>>,
}

impl Route {
    pub fn new(resource: impl Into<String>, authorization: Arc<dyn Authorization>) -> Self {
        Self {
            resource: resource.into(),
            authorization,
            procedures: HashMap::new(),
        }
    }

    pub fn with_procedure(mut self, name: impl Into<String>, handler: Arc<dyn CustomProcedure>) -> Self {
        self.procedures.insert(name.into(), handler);
        self
    }

    pub fn read_authorization(&self, ctx: &AuthContext) -> AuthDecision {
        self.authorization.read(ctx)
    }

    /// `handleMutation` (§4.6). Returns the merged/handled entity as plain
    /// JSON, which the caller turns into a `REPLY`/authoritative `MUTATE`.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_mutation(
        &self,
        schema: &SchemaRegistry,
        storage: &dyn EntityStorage,
        subscriptions: &SubscriptionManager,
        ctx: &AuthContext,
        mutation_id: &str,
        resource_id: Option<String>,
        procedure: Procedure,
        payload: Option<JsonValue>,
    ) -> Result<JsonValue, ServerError> {
        match procedure {
            Procedure::Insert => {
                let resource_id = resource_id
                    .ok_or_else(|| ServerError::InvalidRequest("INSERT requires a resourceId".into()))?;
                self.handle_insert(schema, storage, subscriptions, ctx, mutation_id, resource_id, payload)
                    .await
            }
            Procedure::Update => {
                let resource_id = resource_id
                    .ok_or_else(|| ServerError::InvalidRequest("UPDATE requires a resourceId".into()))?;
                self.handle_update(schema, storage, subscriptions, ctx, mutation_id, resource_id, payload)
                    .await
            }
            Procedure::Custom(name) => {
                self.handle_custom(storage, ctx, &name, resource_id.as_deref(), payload)
                    .await
            }
        }
    }

    async fn handle_insert(
        &self,
        schema: &SchemaRegistry,
        storage: &dyn EntityStorage,
        subscriptions: &SubscriptionManager,
        ctx: &AuthContext,
        mutation_id: &str,
        resource_id: String,
        payload: Option<JsonValue>,
    ) -> Result<JsonValue, ServerError> {
        if storage.find_by_id(&self.resource, &resource_id).await?.is_some() {
            return Err(ServerError::AlreadyExists);
        }

        let payload = parse_payload(payload)?;
        let (preview, _accepted) = Entity::new(resource_id.clone()).merge_payload(&payload);

        let decision = self.authorization.insert(ctx, &preview.to_json());
        if !self.authorize_with_deep_where(schema, storage, &decision, &resource_id, &preview).await? {
            return Err(ServerError::NotAuthorized);
        }

        storage.insert(&self.resource, preview.clone()).await?;
        subscriptions.notify_subscribers(
            &self.resource,
            mutation_id,
            &Procedure::Insert,
            &payload,
            None,
            &preview,
        );
        Ok(preview.to_json())
    }

    async fn handle_update(
        &self,
        schema: &SchemaRegistry,
        storage: &dyn EntityStorage,
        subscriptions: &SubscriptionManager,
        ctx: &AuthContext,
        mutation_id: &str,
        resource_id: String,
        payload: Option<JsonValue>,
    ) -> Result<JsonValue, ServerError> {
        let Some(existing) = storage.find_by_id(&self.resource, &resource_id).await? else {
            return Err(ServerError::NotFound(resource_id));
        };

        let payload = parse_payload(payload)?;
        let (merged, accepted) = existing.merge_payload(&payload);
        if accepted.is_empty() && !payload.is_empty() {
            return Err(ServerError::MutationRejected);
        }

        if let Some(update_auth) = self.authorization.update() {
            let pre_decision = update_auth.pre_mutation(ctx, &merged.to_json());
            if !self
                .authorize_with_deep_where(schema, storage, &pre_decision, &resource_id, &merged)
                .await?
            {
                return Err(ServerError::NotAuthorized);
            }

            storage.update(&self.resource, merged.clone()).await?;

            let post_decision = update_auth.post_mutation(ctx, &merged.to_json());
            if !self
                .authorize_with_deep_where(schema, storage, &post_decision, &resource_id, &merged)
                .await?
            {
                return Err(ServerError::NotAuthorized);
            }
        } else {
            storage.update(&self.resource, merged.clone()).await?;
        }

        subscriptions.notify_subscribers(
            &self.resource,
            mutation_id,
            &Procedure::Update,
            &payload,
            Some(&existing),
            &merged,
        );
        Ok(merged.to_json())
    }

    async fn handle_custom(
        &self,
        storage: &dyn EntityStorage,
        ctx: &AuthContext,
        name: &str,
        resource_id: Option<&str>,
        payload: Option<JsonValue>,
    ) -> Result<JsonValue, ServerError> {
        let handler = self
            .procedures
            .get(name)
            .ok_or_else(|| ServerError::InvalidRequest(format!("unknown procedure: {name}")))?;
        let input = payload.unwrap_or(JsonValue::Null);
        handler.validate(&input)?;
        handler.handle(ctx, storage, resource_id, input).await
    }

    /// `Allow`/`Deny` resolve directly; a `Where` decision that references
    /// relation fields is checked against the entity re-fetched with those
    /// relations included (§4.6 "deep-where expansion", Decision #2), using
    /// `WhereClause::referenced_fields` — already a full `$and`/`$or`/`$not`
    /// walk — to find which relations to include.
    async fn authorize_with_deep_where(
        &self,
        schema: &SchemaRegistry,
        storage: &dyn EntityStorage,
        decision: &AuthDecision,
        resource_id: &str,
        preview: &Entity,
    ) -> Result<bool, ServerError> {
        let AuthDecision::Where(clause) = decision else {
            return Ok(decision.permits(&preview.to_json()));
        };

        let entity_schema = schema.get(&self.resource)?;
        let relation_fields: Vec<String> = clause
            .referenced_fields()
            .into_iter()
            .filter(|field| entity_schema.relations.contains_key(*field))
            .map(str::to_string)
            .collect();

        if relation_fields.is_empty() {
            return Ok(clause.matches(&preview.to_json()));
        }

        let mut include = IncludeTree::default();
        for field in relation_fields {
            include.insert(field, Include::Flag(true));
        }
        let query = sync_wire::Query {
            resource: self.resource.clone(),
            r#where: Some(WhereClause::Field(
                "id".to_string(),
                sync_wire::FieldMatch::Eq(resource_id.into()),
            )),
            include: Some(include),
            sort: None,
            limit: None,
        };
        let rows = run_query(schema, &AsBatcher(storage), &query, &AuthDecision::Allow).await?;
        let enriched = rows.into_iter().next().unwrap_or_else(|| preview.to_json());
        Ok(clause.matches(&enriched))
    }
}

fn parse_payload(raw: Option<JsonValue>) -> Result<MutationPayload, ServerError> {
    let object = match raw {
        None | Some(JsonValue::Null) => return Ok(MutationPayload::empty()),
        Some(JsonValue::Object(map)) => map,
        Some(other) => {
            return Err(ServerError::InvalidRequest(format!(
                "expected a payload object, got {other}"
            )))
        }
    };

    let mut fields = BTreeMap::new();
    for (name, value) in object {
        let field: FieldValue = serde_json::from_value(value)
            .map_err(|_| ServerError::InvalidRequest(format!("field {name:?} is not a valid field envelope")))?;
        fields.insert(name, field);
    }
    MutationPayload::new(fields).map_err(ServerError::from)
}
