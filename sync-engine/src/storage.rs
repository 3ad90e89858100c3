//! An in-memory reference [`EntityStorage`] — the real SQL persistence
//! engine is explicitly out of scope (§1), so this is what proves the
//! planner/route machinery against a live server.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sync_schema::Entity;
use sync_server::{EntityStorage, ServerError, StorageBatcher};
use sync_wire::WhereClause;

#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, HashMap<String, Entity>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBatcher for InMemoryStorage {
    async fn fetch(&self, resource: &str, where_clause: &WhereClause) -> Result<Vec<JsonValue>, ServerError> {
        let tables = self.tables.read().expect("in-memory storage lock poisoned");
        let Some(table) = tables.get(resource) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .map(Entity::to_json)
            .filter(|row| where_clause.matches(row))
            .collect())
    }
}

#[async_trait]
impl EntityStorage for InMemoryStorage {
    async fn find_by_id(&self, resource: &str, id: &str) -> Result<Option<Entity>, ServerError> {
        let tables = self.tables.read().expect("in-memory storage lock poisoned");
        Ok(tables.get(resource).and_then(|table| table.get(id)).cloned())
    }

    async fn insert(&self, resource: &str, entity: Entity) -> Result<(), ServerError> {
        let mut tables = self.tables.write().expect("in-memory storage lock poisoned");
        tables
            .entry(resource.to_string())
            .or_default()
            .insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn update(&self, resource: &str, entity: Entity) -> Result<(), ServerError> {
        self.insert(resource, entity).await
    }
}
