use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_schema::Entity;
use sync_store::PersistedMeta;
use tracing::warn;

use crate::error::DiskCacheError;

/// Persisted state layout (§6): per-resource entity tables plus the meta
/// store, tagged with the schema version they were written under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedState {
    pub schema_version: u64,
    pub entities: HashMap<String, HashMap<String, Entity>>,
    pub meta: PersistedMeta,
}

#[async_trait]
pub trait DiskCache: Send + Sync {
    async fn load(&self) -> Result<Option<CachedState>, DiskCacheError>;
    async fn save(&self, state: CachedState);
}

/// Reference `DiskCache`, grounded on `RunStore`'s
/// `Arc<RwLock<_>>` + `spawn_blocking` JSON persistence pattern.
#[derive(Debug, Clone)]
pub struct JsonFileDiskCache {
    path: PathBuf,
}

impl JsonFileDiskCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DiskCache for JsonFileDiskCache {
    async fn load(&self) -> Result<Option<CachedState>, DiskCacheError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<CachedState>, DiskCacheError> {
            if !path.exists() {
                return Ok(None);
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| DiskCacheError::Io(e.to_string()))?;
            let state = serde_json::from_str(&raw).map_err(|e| DiskCacheError::Serde(e.to_string()))?;
            Ok(Some(state))
        })
        .await
        .map_err(|e| DiskCacheError::Io(e.to_string()))?
    }

    /// Fire-and-forget (§5 Shared-resource policy): a failed write is
    /// logged, never propagated, and never blocks in-memory progress.
    async fn save(&self, state: CachedState) {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), DiskCacheError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| DiskCacheError::Io(e.to_string()))?;
            }
            let json = serde_json::to_vec_pretty(&state).map_err(|e| DiskCacheError::Serde(e.to_string()))?;
            std::fs::write(&path, json).map_err(|e| DiskCacheError::Io(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "disk cache persistence failed"),
            Err(err) => warn!(error = %err, "disk cache persistence task panicked"),
        }
    }
}
