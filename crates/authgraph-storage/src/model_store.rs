//! Versioned, publish-once registry of compiled authorization models.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ulid::Ulid;

use authgraph_domain::engine::ModelReader;
use authgraph_domain::error::EngineResult;
use authgraph_domain::model::CompiledModel;

use crate::error::{StorageError, StorageResult};

/// A published model version. Immutable once published.
#[derive(Debug, Clone)]
pub struct PublishedModel {
    /// The version identifier (a ULID assigned at publish time).
    pub version: String,
    /// When the version was published.
    pub created_at: DateTime<Utc>,
    /// The compiled model.
    pub model: Arc<CompiledModel>,
}

/// In-memory model store.
///
/// Publishing assigns a fresh version identifier and never replaces an
/// existing entry, so every version a caller has pinned stays readable
/// for as long as the store lives. `latest_version` exists for the outer
/// layer to resolve "latest" *before* pinning a request; the engine
/// itself only ever reads explicit versions.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: DashMap<String, PublishedModel>,
    /// Publish order, newest last.
    versions: Mutex<Vec<String>>,
}

impl MemoryModelStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store wrapped in `Arc`.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publishes a compiled model and returns its version identifier.
    pub fn publish(&self, model: CompiledModel) -> String {
        let version = Ulid::new().to_string();
        let published = PublishedModel {
            version: version.clone(),
            created_at: Utc::now(),
            model: Arc::new(model),
        };
        self.models.insert(version.clone(), published);
        self.versions
            .lock()
            .expect("model store version list poisoned")
            .push(version.clone());
        version
    }

    /// Gets a published model by version.
    pub fn get(&self, version: &str) -> StorageResult<PublishedModel> {
        self.models
            .get(version)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::ModelNotFound {
                version: version.to_string(),
            })
    }

    /// The most recently published version, if any.
    pub fn latest_version(&self) -> Option<String> {
        self.versions
            .lock()
            .expect("model store version list poisoned")
            .last()
            .cloned()
    }
}

#[async_trait]
impl ModelReader for MemoryModelStore {
    async fn get_model(&self, version: &str) -> EngineResult<Arc<CompiledModel>> {
        Ok(self.get(version)?.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authgraph_domain::model::{compile, parse};

    fn model() -> CompiledModel {
        compile(parse("type user").unwrap()).unwrap()
    }

    #[test]
    fn publish_assigns_distinct_versions() {
        let store = MemoryModelStore::new();
        let v1 = store.publish(model());
        let v2 = store.publish(model());
        assert_ne!(v1, v2);
        assert!(store.get(&v1).is_ok());
        assert!(store.get(&v2).is_ok());
    }

    #[test]
    fn latest_version_tracks_publish_order() {
        let store = MemoryModelStore::new();
        assert!(store.latest_version().is_none());
        let v1 = store.publish(model());
        assert_eq!(store.latest_version(), Some(v1));
        let v2 = store.publish(model());
        assert_eq!(store.latest_version(), Some(v2));
    }

    #[test]
    fn unknown_version_errors() {
        let store = MemoryModelStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(StorageError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn model_reader_maps_missing_versions() {
        let store = MemoryModelStore::new();
        let err = store.get_model("nope").await.unwrap_err();
        assert!(matches!(
            err,
            authgraph_domain::EngineError::UnknownModelVersion { .. }
        ));
    }
}
