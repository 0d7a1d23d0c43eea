//! Mock implementations for engine testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::{Engine, ModelReader, TupleReader};
use crate::error::{EngineError, EngineResult};
use crate::model::{
    compile, parse, CompiledModel, ObjectRef, RelationshipTuple, SubjectRef,
};

/// Mock tuple store for testing: a flat list scanned per read.
pub struct MockTupleStore {
    tuples: RwLock<Vec<RelationshipTuple>>,
}

impl MockTupleStore {
    pub fn new() -> Self {
        Self {
            tuples: RwLock::new(Vec::new()),
        }
    }

    /// Adds a tuple from string references, e.g.
    /// `add("user:alice", "viewer", "document:readme")`.
    pub async fn add(&self, subject: &str, relation: &str, object: &str) {
        self.add_tuple(RelationshipTuple::new(
            SubjectRef::parse(subject).unwrap(),
            relation,
            ObjectRef::parse(object).unwrap(),
        ))
        .await;
    }

    pub async fn add_tuple(&self, tuple: RelationshipTuple) {
        let mut tuples = self.tuples.write().await;
        if !tuples.iter().any(|existing| existing.same_fact(&tuple)) {
            tuples.push(tuple);
        }
    }

    #[allow(dead_code)]
    pub async fn remove(&self, subject: &str, relation: &str, object: &str) {
        let subject = SubjectRef::parse(subject).unwrap();
        let object = ObjectRef::parse(object).unwrap();
        self.tuples.write().await.retain(|t| {
            t.subject != subject || t.relation != relation || t.object != object
        });
    }
}

#[async_trait]
impl TupleReader for MockTupleStore {
    async fn read_tuples(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        Ok(self
            .tuples
            .read()
            .await
            .iter()
            .filter(|t| {
                t.object.object_type == object_type
                    && t.object.object_id == object_id
                    && t.relation == relation
            })
            .cloned()
            .collect())
    }

    async fn read_tuples_for_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        Ok(self
            .tuples
            .read()
            .await
            .iter()
            .filter(|t| {
                &t.subject == subject && relation.map_or(true, |r| t.relation == r)
            })
            .cloned()
            .collect())
    }

    async fn list_objects_of_type(
        &self,
        object_type: &str,
        limit: usize,
    ) -> EngineResult<Vec<String>> {
        let mut ids: HashSet<String> = HashSet::new();
        for tuple in self.tuples.read().await.iter() {
            if tuple.object.object_type == object_type {
                ids.insert(tuple.object.object_id.clone());
            }
        }
        Ok(ids.into_iter().take(limit).collect())
    }
}

/// Mock model store keyed by version string.
pub struct MockModelStore {
    models: RwLock<HashMap<String, Arc<CompiledModel>>>,
}

impl MockModelStore {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Compiles a DSL schema and publishes it under the given version.
    pub async fn publish(&self, version: &str, dsl: &str) {
        let model = compile(parse(dsl).unwrap()).unwrap();
        self.models
            .write()
            .await
            .insert(version.to_string(), Arc::new(model));
    }
}

#[async_trait]
impl ModelReader for MockModelStore {
    async fn get_model(&self, version: &str) -> EngineResult<Arc<CompiledModel>> {
        self.models
            .read()
            .await
            .get(version)
            .cloned()
            .ok_or_else(|| EngineError::UnknownModelVersion {
                version: version.to_string(),
            })
    }
}

/// Creates an engine wired to fresh mocks.
pub fn engine() -> (
    Arc<MockTupleStore>,
    Arc<MockModelStore>,
    Engine<MockTupleStore, MockModelStore>,
) {
    let tuples = Arc::new(MockTupleStore::new());
    let models = Arc::new(MockModelStore::new());
    let engine = Engine::new(Arc::clone(&tuples), Arc::clone(&models));
    (tuples, models, engine)
}
