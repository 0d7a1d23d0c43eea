//! In-memory relationship store.
//!
//! Keeps a forward index keyed by (object type, object id, relation) for
//! the evaluator's leaf reads and a reverse index keyed by subject for
//! the ListObjects walk. Both indices hold the same facts and are
//! updated together under the forward bucket's shard lock.
//!
//! # Read consistency
//!
//! This store provides **no snapshot isolation**: an evaluation that
//! performs several reads may observe a concurrent write in some reads
//! and not others. Callers that need a stable view must serialize their
//! writes externally. Durable backends with snapshot reads can offer the
//! stronger guarantee behind the same traits.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;

use authgraph_domain::engine::TupleReader;
use authgraph_domain::error::EngineResult;
use authgraph_domain::model::{RelationshipTuple, SubjectRef};

use crate::error::StorageResult;
use crate::traits::{validate_tuple, RelationshipStore, TupleFilter};

type ForwardKey = (String, String, String);

/// In-memory implementation of [`RelationshipStore`].
///
/// # Performance characteristics
///
/// - **Write / delete**: O(bucket) scan for fact identity, O(1) index
///   update
/// - **Forward read**: O(1) bucket lookup
/// - **Reverse read**: O(1) bucket lookup, filtered by relation
/// - **Type enumeration**: O(buckets), used only by the brute-force
///   list fallback
#[derive(Debug, Default)]
pub struct MemoryTupleStore {
    forward: DashMap<ForwardKey, Vec<RelationshipTuple>>,
    reverse: DashMap<SubjectRef, Vec<RelationshipTuple>>,
}

impl MemoryTupleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store wrapped in `Arc`.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of stored facts.
    pub fn len(&self) -> usize {
        self.forward.iter().map(|bucket| bucket.value().len()).sum()
    }

    /// True when no facts are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forward_key(tuple: &RelationshipTuple) -> ForwardKey {
        (
            tuple.object.object_type.clone(),
            tuple.object.object_id.clone(),
            tuple.relation.clone(),
        )
    }

    fn insert(&self, tuple: RelationshipTuple) {
        let mut bucket = self.forward.entry(Self::forward_key(&tuple)).or_default();
        // Duplicate writes of the same fact are idempotent no-ops.
        if bucket.iter().any(|existing| existing.same_fact(&tuple)) {
            return;
        }
        self.reverse
            .entry(tuple.subject.clone())
            .or_default()
            .push(tuple.clone());
        bucket.push(tuple);
    }

    fn remove(&self, tuple: &RelationshipTuple) {
        if let Some(mut bucket) = self.forward.get_mut(&Self::forward_key(tuple)) {
            bucket.retain(|existing| !existing.same_fact(tuple));
        }
        if let Some(mut bucket) = self.reverse.get_mut(&tuple.subject) {
            bucket.retain(|existing| !existing.same_fact(tuple));
        }
    }
}

#[async_trait]
impl RelationshipStore for MemoryTupleStore {
    #[instrument(skip_all, fields(writes = writes.len(), deletes = deletes.len()))]
    async fn write(
        &self,
        writes: Vec<RelationshipTuple>,
        deletes: Vec<RelationshipTuple>,
    ) -> StorageResult<()> {
        for tuple in &writes {
            validate_tuple(tuple)?;
        }
        for tuple in &deletes {
            validate_tuple(tuple)?;
        }

        for tuple in &deletes {
            self.remove(tuple);
        }
        for tuple in writes {
            self.insert(tuple);
        }
        Ok(())
    }

    async fn read(&self, filter: &TupleFilter) -> StorageResult<Vec<RelationshipTuple>> {
        // Fully keyed reads hit the forward index directly.
        if let (Some(object_type), Some(object_id), Some(relation)) =
            (&filter.object_type, &filter.object_id, &filter.relation)
        {
            let key = (object_type.clone(), object_id.clone(), relation.clone());
            let tuples = self
                .forward
                .get(&key)
                .map(|bucket| {
                    bucket
                        .iter()
                        .filter(|t| filter.subject.as_ref().map_or(true, |s| &t.subject == s))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            return Ok(tuples);
        }

        let mut tuples = Vec::new();
        for bucket in self.forward.iter() {
            for tuple in bucket.value() {
                let matches = filter
                    .object_type
                    .as_ref()
                    .map_or(true, |ot| &tuple.object.object_type == ot)
                    && filter
                        .object_id
                        .as_ref()
                        .map_or(true, |oi| &tuple.object.object_id == oi)
                    && filter.relation.as_ref().map_or(true, |r| &tuple.relation == r)
                    && filter.subject.as_ref().map_or(true, |s| &tuple.subject == s);
                if matches {
                    tuples.push(tuple.clone());
                }
            }
        }
        Ok(tuples)
    }

    async fn read_by_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
    ) -> StorageResult<Vec<RelationshipTuple>> {
        Ok(self
            .reverse
            .get(subject)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|t| relation.map_or(true, |r| t.relation == r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn objects_of_type(
        &self,
        object_type: &str,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .forward
            .iter()
            .filter(|bucket| bucket.key().0 == object_type && !bucket.value().is_empty())
            .map(|bucket| bucket.key().1.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids.truncate(limit);
        Ok(ids)
    }
}

// Adapter: the engine reads through this seam; storage errors surface as
// engine infrastructure errors.
#[async_trait]
impl TupleReader for MemoryTupleStore {
    async fn read_tuples(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        let filter = TupleFilter {
            object_type: Some(object_type.to_string()),
            object_id: Some(object_id.to_string()),
            relation: Some(relation.to_string()),
            subject: None,
        };
        Ok(RelationshipStore::read(self, &filter).await?)
    }

    async fn read_tuples_for_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
    ) -> EngineResult<Vec<RelationshipTuple>> {
        Ok(RelationshipStore::read_by_subject(self, subject, relation).await?)
    }

    async fn list_objects_of_type(
        &self,
        object_type: &str,
        limit: usize,
    ) -> EngineResult<Vec<String>> {
        Ok(RelationshipStore::objects_of_type(self, object_type, limit).await?)
    }
}
