//! The ListObjects engine: reverse enumeration of accessible objects.
//!
//! Instead of checking every object of the requested type, the engine
//! works backwards from the subject through the tuple store's reverse
//! index:
//!
//! 1. From the compiled model, collect the support of the target
//!    permission: which (type, relation) direct leaves can contribute a
//!    grant, and through which computed references, userset
//!    containments, and traversals a membership propagates upward.
//! 2. Seed with the direct tuples naming the subject (or its type
//!    wildcard) on those leaves, then walk memberships upward until
//!    target-type candidates stop appearing. The walk over-approximates:
//!    it ignores intersections, exclusions, and conditions.
//! 3. Confirm every candidate with a full check, which applies the exact
//!    semantics.
//!
//! Cost is proportional to what the subject can actually reach, not to
//! the size of the object universe. [`Engine::list_objects_naive`] is
//! the explicitly marked O(objects) fallback, kept as the correctness
//! oracle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::StreamExt;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    CompiledModel, ObjectRef, RelationExpr, SubjectRef, SubjectTypeRule,
};

use super::context::TraversalContext;
use super::evaluator::{validate_relation_name, CheckQuery, Engine};
use super::traits::{ModelReader, TupleReader};
use super::types::{ListObjectsRequest, ListObjectsResult};

/// Concurrency bound for the candidate confirmation checks.
const MAX_CONCURRENT_CHECKS: usize = 50;

/// How memberships propagate upward toward the target permission,
/// derived statically from the compiled model.
struct ReverseGraph {
    /// Direct leaves in the target's support, with their subject rules.
    direct_sources: HashMap<(String, String), Vec<SubjectTypeRule>>,
    /// Membership in (type, relation) feeds these relations on the same
    /// object via computed references.
    computed_into: HashMap<(String, String), HashSet<String>>,
    /// Membership in (type, relation) can appear as a userset subject on
    /// these (object type, relation) leaves.
    userset_into: HashMap<(String, String), HashSet<(String, String)>>,
    /// Membership in (parent type, computed relation) propagates through
    /// tupleset tuples to a declaring (type, relation).
    traverse_into: HashMap<(String, String), Vec<TraverseEdge>>,
}

struct TraverseEdge {
    declaring_type: String,
    declared_relation: String,
    tupleset: String,
}

impl ReverseGraph {
    /// Walks the expression trees reachable from the target permission
    /// and records every edge a membership can propagate along.
    ///
    /// Exclusion subtrahends are skipped: they can only remove grants,
    /// never produce candidates, and the confirming check applies them
    /// exactly.
    fn build(
        model: &CompiledModel,
        object_type: &str,
        relation: &str,
    ) -> EngineResult<ReverseGraph> {
        let mut graph = ReverseGraph {
            direct_sources: HashMap::new(),
            computed_into: HashMap::new(),
            userset_into: HashMap::new(),
            traverse_into: HashMap::new(),
        };

        let mut pending = vec![(object_type.to_string(), relation.to_string())];
        let mut visited: HashSet<(String, String)> = HashSet::new();

        while let Some((type_name, relation)) = pending.pop() {
            if !visited.insert((type_name.clone(), relation.clone())) {
                continue;
            }
            let relation_def = model.require_relation(&type_name, &relation)?;
            graph.add_expr_edges(
                model,
                &type_name,
                &relation,
                &relation_def.subject_types,
                &relation_def.expr,
                &mut pending,
            );
        }

        Ok(graph)
    }

    fn add_expr_edges(
        &mut self,
        model: &CompiledModel,
        type_name: &str,
        relation: &str,
        subject_types: &[SubjectTypeRule],
        expr: &RelationExpr,
        pending: &mut Vec<(String, String)>,
    ) {
        match expr {
            RelationExpr::Direct => {
                self.direct_sources.insert(
                    (type_name.to_string(), relation.to_string()),
                    subject_types.to_vec(),
                );
                for rule in subject_types {
                    if let Some(subject_relation) = &rule.relation {
                        self.userset_into
                            .entry((rule.type_name.clone(), subject_relation.clone()))
                            .or_default()
                            .insert((type_name.to_string(), relation.to_string()));
                        pending.push((rule.type_name.clone(), subject_relation.clone()));
                    }
                }
            }
            RelationExpr::Computed { relation: referenced } => {
                self.computed_into
                    .entry((type_name.to_string(), referenced.clone()))
                    .or_default()
                    .insert(relation.to_string());
                pending.push((type_name.to_string(), referenced.clone()));
            }
            RelationExpr::Traverse { tupleset, computed } => {
                // Parent types come from the tupleset relation's subject
                // rules; the compiler guarantees they are concrete.
                if let Some(tupleset_def) = model.relation(type_name, tupleset) {
                    for rule in &tupleset_def.subject_types {
                        self.traverse_into
                            .entry((rule.type_name.clone(), computed.clone()))
                            .or_default()
                            .push(TraverseEdge {
                                declaring_type: type_name.to_string(),
                                declared_relation: relation.to_string(),
                                tupleset: tupleset.clone(),
                            });
                        pending.push((rule.type_name.clone(), computed.clone()));
                    }
                }
            }
            RelationExpr::Union { children } | RelationExpr::Intersection { children } => {
                for child in children {
                    self.add_expr_edges(model, type_name, relation, subject_types, child, pending);
                }
            }
            RelationExpr::Exclusion { base, .. } => {
                self.add_expr_edges(model, type_name, relation, subject_types, base, pending);
            }
        }
    }
}

impl<T, M> Engine<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Lists every object of `object_type` the subject holds the relation
    /// on, equivalent to checking each object individually.
    ///
    /// Results are deduplicated and unordered; past the configured cap
    /// they are dropped and the result is flagged truncated.
    pub async fn list_objects(
        &self,
        request: &ListObjectsRequest,
    ) -> EngineResult<ListObjectsResult> {
        let subject = parse_list_subject(&request.subject)?;
        validate_relation_name(&request.relation)?;
        validate_object_type(&request.object_type)?;

        let model = self.model_reader.get_model(&request.model_version).await?;

        let work = self.list_objects_inner(&model, &subject, request);
        tokio::select! {
            _ = request.cancel.cancelled() => Err(EngineError::Canceled),
            result = timeout(self.config.timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    duration_ms: self.config.timeout.as_millis() as u64,
                }),
            },
        }
    }

    async fn list_objects_inner(
        &self,
        model: &Arc<CompiledModel>,
        subject: &SubjectRef,
        request: &ListObjectsRequest,
    ) -> EngineResult<ListObjectsResult> {
        let graph = ReverseGraph::build(model, &request.object_type, &request.relation)?;

        // Membership facts the subject is known to hold, discovered
        // through the reverse index. Seeded from direct tuples naming the
        // subject or its type wildcard.
        let mut pending: VecDeque<(ObjectRef, String)> = VecDeque::new();
        let mut seen: HashSet<(ObjectRef, String)> = HashSet::new();
        let mut candidates: HashSet<String> = HashSet::new();

        let mut probes = vec![subject.clone()];
        if let SubjectRef::Object { subject_type, .. } = subject {
            probes.push(SubjectRef::wildcard(subject_type.clone()));
        }

        for ((leaf_type, leaf_relation), rules) in &graph.direct_sources {
            for probe in &probes {
                if !rules.is_empty() && !rules.iter().any(|rule| rule.admits(probe)) {
                    continue;
                }
                let tuples = self
                    .tuple_reader
                    .read_tuples_for_subject(probe, Some(leaf_relation))
                    .await?;
                for tuple in tuples {
                    if &tuple.object.object_type == leaf_type {
                        let key = (tuple.object, leaf_relation.clone());
                        if seen.insert(key.clone()) {
                            pending.push_back(key);
                        }
                    }
                }
            }
        }

        // Walk memberships upward until no new facts appear. The seen set
        // makes the walk terminate on cyclic data.
        while let Some((object, relation)) = pending.pop_front() {
            if object.object_type == request.object_type && relation == request.relation {
                candidates.insert(object.object_id.clone());
            }

            let node = (object.object_type.clone(), relation.clone());

            if let Some(into) = graph.computed_into.get(&node) {
                for referencing in into {
                    let key = (object.clone(), referencing.clone());
                    if seen.insert(key.clone()) {
                        pending.push_back(key);
                    }
                }
            }

            if let Some(leaves) = graph.userset_into.get(&node) {
                let probe = SubjectRef::userset(
                    object.object_type.clone(),
                    object.object_id.clone(),
                    relation.clone(),
                );
                for (leaf_type, leaf_relation) in leaves {
                    let tuples = self
                        .tuple_reader
                        .read_tuples_for_subject(&probe, Some(leaf_relation))
                        .await?;
                    for tuple in tuples {
                        if &tuple.object.object_type == leaf_type {
                            let key = (tuple.object, leaf_relation.clone());
                            if seen.insert(key.clone()) {
                                pending.push_back(key);
                            }
                        }
                    }
                }
            }

            if let Some(edges) = graph.traverse_into.get(&node) {
                let probe =
                    SubjectRef::object(object.object_type.clone(), object.object_id.clone());
                for edge in edges {
                    let tuples = self
                        .tuple_reader
                        .read_tuples_for_subject(&probe, Some(&edge.tupleset))
                        .await?;
                    for tuple in tuples {
                        if tuple.object.object_type == edge.declaring_type {
                            let key = (tuple.object, edge.declared_relation.clone());
                            if seen.insert(key.clone()) {
                                pending.push_back(key);
                            }
                        }
                    }
                }
            }
        }

        let mut candidates: Vec<String> = candidates.into_iter().collect();
        let truncated = candidates.len() > self.config.max_results;
        if truncated {
            warn!(
                subject = %subject,
                relation = %request.relation,
                object_type = %request.object_type,
                candidates = candidates.len(),
                max_results = self.config.max_results,
                "list_objects candidates truncated at the configured cap"
            );
            candidates.truncate(self.config.max_results);
        }

        let objects = self
            .confirm_candidates(model, subject, request, candidates)
            .await?;

        Ok(ListObjectsResult { objects, truncated })
    }

    /// Brute-force fallback and test oracle: enumerates every object of
    /// the type known to the store and runs a full check on each.
    ///
    /// This is O(objects in store) and exists only as the correctness
    /// baseline for [`Engine::list_objects`] and for callers that
    /// explicitly accept the cost; the indexed walk is the default.
    pub async fn list_objects_naive(
        &self,
        request: &ListObjectsRequest,
    ) -> EngineResult<ListObjectsResult> {
        let subject = parse_list_subject(&request.subject)?;
        validate_relation_name(&request.relation)?;
        validate_object_type(&request.object_type)?;

        let model = self.model_reader.get_model(&request.model_version).await?;

        let limit = self.config.max_results.saturating_add(1);
        let mut candidates = self
            .tuple_reader
            .list_objects_of_type(&request.object_type, limit)
            .await?;
        let truncated = candidates.len() > self.config.max_results;
        if truncated {
            candidates.truncate(self.config.max_results);
        }

        let objects = self
            .confirm_candidates(&model, &subject, request, candidates)
            .await?;

        Ok(ListObjectsResult { objects, truncated })
    }

    /// Confirms candidate object IDs with full checks under a bounded
    /// concurrency fan-out. Candidates whose evaluation exhausts the
    /// traversal budget fail closed; infrastructure errors abort the
    /// whole operation.
    async fn confirm_candidates(
        &self,
        model: &Arc<CompiledModel>,
        subject: &SubjectRef,
        request: &ListObjectsRequest,
        candidates: Vec<String>,
    ) -> EngineResult<Vec<String>> {
        let mut confirmations = futures::stream::iter(candidates.into_iter().map(|object_id| {
            let query = CheckQuery {
                subject: subject.clone(),
                relation: request.relation.clone(),
                object: ObjectRef::new(request.object_type.clone(), object_id),
                context: Arc::clone(&request.context),
            };
            let model = Arc::clone(model);
            let cancel = request.cancel.clone();
            async move {
                let ctx = TraversalContext::new(cancel);
                let object = query.object.clone();
                match self.resolve_check(model, query, ctx).await {
                    Ok(decision) => Ok((object, decision.allowed)),
                    Err(e) if e.is_path_termination() => {
                        warn!(
                            object = %object,
                            relation = %request.relation,
                            error = %e,
                            "candidate evaluation exhausted its traversal budget; failing closed"
                        );
                        Ok((object, false))
                    }
                    Err(e) => Err(e),
                }
            }
        }))
        .buffer_unordered(MAX_CONCURRENT_CHECKS);

        let mut objects = Vec::new();
        while let Some(result) = confirmations.next().await {
            let (object, allowed) = result?;
            if allowed {
                objects.push(object.to_string());
            }
        }
        Ok(objects)
    }
}

/// Subjects of list queries must be concrete or userset references; a
/// wildcard subject is not a meaningful enumeration target.
fn parse_list_subject(value: &str) -> EngineResult<SubjectRef> {
    let subject = SubjectRef::parse(value)?;
    if subject.is_wildcard() {
        return Err(EngineError::InvalidSubjectFormat {
            value: value.to_string(),
        });
    }
    Ok(subject)
}

/// Object types are bare identifiers.
fn validate_object_type(object_type: &str) -> EngineResult<()> {
    if object_type.is_empty()
        || !object_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(EngineError::InvalidObjectFormat {
            value: object_type.to_string(),
        });
    }
    Ok(())
}
