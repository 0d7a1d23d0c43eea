//! The ListUsers engine: enumerating subjects that hold a relation.
//!
//! Walks the relation's expression tree collecting subjects from direct
//! tuples. Userset subjects are flattened into concrete subjects when
//! the filter asks for a concrete type, or returned as userset
//! references when the filter asks for `type#relation`. Intersection
//! and exclusion are applied as set operations over the collected
//! branches.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::model::{CompiledModel, ObjectRef, RelationExpr, SubjectRef};

use super::context::TraversalContext;
use super::evaluator::{validate_relation_name, BoxFuture, Engine};
use super::traits::{ModelReader, TupleReader};
use super::types::{ListUsersRequest, ListUsersResult, SubjectFilter};

impl<T, M> Engine<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Lists every subject matching the filter that holds the relation on
    /// the object, equivalent to checking each returned subject
    /// individually.
    ///
    /// Results are deduplicated and unordered; past the configured cap
    /// they are dropped and the result is flagged truncated.
    pub async fn list_users(&self, request: &ListUsersRequest) -> EngineResult<ListUsersResult> {
        let object = ObjectRef::parse(&request.object)?;
        validate_relation_name(&request.relation)?;
        validate_filter(&request.subject_filter)?;

        let model = self.model_reader.get_model(&request.model_version).await?;
        let ctx = TraversalContext::new(request.cancel.clone());

        let work = self.collect_relation(
            model,
            object,
            request.relation.clone(),
            request.subject_filter.clone(),
            Arc::clone(&request.context),
            ctx,
        );
        let subjects = tokio::select! {
            _ = request.cancel.cancelled() => Err(EngineError::Canceled),
            result = timeout(self.config.timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    duration_ms: self.config.timeout.as_millis() as u64,
                }),
            },
        }?;

        let mut subjects: Vec<SubjectRef> = subjects.into_iter().collect();
        let truncated = subjects.len() > self.config.max_results;
        if truncated {
            warn!(
                object = %request.object,
                relation = %request.relation,
                subjects = subjects.len(),
                max_results = self.config.max_results,
                "list_users results truncated at the configured cap"
            );
            subjects.truncate(self.config.max_results);
        }

        Ok(ListUsersResult {
            subjects,
            truncated,
        })
    }

    /// Collects matching subjects for one (object, relation) node (boxed
    /// for async recursion).
    ///
    /// A node already visited on the current path contributes nothing
    /// new — its subjects are being enumerated upstream — so cyclic
    /// group data terminates with the partial set rather than erroring.
    fn collect_relation(
        &self,
        model: Arc<CompiledModel>,
        object: ObjectRef,
        relation: String,
        filter: SubjectFilter,
        context: Arc<std::collections::HashMap<String, serde_json::Value>>,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<HashSet<SubjectRef>>> {
        Box::pin(async move {
            ctx.ensure_active()?;

            if ctx.depth >= self.config.max_depth {
                return Err(EngineError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let node = format!("{object}#{relation}");
            if ctx.visited.contains(&node) {
                return Ok(HashSet::new());
            }

            let relation_def = model.require_relation(&object.object_type, &relation)?;
            let ctx = ctx.with_visited(&node);

            self.collect_expr(
                model,
                object,
                relation,
                relation_def.expr.clone(),
                filter,
                context,
                ctx,
            )
            .await
        })
    }

    /// Collects matching subjects for one expression node.
    #[allow(clippy::too_many_arguments)]
    fn collect_expr(
        &self,
        model: Arc<CompiledModel>,
        object: ObjectRef,
        relation: String,
        expr: RelationExpr,
        filter: SubjectFilter,
        context: Arc<std::collections::HashMap<String, serde_json::Value>>,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<HashSet<SubjectRef>>> {
        Box::pin(async move {
            match expr {
                RelationExpr::Direct => {
                    let tuples = self
                        .tuple_reader
                        .read_tuples(&object.object_type, &object.object_id, &relation)
                        .await?;

                    let mut subjects = HashSet::new();
                    for tuple in tuples {
                        if !self.tuple_grants(&tuple, &context).await? {
                            continue;
                        }
                        match &tuple.subject {
                            SubjectRef::Userset {
                                subject_type,
                                subject_id,
                                relation: subject_relation,
                            } => {
                                if filter.type_name == *subject_type
                                    && filter.relation.as_deref() == Some(subject_relation)
                                {
                                    subjects.insert(tuple.subject.clone());
                                } else {
                                    // Flatten the userset into the subjects
                                    // it contains.
                                    let nested = self
                                        .collect_relation(
                                            model.clone(),
                                            ObjectRef::new(
                                                subject_type.clone(),
                                                subject_id.clone(),
                                            ),
                                            subject_relation.clone(),
                                            filter.clone(),
                                            context.clone(),
                                            ctx.descend(),
                                        )
                                        .await?;
                                    subjects.extend(nested);
                                }
                            }
                            SubjectRef::Object { subject_type, .. }
                            | SubjectRef::Wildcard { subject_type } => {
                                if filter.relation.is_none() && filter.type_name == *subject_type
                                {
                                    subjects.insert(tuple.subject.clone());
                                }
                            }
                        }
                    }
                    Ok(subjects)
                }

                RelationExpr::Computed { relation: computed } => {
                    self.collect_relation(model, object, computed, filter, context, ctx.descend())
                        .await
                }

                RelationExpr::Traverse { tupleset, computed } => {
                    let tuples = self
                        .tuple_reader
                        .read_tuples(&object.object_type, &object.object_id, &tupleset)
                        .await?;

                    let mut subjects = HashSet::new();
                    for tuple in tuples {
                        let SubjectRef::Object {
                            subject_type,
                            subject_id,
                        } = &tuple.subject
                        else {
                            continue;
                        };
                        if !self.tuple_grants(&tuple, &context).await? {
                            continue;
                        }
                        let nested = self
                            .collect_relation(
                                model.clone(),
                                ObjectRef::new(subject_type.clone(), subject_id.clone()),
                                computed.clone(),
                                filter.clone(),
                                context.clone(),
                                ctx.descend(),
                            )
                            .await?;
                        subjects.extend(nested);
                    }
                    Ok(subjects)
                }

                RelationExpr::Union { children } => {
                    let mut subjects = HashSet::new();
                    for child in children {
                        let nested = self
                            .collect_expr(
                                model.clone(),
                                object.clone(),
                                relation.clone(),
                                child,
                                filter.clone(),
                                context.clone(),
                                ctx.descend(),
                            )
                            .await?;
                        subjects.extend(nested);
                    }
                    Ok(subjects)
                }

                RelationExpr::Intersection { children } => {
                    let mut iter = children.into_iter();
                    let Some(first) = iter.next() else {
                        return Ok(HashSet::new());
                    };
                    let mut subjects = self
                        .collect_expr(
                            model.clone(),
                            object.clone(),
                            relation.clone(),
                            first,
                            filter.clone(),
                            context.clone(),
                            ctx.descend(),
                        )
                        .await?;
                    for child in iter {
                        if subjects.is_empty() {
                            break;
                        }
                        let other = self
                            .collect_expr(
                                model.clone(),
                                object.clone(),
                                relation.clone(),
                                child,
                                filter.clone(),
                                context.clone(),
                                ctx.descend(),
                            )
                            .await?;
                        subjects.retain(|s| other.contains(s));
                    }
                    Ok(subjects)
                }

                RelationExpr::Exclusion { base, subtract } => {
                    let mut subjects = self
                        .collect_expr(
                            model.clone(),
                            object.clone(),
                            relation.clone(),
                            *base,
                            filter.clone(),
                            context.clone(),
                            ctx.descend(),
                        )
                        .await?;
                    if subjects.is_empty() {
                        return Ok(subjects);
                    }
                    let excluded = self
                        .collect_expr(
                            model,
                            object,
                            relation,
                            *subtract,
                            filter,
                            context,
                            ctx.descend(),
                        )
                        .await?;
                    subjects.retain(|s| !excluded.contains(s));
                    Ok(subjects)
                }
            }
        })
    }
}

fn validate_filter(filter: &SubjectFilter) -> EngineResult<()> {
    let valid_ident = |s: &str| {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if !valid_ident(&filter.type_name) {
        return Err(EngineError::InvalidSubjectFormat {
            value: filter.type_name.clone(),
        });
    }
    if let Some(relation) = &filter.relation {
        if !valid_ident(relation) {
            return Err(EngineError::InvalidRelationFormat {
                value: relation.clone(),
            });
        }
    }
    Ok(())
}
