//! The Expand engine: full resolution trees for auditing.
//!
//! Expand re-runs the Check traversal without a subject, recording what
//! it finds instead of short-circuiting: the concrete tuples behind each
//! direct leaf, the expansion of every userset subject, and a nested
//! subtree per traversal parent. The result describes who *could*
//! satisfy the relation and through which paths.

use std::sync::Arc;

use tokio::time::timeout;

use crate::error::{EngineError, EngineResult};
use crate::model::{CompiledModel, ObjectRef, RelationExpr, SubjectRef};

use super::context::TraversalContext;
use super::evaluator::{validate_relation_name, BoxFuture, Engine};
use super::traits::{ModelReader, TupleReader};
use super::types::{ExpandNode, ExpandRequest, ExpandSubject, ExpansionTree};

impl<T, M> Engine<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Expands a relation on an object into its full resolution tree.
    ///
    /// The tree mirrors the relation's expression shape. Nodes already
    /// expanded on the current path are emitted as [`ExpandNode::Cycle`]
    /// markers, so cyclic relationship data yields a finite tree; an
    /// exhausted depth budget surfaces as
    /// [`EngineError::DepthLimitExceeded`].
    pub async fn expand(&self, request: &ExpandRequest) -> EngineResult<ExpansionTree> {
        let object = ObjectRef::parse(&request.object)?;
        validate_relation_name(&request.relation)?;

        let model = self.model_reader.get_model(&request.model_version).await?;
        let ctx = TraversalContext::new(request.cancel.clone());

        let work = self.expand_relation(model, object, request.relation.clone(), ctx);
        let root = tokio::select! {
            _ = request.cancel.cancelled() => Err(EngineError::Canceled),
            result = timeout(self.config.timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    duration_ms: self.config.timeout.as_millis() as u64,
                }),
            },
        }?;

        Ok(ExpansionTree { root })
    }

    /// Expands one (object, relation) node (boxed for async recursion).
    fn expand_relation(
        &self,
        model: Arc<CompiledModel>,
        object: ObjectRef,
        relation: String,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<ExpandNode>> {
        Box::pin(async move {
            ctx.ensure_active()?;

            if ctx.depth >= self.config.max_depth {
                return Err(EngineError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let userset = format!("{object}#{relation}");
            if ctx.visited.contains(&userset) {
                return Ok(ExpandNode::Cycle { userset });
            }

            let relation_def = model.require_relation(&object.object_type, &relation)?;
            let ctx = ctx.with_visited(&userset);

            self.expand_expr(model, object, relation, relation_def.expr.clone(), ctx)
                .await
        })
    }

    /// Expands one expression node (boxed for async recursion).
    fn expand_expr(
        &self,
        model: Arc<CompiledModel>,
        object: ObjectRef,
        relation: String,
        expr: RelationExpr,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<ExpandNode>> {
        Box::pin(async move {
            let userset = format!("{object}#{relation}");

            match expr {
                RelationExpr::Direct => {
                    let tuples = self
                        .tuple_reader
                        .read_tuples(&object.object_type, &object.object_id, &relation)
                        .await?;

                    let mut subjects = Vec::with_capacity(tuples.len());
                    for tuple in tuples {
                        match &tuple.subject {
                            SubjectRef::Userset {
                                subject_type,
                                subject_id,
                                relation: subject_relation,
                            } => {
                                let expansion = self
                                    .expand_relation(
                                        model.clone(),
                                        ObjectRef::new(
                                            subject_type.clone(),
                                            subject_id.clone(),
                                        ),
                                        subject_relation.clone(),
                                        ctx.descend(),
                                    )
                                    .await?;
                                subjects.push(ExpandSubject::Userset {
                                    subject: tuple.subject.clone(),
                                    expansion: Box::new(expansion),
                                });
                            }
                            _ => subjects.push(ExpandSubject::Subject(tuple.subject.clone())),
                        }
                    }

                    Ok(ExpandNode::Leaf { userset, subjects })
                }

                RelationExpr::Computed { relation: computed } => {
                    let child = self
                        .expand_relation(model, object, computed, ctx.descend())
                        .await?;
                    Ok(ExpandNode::Computed {
                        userset,
                        child: Box::new(child),
                    })
                }

                RelationExpr::Traverse { tupleset, computed } => {
                    let tuples = self
                        .tuple_reader
                        .read_tuples(&object.object_type, &object.object_id, &tupleset)
                        .await?;

                    let branches: Vec<_> = tuples
                        .iter()
                        .filter_map(|tuple| match &tuple.subject {
                            SubjectRef::Object {
                                subject_type,
                                subject_id,
                            } => Some(self.expand_relation(
                                model.clone(),
                                ObjectRef::new(subject_type.clone(), subject_id.clone()),
                                computed.clone(),
                                ctx.descend(),
                            )),
                            _ => None,
                        })
                        .collect();
                    let parents = futures::future::try_join_all(branches).await?;

                    Ok(ExpandNode::Traversal {
                        userset,
                        tupleset,
                        parents,
                    })
                }

                RelationExpr::Union { children } => {
                    let branches: Vec<_> = children
                        .into_iter()
                        .map(|child| {
                            self.expand_expr(
                                model.clone(),
                                object.clone(),
                                relation.clone(),
                                child,
                                ctx.descend(),
                            )
                        })
                        .collect();
                    let children = futures::future::try_join_all(branches).await?;
                    Ok(ExpandNode::Union { userset, children })
                }

                RelationExpr::Intersection { children } => {
                    let branches: Vec<_> = children
                        .into_iter()
                        .map(|child| {
                            self.expand_expr(
                                model.clone(),
                                object.clone(),
                                relation.clone(),
                                child,
                                ctx.descend(),
                            )
                        })
                        .collect();
                    let children = futures::future::try_join_all(branches).await?;
                    Ok(ExpandNode::Intersection { userset, children })
                }

                RelationExpr::Exclusion { base, subtract } => {
                    let (base, subtract) = futures::future::try_join(
                        self.expand_expr(
                            model.clone(),
                            object.clone(),
                            relation.clone(),
                            *base,
                            ctx.descend(),
                        ),
                        self.expand_expr(model, object, relation, *subtract, ctx.descend()),
                    )
                    .await?;
                    Ok(ExpandNode::Difference {
                        userset,
                        base: Box::new(base),
                        subtract: Box::new(subtract),
                    })
                }
            }
        })
    }
}
