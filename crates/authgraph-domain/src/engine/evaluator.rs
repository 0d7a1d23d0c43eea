//! The evaluation engine and the Check resolution algorithm.
//!
//! A check recursively walks the relation expression tree for
//! (object type, relation), reading tuples at direct leaves and
//! traversal steps. Union and intersection branches run in parallel via
//! `FuturesUnordered` and short-circuit; dropping the stream cancels the
//! losing branches.
//!
//! Depth limiting and the per-path visited set guard against data-level
//! cycles that schema validation cannot see (two groups naming each
//! other as members). A traversal path that ends this way is a
//! path-termination, not a grant; if an entire evaluation terminates
//! without an answer, Check fails closed to "not allowed".

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    CompiledModel, ObjectRef, RelationExpr, RelationshipTuple, SubjectRef, SubjectTypeRule,
};

use super::config::EngineConfig;
use super::context::TraversalContext;
use super::traits::{ConditionEvaluator, ModelReader, TupleReader};
use super::types::{CheckDecision, CheckRequest};

/// Type alias for boxed futures used in async recursion.
pub(super) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A check request parsed into structured references. Built once at the
/// engine boundary; recursion never re-parses strings.
#[derive(Debug, Clone)]
pub(super) struct CheckQuery {
    pub(super) subject: SubjectRef,
    pub(super) relation: String,
    pub(super) object: ObjectRef,
    pub(super) context: Arc<HashMap<String, serde_json::Value>>,
}

/// The graph evaluation engine.
///
/// Stateless and safe to share: all evaluation state lives in per-call
/// contexts, so one engine serves any number of concurrent callers
/// against the same model and tuple store.
pub struct Engine<T, M> {
    pub(super) tuple_reader: Arc<T>,
    pub(super) model_reader: Arc<M>,
    pub(super) conditions: Option<Arc<dyn ConditionEvaluator>>,
    pub(super) config: EngineConfig,
}

impl<T, M> Engine<T, M>
where
    T: TupleReader + 'static,
    M: ModelReader + 'static,
{
    /// Creates an engine with default configuration.
    pub fn new(tuple_reader: Arc<T>, model_reader: Arc<M>) -> Self {
        Self {
            tuple_reader,
            model_reader,
            conditions: None,
            config: EngineConfig::default(),
        }
    }

    /// Creates an engine with custom configuration.
    pub fn with_config(tuple_reader: Arc<T>, model_reader: Arc<M>, config: EngineConfig) -> Self {
        Self {
            tuple_reader,
            model_reader,
            conditions: None,
            config,
        }
    }

    /// Plugs in a condition evaluator for conditional tuples.
    pub fn with_condition_evaluator(mut self, conditions: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Performs a permission check.
    ///
    /// Returns `Ok(CheckDecision { allowed: false })` both for a
    /// definitive denial and — logged as an anomaly — when the whole
    /// evaluation exhausted its traversal budget on cyclic or
    /// pathological data. Every other failure is an `Err`: a `false`
    /// with no error always means "definitively not authorized".
    pub async fn check(&self, request: &CheckRequest) -> EngineResult<CheckDecision> {
        let query = parse_check_request(request)?;
        let model = self.model_reader.get_model(&request.model_version).await?;
        let ctx = TraversalContext::new(request.cancel.clone());

        let work = self.resolve_check(model, query.clone(), ctx);
        let outcome = tokio::select! {
            _ = request.cancel.cancelled() => Err(EngineError::Canceled),
            result = timeout(self.config.timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    duration_ms: self.config.timeout.as_millis() as u64,
                }),
            },
        };

        match outcome {
            Err(e) if e.is_path_termination() => {
                warn!(
                    subject = %query.subject,
                    relation = %query.relation,
                    object = %query.object,
                    error = %e,
                    "evaluation exhausted its traversal budget; failing closed"
                );
                Ok(CheckDecision { allowed: false })
            }
            other => other,
        }
    }

    /// Internal check resolution (boxed for async recursion).
    pub(super) fn resolve_check(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<CheckDecision>> {
        Box::pin(async move {
            ctx.ensure_active()?;

            if ctx.depth >= self.config.max_depth {
                return Err(EngineError::DepthLimitExceeded {
                    max_depth: self.config.max_depth,
                });
            }

            let node = format!("{}#{}", query.object, query.relation);
            if ctx.visited.contains(&node) {
                return Err(EngineError::CycleDetected { node });
            }

            let relation_def =
                model.require_relation(&query.object.object_type, &query.relation)?;
            let ctx = ctx.with_visited(&node);

            self.resolve_expr(
                model,
                query,
                relation_def.expr.clone(),
                relation_def.subject_types.clone(),
                ctx,
            )
            .await
        })
    }

    /// Dispatches on an expression node (boxed for async recursion).
    fn resolve_expr(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        expr: RelationExpr,
        subject_types: Vec<SubjectTypeRule>,
        ctx: TraversalContext,
    ) -> BoxFuture<'_, EngineResult<CheckDecision>> {
        Box::pin(async move {
            match expr {
                RelationExpr::Direct => {
                    self.resolve_direct(model, query, subject_types, ctx).await
                }

                RelationExpr::Computed { relation } => {
                    let nested = CheckQuery {
                        subject: query.subject,
                        relation,
                        object: query.object,
                        context: query.context,
                    };
                    self.resolve_check(model, nested, ctx.descend()).await
                }

                RelationExpr::Traverse { tupleset, computed } => {
                    self.resolve_traverse(model, query, tupleset, computed, ctx)
                        .await
                }

                RelationExpr::Union { children } => {
                    self.resolve_union(model, query, children, subject_types, ctx)
                        .await
                }

                RelationExpr::Intersection { children } => {
                    self.resolve_intersection(model, query, children, subject_types, ctx)
                        .await
                }

                RelationExpr::Exclusion { base, subtract } => {
                    self.resolve_exclusion(model, query, *base, *subtract, subject_types, ctx)
                        .await
                }
            }
        })
    }

    /// Resolves a direct leaf by scanning stored tuples on the object and
    /// relation.
    ///
    /// Subject-type rules filter tuples before matching, so a tuple whose
    /// subject shape the relation does not admit can never grant access.
    /// A grant short-circuits; a path-termination inside a userset
    /// recursion is remembered but only surfaced if no other tuple
    /// grants, so a cyclic group next to a plain membership cannot mask
    /// it.
    async fn resolve_direct(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        subject_types: Vec<SubjectTypeRule>,
        ctx: TraversalContext,
    ) -> EngineResult<CheckDecision> {
        let tuples = self
            .tuple_reader
            .read_tuples(
                &query.object.object_type,
                &query.object.object_id,
                &query.relation,
            )
            .await?;

        let mut termination: Option<EngineError> = None;

        for tuple in tuples {
            if !subject_types.is_empty()
                && !subject_types.iter().any(|rule| rule.admits(&tuple.subject))
            {
                continue;
            }

            if subject_matches(&query.subject, &tuple.subject) {
                if self.tuple_grants(&tuple, &query.context).await? {
                    return Ok(CheckDecision { allowed: true });
                }
                continue;
            }

            // Userset subject: does the queried subject hold the
            // referenced relation on the referenced object?
            if let SubjectRef::Userset {
                subject_type,
                subject_id,
                relation,
            } = &tuple.subject
            {
                let nested = CheckQuery {
                    subject: query.subject.clone(),
                    relation: relation.clone(),
                    object: ObjectRef::new(subject_type.clone(), subject_id.clone()),
                    context: query.context.clone(),
                };
                match self.resolve_check(model.clone(), nested, ctx.descend()).await {
                    Ok(CheckDecision { allowed: true }) => {
                        if self.tuple_grants(&tuple, &query.context).await? {
                            return Ok(CheckDecision { allowed: true });
                        }
                    }
                    Ok(CheckDecision { allowed: false }) => {}
                    Err(e) if e.is_path_termination() => termination = Some(e),
                    Err(e) => return Err(e),
                }
            }
        }

        match termination {
            Some(e) => Err(e),
            None => Ok(CheckDecision { allowed: false }),
        }
    }

    /// Resolves a traversal ("computed from tupleset"): follow the
    /// tupleset relation to related objects and evaluate the computed
    /// relation on each, OR-combined.
    ///
    /// Only concrete object subjects participate as traversal targets; a
    /// userset or wildcard subject stored on a tupleset relation is
    /// skipped. Group expansion always goes through an explicit
    /// `group:x#member` userset subject on a direct leaf, never through
    /// an implicit "members of the group object" inference.
    async fn resolve_traverse(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        tupleset: String,
        computed: String,
        ctx: TraversalContext,
    ) -> EngineResult<CheckDecision> {
        let tuples = self
            .tuple_reader
            .read_tuples(
                &query.object.object_type,
                &query.object.object_id,
                &tupleset,
            )
            .await?;

        let mut termination: Option<EngineError> = None;

        for tuple in tuples {
            let SubjectRef::Object {
                subject_type,
                subject_id,
            } = &tuple.subject
            else {
                continue;
            };

            if !self.tuple_grants(&tuple, &query.context).await? {
                continue;
            }

            let nested = CheckQuery {
                subject: query.subject.clone(),
                relation: computed.clone(),
                object: ObjectRef::new(subject_type.clone(), subject_id.clone()),
                context: query.context.clone(),
            };
            match self.resolve_check(model.clone(), nested, ctx.descend()).await {
                Ok(CheckDecision { allowed: true }) => {
                    return Ok(CheckDecision { allowed: true })
                }
                Ok(CheckDecision { allowed: false }) => {}
                Err(e) if e.is_path_termination() => termination = Some(e),
                Err(e) => return Err(e),
            }
        }

        match termination {
            Some(e) => Err(e),
            None => Ok(CheckDecision { allowed: false }),
        }
    }

    /// Resolves a union: parallel branches, short-circuit on the first
    /// grant.
    ///
    /// A branch ending in a path-termination means "this branch found
    /// nothing", not a fatal error; the termination only propagates when
    /// no branch produced a real answer. Infrastructure errors always
    /// propagate.
    async fn resolve_union(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        children: Vec<RelationExpr>,
        subject_types: Vec<SubjectTypeRule>,
        ctx: TraversalContext,
    ) -> EngineResult<CheckDecision> {
        let ctx = ctx.descend();

        let mut branches: FuturesUnordered<_> = children
            .into_iter()
            .map(|child| {
                self.resolve_expr(
                    model.clone(),
                    query.clone(),
                    child,
                    subject_types.clone(),
                    ctx.clone(),
                )
            })
            .collect();

        let mut fatal: Option<EngineError> = None;
        let mut termination: Option<EngineError> = None;
        let mut answered_false = false;

        while let Some(result) = branches.next().await {
            match result {
                Ok(CheckDecision { allowed: true }) => {
                    // Dropping the stream cancels the remaining branches.
                    return Ok(CheckDecision { allowed: true });
                }
                Ok(CheckDecision { allowed: false }) => answered_false = true,
                Err(e) if e.is_path_termination() => termination = Some(e),
                Err(e) => fatal = Some(e),
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if !answered_false {
            if let Some(e) = termination {
                return Err(e);
            }
        }
        Ok(CheckDecision { allowed: false })
    }

    /// Resolves an intersection: parallel branches, short-circuit on the
    /// first denial; any branch error aborts the whole node.
    async fn resolve_intersection(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        children: Vec<RelationExpr>,
        subject_types: Vec<SubjectTypeRule>,
        ctx: TraversalContext,
    ) -> EngineResult<CheckDecision> {
        let ctx = ctx.descend();

        let mut branches: FuturesUnordered<_> = children
            .into_iter()
            .map(|child| {
                self.resolve_expr(
                    model.clone(),
                    query.clone(),
                    child,
                    subject_types.clone(),
                    ctx.clone(),
                )
            })
            .collect();

        while let Some(result) = branches.next().await {
            match result {
                Ok(CheckDecision { allowed: true }) => {}
                Ok(CheckDecision { allowed: false }) => {
                    return Ok(CheckDecision { allowed: false })
                }
                Err(e) => return Err(e),
            }
        }

        Ok(CheckDecision { allowed: true })
    }

    /// Resolves an exclusion: `base && !subtract`, both sides evaluated
    /// concurrently.
    ///
    /// An error on one side only matters when that side's value is needed
    /// for the outcome: a false base or a true subtract already decides
    /// the node.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_exclusion(
        &self,
        model: Arc<CompiledModel>,
        query: CheckQuery,
        base: RelationExpr,
        subtract: RelationExpr,
        subject_types: Vec<SubjectTypeRule>,
        ctx: TraversalContext,
    ) -> EngineResult<CheckDecision> {
        let ctx = ctx.descend();

        let (base_result, subtract_result) = futures::future::join(
            self.resolve_expr(
                model.clone(),
                query.clone(),
                base,
                subject_types.clone(),
                ctx.clone(),
            ),
            self.resolve_expr(model, query, subtract, subject_types, ctx),
        )
        .await;

        match (base_result, subtract_result) {
            (Ok(base), Ok(subtract)) => Ok(CheckDecision {
                allowed: base.allowed && !subtract.allowed,
            }),

            // Base is false: denied regardless of subtract.
            (Ok(CheckDecision { allowed: false }), _) => Ok(CheckDecision { allowed: false }),

            // Subtract is true: denied regardless of base.
            (_, Ok(CheckDecision { allowed: true })) => Ok(CheckDecision { allowed: false }),

            // The errored side's value is needed.
            (Ok(CheckDecision { allowed: true }), Err(e)) => Err(e),
            (Err(e), Ok(CheckDecision { allowed: false })) => Err(e),
            (Err(base_err), Err(_)) => Err(base_err),
        }
    }

    /// Whether a tuple grants under its optional condition.
    ///
    /// A tuple without a condition always grants. A conditional tuple is
    /// delegated to the condition evaluator; if none is configured, the
    /// check errors rather than silently granting or denying.
    pub(super) async fn tuple_grants(
        &self,
        tuple: &RelationshipTuple,
        context: &HashMap<String, serde_json::Value>,
    ) -> EngineResult<bool> {
        match &tuple.condition {
            None => Ok(true),
            Some(condition) => match &self.conditions {
                Some(evaluator) => {
                    evaluator
                        .evaluate(&condition.name, &condition.context, context)
                        .await
                }
                None => Err(EngineError::ConditionUnavailable {
                    condition: condition.name.clone(),
                }),
            },
        }
    }
}

/// Whether a stored tuple subject matches the queried subject.
///
/// Wildcards are only honored on the stored side: a tuple `user:*`
/// matches any concrete subject of that type, but a query can never ask
/// with a wildcard (rejected at the boundary).
pub(super) fn subject_matches(query: &SubjectRef, stored: &SubjectRef) -> bool {
    if query == stored {
        return true;
    }
    match (query, stored) {
        (
            SubjectRef::Object {
                subject_type: query_type,
                ..
            },
            SubjectRef::Wildcard { subject_type },
        ) => query_type == subject_type,
        _ => false,
    }
}

/// Validates and parses a check request into structured references.
pub(super) fn parse_check_request(request: &CheckRequest) -> EngineResult<CheckQuery> {
    let subject = SubjectRef::parse(&request.subject)?;
    if subject.is_wildcard() {
        // "Is everyone allowed" is not a checkable question.
        return Err(EngineError::InvalidSubjectFormat {
            value: request.subject.clone(),
        });
    }
    let object = ObjectRef::parse(&request.object)?;
    validate_relation_name(&request.relation)?;

    Ok(CheckQuery {
        subject,
        relation: request.relation.clone(),
        object,
        context: Arc::clone(&request.context),
    })
}

/// Relation names are bare identifiers; anything else is malformed input.
pub(super) fn validate_relation_name(relation: &str) -> EngineResult<()> {
    if relation.is_empty()
        || !relation
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(EngineError::InvalidRelationFormat {
            value: relation.to_string(),
        });
    }
    Ok(())
}
