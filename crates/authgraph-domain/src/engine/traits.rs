//! Collaborator traits consumed by the evaluation engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{CompiledModel, RelationshipTuple, SubjectRef};

/// Read-only access to stored relationship tuples.
///
/// # Read consistency
///
/// A single Check performs many reads and assumes they observe one
/// consistent view of the store: a write that lands mid-evaluation must
/// not be half-visible. Implementations that cannot serve the reads of
/// one operation from a single snapshot must say so in their own
/// documentation — the engine treats every read as potentially stale
/// relative to concurrent external writes but never papers over a torn
/// view.
#[async_trait]
pub trait TupleReader: Send + Sync {
    /// Tuples with the given relation on the given object (forward
    /// index).
    async fn read_tuples(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> EngineResult<Vec<RelationshipTuple>>;

    /// Tuples whose subject is exactly `subject`, optionally restricted
    /// to one relation (reverse index). Drives the ListObjects walk.
    async fn read_tuples_for_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
    ) -> EngineResult<Vec<RelationshipTuple>>;

    /// Distinct IDs of objects of a type that appear in any tuple,
    /// bounded by `limit`. Only the brute-force list fallback uses this;
    /// the indexed walk never enumerates the object universe.
    async fn list_objects_of_type(
        &self,
        object_type: &str,
        limit: usize,
    ) -> EngineResult<Vec<String>>;
}

/// Access to published, compiled authorization models.
#[async_trait]
pub trait ModelReader: Send + Sync {
    /// The compiled model for an explicit published version.
    ///
    /// There is no implicit "latest" here: every evaluation is pinned to
    /// the version its request names, so concurrent publishes cannot
    /// change an in-flight answer. Resolving "latest" to a concrete
    /// version is the outer layer's job.
    async fn get_model(&self, version: &str) -> EngineResult<Arc<CompiledModel>>;
}

/// Pluggable predicate for conditional tuples.
///
/// The engine defines no condition expression language. When a tuple
/// carries a [`crate::model::ConditionRef`], the engine hands the
/// condition name, the parameters stored with the tuple, and the
/// caller-supplied request context to this collaborator and uses the
/// boolean it returns. Tuples without a condition never reach it.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        condition: &str,
        stored: &HashMap<String, serde_json::Value>,
        requested: &HashMap<String, serde_json::Value>,
    ) -> EngineResult<bool>;
}
