//! RelationshipStore trait definition and write-time validation.

use async_trait::async_trait;

use authgraph_domain::model::{RelationshipTuple, SubjectRef};

use crate::error::{StorageError, StorageResult};

/// Filter for reading tuples.
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    /// Filter by object type.
    pub object_type: Option<String>,
    /// Filter by object ID.
    pub object_id: Option<String>,
    /// Filter by relation.
    pub relation: Option<String>,
    /// Filter by subject.
    pub subject: Option<SubjectRef>,
}

/// Abstract storage backend for relationship tuples.
///
/// Implementations must be thread-safe and support async operations.
/// Tuples are facts: writes insert, deletes remove, nothing is mutated
/// in place. Writing a fact that already exists is an idempotent no-op
/// (fact identity covers subject, relation, object, and condition name).
#[async_trait]
pub trait RelationshipStore: Send + Sync + 'static {
    /// Applies deletes then inserts.
    async fn write(
        &self,
        writes: Vec<RelationshipTuple>,
        deletes: Vec<RelationshipTuple>,
    ) -> StorageResult<()>;

    /// Reads tuples matching the filter.
    async fn read(&self, filter: &TupleFilter) -> StorageResult<Vec<RelationshipTuple>>;

    /// Reads tuples whose subject is exactly `subject`, optionally
    /// restricted to one relation (reverse index).
    async fn read_by_subject(
        &self,
        subject: &SubjectRef,
        relation: Option<&str>,
    ) -> StorageResult<Vec<RelationshipTuple>>;

    /// Distinct IDs of objects of a type appearing in any tuple, bounded
    /// by `limit`.
    async fn objects_of_type(&self, object_type: &str, limit: usize)
        -> StorageResult<Vec<String>>;
}

/// Write-time validation: structured references already rule out most
/// malformed shapes, so only relation names need checking here.
pub fn validate_tuple(tuple: &RelationshipTuple) -> StorageResult<()> {
    if tuple.relation.is_empty()
        || !tuple
            .relation
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(StorageError::InvalidTuple {
            message: format!("relation '{}' is not a valid identifier", tuple.relation),
        });
    }
    if let Some(condition) = &tuple.condition {
        if condition.name.is_empty() {
            return Err(StorageError::InvalidTuple {
                message: "condition name cannot be empty".to_string(),
            });
        }
    }
    Ok(())
}
