//! Error types for schema compilation and graph evaluation.

use thiserror::Error;

/// Errors produced by the schema compiler and the evaluation engine.
///
/// Variants fall into four groups with different handling contracts:
///
/// - **Schema validation** (`SchemaParse`, `UndefinedType`,
///   `UndefinedRelation`, `DirectCycle`, `DuplicateRelation`): raised at
///   compile time, never touch the tuple store, always fatal to that
///   compile attempt.
/// - **Query validation** (`UnknownModelVersion`, `RelationNotFound`,
///   `Invalid*Format`): raised before any store access when a request is
///   malformed or names something the pinned model does not declare.
/// - **Runtime safety** (`DepthLimitExceeded`, `CycleDetected`): a
///   traversal path could not reach a conclusion on the stored data. The
///   public entry points fail closed on these rather than crashing.
/// - **Infrastructure** (`StoreUnavailable`, `Canceled`, `Timeout`,
///   `ConditionUnavailable`, `ConditionFailed`): propagated to the caller
///   verbatim; the engine never retries internally.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error parsing the schema DSL.
    #[error("schema parse error: {message}")]
    SchemaParse { message: String },

    /// A schema references a type that is not declared.
    #[error("undefined type: {type_name}")]
    UndefinedType { type_name: String },

    /// A schema references a relation absent on the target type.
    #[error("relation '{relation}' is not defined on type '{type_name}'")]
    UndefinedRelation { type_name: String, relation: String },

    /// A relation reaches itself without consuming a tuple.
    #[error(
        "relation '{relation}' on type '{type_name}' references itself without an intervening tuple"
    )]
    DirectCycle { type_name: String, relation: String },

    /// The same relation name is declared twice on one type.
    #[error("relation '{relation}' declared more than once on type '{type_name}'")]
    DuplicateRelation { type_name: String, relation: String },

    /// The requested model version has not been published.
    #[error("unknown model version: {version}")]
    UnknownModelVersion { version: String },

    /// The queried relation does not exist on the object's type.
    #[error("relation '{relation}' not found on type '{type_name}'")]
    RelationNotFound { type_name: String, relation: String },

    /// Malformed subject reference in a request.
    #[error("invalid subject reference: {value}")]
    InvalidSubjectFormat { value: String },

    /// Malformed object reference in a request.
    #[error("invalid object reference: {value}")]
    InvalidObjectFormat { value: String },

    /// Malformed relation name in a request.
    #[error("invalid relation name: {value}")]
    InvalidRelationFormat { value: String },

    /// The recursion budget was exhausted during evaluation.
    #[error("evaluation depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// A cycle in the stored relationship data was hit during evaluation.
    #[error("cycle detected in relationship data at {node}")]
    CycleDetected { node: String },

    /// The tuple store failed to serve a read.
    #[error("tuple store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The caller canceled the operation.
    #[error("operation canceled")]
    Canceled,

    /// The operation exceeded its time budget.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A tuple carries a condition but no evaluator is configured.
    #[error("tuple references condition '{condition}' but no condition evaluator is configured")]
    ConditionUnavailable { condition: String },

    /// The condition evaluator failed.
    #[error("condition '{condition}' evaluation failed: {message}")]
    ConditionFailed { condition: String, message: String },
}

impl EngineError {
    /// True for errors that terminate a single traversal path rather than
    /// the whole evaluation: a data-level cycle or an exhausted depth
    /// budget. Union branches treat these as "found nothing"; the public
    /// entry points fail closed when an entire evaluation ends this way.
    pub(crate) fn is_path_termination(&self) -> bool {
        matches!(
            self,
            Self::DepthLimitExceeded { .. } | Self::CycleDetected { .. }
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
