//! Request and response types for the evaluation engine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::model::SubjectRef;

/// Request for a permission check.
///
/// Subject and object are carried as strings and parsed exactly once at
/// the engine boundary; malformed references fail before any store
/// access.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// Published model version to evaluate against.
    pub model_version: String,
    /// The subject (e.g. "user:alice" or "group:eng#member").
    pub subject: String,
    /// The relation or permission to check (e.g. "viewer").
    pub relation: String,
    /// The object (e.g. "document:readme").
    pub object: String,
    /// Caller context for conditional tuples. Wrapped in Arc for cheap
    /// cloning during graph traversal.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Cancellation signal; canceling aborts all outstanding work.
    pub cancel: CancellationToken,
}

impl CheckRequest {
    /// Creates a check request without condition context.
    pub fn new(
        model_version: impl Into<String>,
        subject: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            subject: subject.into(),
            relation: relation.into(),
            object: object.into(),
            context: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches caller context for conditional tuples.
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDecision {
    /// Whether the subject holds the relation on the object.
    pub allowed: bool,
}

/// Request for expanding a relation's resolution tree.
#[derive(Debug, Clone)]
pub struct ExpandRequest {
    /// Published model version to evaluate against.
    pub model_version: String,
    /// The relation to expand.
    pub relation: String,
    /// The object to expand on.
    pub object: String,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl ExpandRequest {
    /// Creates an expand request.
    pub fn new(
        model_version: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            relation: relation.into(),
            object: object.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The full resolution tree for a relation on an object: which tuples,
/// usersets, and nested expansions could contribute a grant.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionTree {
    /// The root node, mirroring the relation's expression shape.
    pub root: ExpandNode,
}

/// A node in the expansion tree. `userset` names the node in
/// `object#relation` form.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandNode {
    /// Direct leaf: the tuple subjects found on this object and relation.
    Leaf {
        userset: String,
        subjects: Vec<ExpandSubject>,
    },
    /// A computed reference, expanded in place.
    Computed {
        userset: String,
        child: Box<ExpandNode>,
    },
    /// A traversal: one expanded branch per related object found via the
    /// tupleset relation.
    Traversal {
        userset: String,
        tupleset: String,
        parents: Vec<ExpandNode>,
    },
    /// Any child grants access.
    Union {
        userset: String,
        children: Vec<ExpandNode>,
    },
    /// All children must grant access.
    Intersection {
        userset: String,
        children: Vec<ExpandNode>,
    },
    /// Base grants minus subtract.
    Difference {
        userset: String,
        base: Box<ExpandNode>,
        subtract: Box<ExpandNode>,
    },
    /// A node already expanded on the current path; recursion stops here
    /// so cyclic relationship data yields a finite tree.
    Cycle { userset: String },
}

impl ExpandNode {
    /// Returns the `object#relation` name of this node.
    pub fn userset(&self) -> &str {
        match self {
            Self::Leaf { userset, .. }
            | Self::Computed { userset, .. }
            | Self::Traversal { userset, .. }
            | Self::Union { userset, .. }
            | Self::Intersection { userset, .. }
            | Self::Difference { userset, .. }
            | Self::Cycle { userset } => userset,
        }
    }
}

/// A subject recorded in a direct leaf of the expansion tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandSubject {
    /// A concrete or wildcard subject taken verbatim from a tuple.
    Subject(SubjectRef),
    /// A userset subject, with its own expansion nested beneath.
    Userset {
        subject: SubjectRef,
        expansion: Box<ExpandNode>,
    },
}

/// Request for listing objects a subject holds a relation on.
#[derive(Debug, Clone)]
pub struct ListObjectsRequest {
    /// Published model version to evaluate against.
    pub model_version: String,
    /// The subject to enumerate for.
    pub subject: String,
    /// The relation or permission to test.
    pub relation: String,
    /// The object type to enumerate.
    pub object_type: String,
    /// Caller context for conditional tuples.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl ListObjectsRequest {
    /// Creates a list-objects request.
    pub fn new(
        model_version: impl Into<String>,
        subject: impl Into<String>,
        relation: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            subject: subject.into(),
            relation: relation.into(),
            object_type: object_type.into(),
            context: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches caller context for conditional tuples.
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a list-objects query.
#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    /// Matching objects in "type:id" form, deduplicated, unordered.
    pub objects: Vec<String>,
    /// True if results were dropped at the configured cap.
    pub truncated: bool,
}

/// Filter restricting which subjects a list-users query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    /// The subject type to return (e.g. "user").
    pub type_name: String,
    /// When set, return userset references of this relation (e.g.
    /// "group#member") instead of flattening them into concrete
    /// subjects.
    pub relation: Option<String>,
}

impl SubjectFilter {
    /// Filter for concrete subjects of a type.
    pub fn concrete(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
        }
    }

    /// Filter for userset references (`type#relation`).
    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
        }
    }
}

/// Request for listing subjects holding a relation on an object.
#[derive(Debug, Clone)]
pub struct ListUsersRequest {
    /// Published model version to evaluate against.
    pub model_version: String,
    /// The object to enumerate for.
    pub object: String,
    /// The relation or permission to test.
    pub relation: String,
    /// Which subject shapes to return.
    pub subject_filter: SubjectFilter,
    /// Caller context for conditional tuples.
    pub context: Arc<HashMap<String, serde_json::Value>>,
    /// Cancellation signal.
    pub cancel: CancellationToken,
}

impl ListUsersRequest {
    /// Creates a list-users request.
    pub fn new(
        model_version: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        subject_filter: SubjectFilter,
    ) -> Self {
        Self {
            model_version: model_version.into(),
            object: object.into(),
            relation: relation.into(),
            subject_filter,
            context: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Attaches caller context for conditional tuples.
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a list-users query.
#[derive(Debug, Clone)]
pub struct ListUsersResult {
    /// Matching subjects, deduplicated, unordered.
    pub subjects: Vec<SubjectRef>,
    /// True if results were dropped at the configured cap.
    pub truncated: bool,
}
