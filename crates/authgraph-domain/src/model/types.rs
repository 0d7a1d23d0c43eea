//! Core type definitions for the authorization model.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A reference to an object instance (e.g. "document:readme").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// The type portion (e.g. "document").
    pub object_type: String,
    /// The ID portion (e.g. "readme").
    pub object_id: String,
}

impl ObjectRef {
    /// Creates a new ObjectRef from type and ID.
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses an object reference from "type:id" format.
    pub fn parse(value: &str) -> EngineResult<Self> {
        match value.split_once(':') {
            Some((object_type, object_id))
                if !object_type.is_empty()
                    && !object_id.is_empty()
                    && !object_id.contains('#')
                    && object_id != "*" =>
            {
                Ok(Self::new(object_type, object_id))
            }
            _ => Err(EngineError::InvalidObjectFormat {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// A subject as it appears in a stored tuple or a query.
///
/// Subjects come in exactly three shapes, so illegal states are
/// unrepresentable and no string re-parsing happens during evaluation:
///
/// - `Object` — a concrete entity ("user:alice")
/// - `Userset` — everyone holding a relation on an object
///   ("group:eng#member"), the mechanism behind group nesting
/// - `Wildcard` — every entity of a type ("user:*"), valid only in
///   stored tuples, never as the subject of a query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectRef {
    /// A concrete subject (e.g. "user:alice").
    Object {
        subject_type: String,
        subject_id: String,
    },
    /// A userset reference (e.g. "group:eng#member").
    Userset {
        subject_type: String,
        subject_id: String,
        relation: String,
    },
    /// A type wildcard (e.g. "user:*").
    Wildcard { subject_type: String },
}

impl SubjectRef {
    /// Creates a concrete subject reference.
    pub fn object(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self::Object {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }

    /// Creates a userset reference.
    pub fn userset(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self::Userset {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: relation.into(),
        }
    }

    /// Creates a type wildcard.
    pub fn wildcard(subject_type: impl Into<String>) -> Self {
        Self::Wildcard {
            subject_type: subject_type.into(),
        }
    }

    /// Parses a subject from "type:id", "type:id#relation", or "type:*".
    pub fn parse(value: &str) -> EngineResult<Self> {
        let invalid = || EngineError::InvalidSubjectFormat {
            value: value.to_string(),
        };

        let (head, relation) = match value.split_once('#') {
            Some((head, relation)) => {
                if relation.is_empty() {
                    return Err(invalid());
                }
                (head, Some(relation))
            }
            None => (value, None),
        };

        let (subject_type, subject_id) = head.split_once(':').ok_or_else(invalid)?;
        if subject_type.is_empty() || subject_id.is_empty() {
            return Err(invalid());
        }

        match (subject_id, relation) {
            ("*", None) => Ok(Self::wildcard(subject_type)),
            ("*", Some(_)) => Err(invalid()),
            (id, None) => Ok(Self::object(subject_type, id)),
            (id, Some(rel)) => Ok(Self::userset(subject_type, id, rel)),
        }
    }

    /// Returns the subject's type name.
    pub fn subject_type(&self) -> &str {
        match self {
            Self::Object { subject_type, .. }
            | Self::Userset { subject_type, .. }
            | Self::Wildcard { subject_type } => subject_type,
        }
    }

    /// True for the wildcard form.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object {
                subject_type,
                subject_id,
            } => write!(f, "{subject_type}:{subject_id}"),
            Self::Userset {
                subject_type,
                subject_id,
                relation,
            } => write!(f, "{subject_type}:{subject_id}#{relation}"),
            Self::Wildcard { subject_type } => write!(f, "{subject_type}:*"),
        }
    }
}

/// An allowed-subject constraint on a direct relation.
///
/// Corresponds to one entry of the bracketed list in the DSL:
/// `[user]`, `[group#member]`, or `[user:*]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTypeRule {
    /// The allowed subject type.
    pub type_name: String,
    /// For userset rules, the relation on the subject type.
    pub relation: Option<String>,
    /// True if the rule admits the type wildcard.
    pub wildcard: bool,
}

impl SubjectTypeRule {
    /// Rule admitting concrete subjects of a type (`[user]`).
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    /// Rule admitting userset subjects (`[group#member]`).
    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    /// Rule admitting the type wildcard (`[user:*]`).
    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }

    /// Whether a stored tuple subject satisfies this rule.
    pub fn admits(&self, subject: &SubjectRef) -> bool {
        match subject {
            SubjectRef::Object { subject_type, .. } => {
                !self.wildcard && self.relation.is_none() && subject_type == &self.type_name
            }
            SubjectRef::Userset {
                subject_type,
                relation,
                ..
            } => subject_type == &self.type_name && self.relation.as_deref() == Some(relation),
            SubjectRef::Wildcard { subject_type } => {
                self.wildcard && subject_type == &self.type_name
            }
        }
    }
}

impl fmt::Display for SubjectTypeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            write!(f, "{}:*", self.type_name)
        } else if let Some(relation) = &self.relation {
            write!(f, "{}#{}", self.type_name, relation)
        } else {
            write!(f, "{}", self.type_name)
        }
    }
}

/// The expression tree defining how a relation or permission resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationExpr {
    /// Satisfied by a stored tuple on this relation and object.
    Direct,
    /// Reference to another relation on the same object.
    Computed { relation: String },
    /// Follow the tupleset relation to related objects, then evaluate
    /// the computed relation there (the "X from Y" form).
    Traverse { tupleset: String, computed: String },
    /// True if any child is true.
    Union { children: Vec<RelationExpr> },
    /// True if all children are true.
    Intersection { children: Vec<RelationExpr> },
    /// True if base is true and subtract is false ("but not").
    Exclusion {
        base: Box<RelationExpr>,
        subtract: Box<RelationExpr>,
    },
}

/// A relation or permission declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// Allowed subject types for directly assigned tuples. Empty means
    /// the relation is purely computed (no direct assignment).
    pub subject_types: Vec<SubjectTypeRule>,
    /// The expression tree for this relation.
    pub expr: RelationExpr,
}

/// A type declared in the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g. "document", "folder").
    pub name: String,
    /// Relations declared on this type.
    pub relations: Vec<RelationDefinition>,
}

/// A parsed, not-yet-validated schema.
///
/// Produced by [`crate::model::parse`]; validated and indexed by
/// [`crate::model::compile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Type definitions in declaration order.
    pub type_definitions: Vec<TypeDefinition>,
}

/// Reference to a condition attached to a tuple, with the parameters
/// stored at write time. Evaluated by the pluggable
/// [`crate::engine::ConditionEvaluator`] collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRef {
    /// The condition name.
    pub name: String,
    /// Parameters captured when the tuple was written.
    pub context: HashMap<String, serde_json::Value>,
}

impl ConditionRef {
    /// Creates a condition reference without stored parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: HashMap::new(),
        }
    }

    /// Creates a condition reference with stored parameters.
    pub fn with_context(
        name: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }
}

/// One stored relationship fact: subject has relation on object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTuple {
    /// The subject of the relationship.
    pub subject: SubjectRef,
    /// The relation name.
    pub relation: String,
    /// The object of the relationship.
    pub object: ObjectRef,
    /// Optional condition gating this tuple.
    pub condition: Option<ConditionRef>,
}

impl RelationshipTuple {
    /// Creates an unconditional tuple.
    pub fn new(subject: SubjectRef, relation: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
            condition: None,
        }
    }

    /// Creates a conditional tuple.
    pub fn with_condition(
        subject: SubjectRef,
        relation: impl Into<String>,
        object: ObjectRef,
        condition: ConditionRef,
    ) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
            condition: Some(condition),
        }
    }

    /// True when two tuples are the same stored fact. Identity covers
    /// (subject, relation, object, condition name); the stored condition
    /// parameters are not part of the uniqueness key.
    pub fn same_fact(&self, other: &Self) -> bool {
        self.subject == other.subject
            && self.relation == other.relation
            && self.object == other.object
            && self.condition.as_ref().map(|c| c.name.as_str())
                == other.condition.as_ref().map(|c| c.name.as_str())
    }
}

impl fmt::Display for RelationshipTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}
