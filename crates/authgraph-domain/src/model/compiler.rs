//! Schema compiler: validates a parsed [`Schema`] and builds the
//! immutable, lookup-indexed [`CompiledModel`] used by the engine.
//!
//! All reference resolution happens here, once per model version, so the
//! evaluator never re-validates names at query time. Compilation is
//! all-or-nothing: any validation failure rejects the whole schema.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

use super::types::{RelationDefinition, RelationExpr, Schema, TypeDefinition};

/// A compiled type with O(1) relation lookup.
#[derive(Debug)]
pub struct CompiledType {
    name: String,
    relations: HashMap<String, Arc<RelationDefinition>>,
}

impl CompiledType {
    /// The type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relation definitions on this type, in no particular order.
    pub fn relations(&self) -> impl Iterator<Item = &Arc<RelationDefinition>> {
        self.relations.values()
    }
}

/// An immutable, validated authorization model.
///
/// Compiled once per published version and shared via `Arc` across all
/// concurrent evaluations; no locking is needed after compilation.
#[derive(Debug)]
pub struct CompiledModel {
    types: HashMap<String, CompiledType>,
}

impl CompiledModel {
    /// Gets a type by name.
    pub fn type_definition(&self, type_name: &str) -> Option<&CompiledType> {
        self.types.get(type_name)
    }

    /// Gets a relation definition, O(1).
    pub fn relation(&self, type_name: &str, relation: &str) -> Option<&Arc<RelationDefinition>> {
        self.types.get(type_name)?.relations.get(relation)
    }

    /// Gets a relation definition or a query-time error.
    pub fn require_relation(
        &self,
        type_name: &str,
        relation: &str,
    ) -> EngineResult<Arc<RelationDefinition>> {
        self.relation(type_name, relation)
            .cloned()
            .ok_or_else(|| EngineError::RelationNotFound {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Iterates all compiled types.
    pub fn types(&self) -> impl Iterator<Item = &CompiledType> {
        self.types.values()
    }
}

/// Compiles a parsed schema into an evaluatable model.
///
/// # Errors
///
/// - [`EngineError::DuplicateRelation`] — a relation name declared twice
///   on one type
/// - [`EngineError::UndefinedType`] — a subject-type rule names an
///   undeclared type
/// - [`EngineError::UndefinedRelation`] — a computed reference, userset
///   rule, or traversal target names a relation absent on its type
/// - [`EngineError::DirectCycle`] — a relation reaches itself without
///   crossing a tuple-consuming boundary (direct leaf or traversal)
/// - [`EngineError::SchemaParse`] — structural defects the grammar cannot
///   express, such as a duplicated type or a tupleset relation that does
///   not name concrete object types
pub fn compile(schema: Schema) -> EngineResult<CompiledModel> {
    let types = index_types(&schema)?;

    for type_def in &schema.type_definitions {
        for relation_def in &type_def.relations {
            validate_subject_rules(&types, relation_def)?;
            validate_expr(&types, type_def, &relation_def.expr)?;
        }
    }

    detect_direct_cycles(&schema)?;

    let compiled = schema
        .type_definitions
        .into_iter()
        .map(|type_def| {
            let relations = type_def
                .relations
                .into_iter()
                .map(|r| (r.name.clone(), Arc::new(r)))
                .collect();
            (
                type_def.name.clone(),
                CompiledType {
                    name: type_def.name,
                    relations,
                },
            )
        })
        .collect();

    Ok(CompiledModel { types: compiled })
}

/// Indexes declared types and rejects duplicate declarations.
fn index_types(schema: &Schema) -> EngineResult<HashMap<&str, &TypeDefinition>> {
    let mut types: HashMap<&str, &TypeDefinition> = HashMap::new();
    for type_def in &schema.type_definitions {
        if types.insert(&type_def.name, type_def).is_some() {
            return Err(EngineError::SchemaParse {
                message: format!("type '{}' declared more than once", type_def.name),
            });
        }
        let mut seen = HashSet::new();
        for relation_def in &type_def.relations {
            if !seen.insert(relation_def.name.as_str()) {
                return Err(EngineError::DuplicateRelation {
                    type_name: type_def.name.clone(),
                    relation: relation_def.name.clone(),
                });
            }
        }
    }
    Ok(types)
}

/// Every subject-type rule must name a declared type, and userset rules a
/// declared relation on it.
fn validate_subject_rules(
    types: &HashMap<&str, &TypeDefinition>,
    relation_def: &RelationDefinition,
) -> EngineResult<()> {
    for rule in &relation_def.subject_types {
        let target = types
            .get(rule.type_name.as_str())
            .ok_or_else(|| EngineError::UndefinedType {
                type_name: rule.type_name.clone(),
            })?;
        if let Some(relation) = &rule.relation {
            if !target.relations.iter().any(|r| &r.name == relation) {
                return Err(EngineError::UndefinedRelation {
                    type_name: rule.type_name.clone(),
                    relation: relation.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_expr(
    types: &HashMap<&str, &TypeDefinition>,
    type_def: &TypeDefinition,
    expr: &RelationExpr,
) -> EngineResult<()> {
    match expr {
        RelationExpr::Direct => Ok(()),
        RelationExpr::Computed { relation } => {
            if !type_def.relations.iter().any(|r| &r.name == relation) {
                return Err(EngineError::UndefinedRelation {
                    type_name: type_def.name.clone(),
                    relation: relation.clone(),
                });
            }
            Ok(())
        }
        RelationExpr::Traverse { tupleset, computed } => {
            let tupleset_def = type_def
                .relations
                .iter()
                .find(|r| &r.name == tupleset)
                .ok_or_else(|| EngineError::UndefinedRelation {
                    type_name: type_def.name.clone(),
                    relation: tupleset.clone(),
                })?;

            // The traversal target types come from the tupleset relation's
            // subject rules, which must therefore be concrete object types.
            if tupleset_def.subject_types.is_empty()
                || tupleset_def
                    .subject_types
                    .iter()
                    .any(|rule| rule.relation.is_some() || rule.wildcard)
            {
                return Err(EngineError::SchemaParse {
                    message: format!(
                        "relation '{}' on type '{}' is used as a tupleset and must name concrete object types",
                        tupleset, type_def.name
                    ),
                });
            }

            for rule in &tupleset_def.subject_types {
                let parent =
                    types
                        .get(rule.type_name.as_str())
                        .ok_or_else(|| EngineError::UndefinedType {
                            type_name: rule.type_name.clone(),
                        })?;
                if !parent.relations.iter().any(|r| &r.name == computed) {
                    return Err(EngineError::UndefinedRelation {
                        type_name: rule.type_name.clone(),
                        relation: computed.clone(),
                    });
                }
            }
            Ok(())
        }
        RelationExpr::Union { children } | RelationExpr::Intersection { children } => {
            for child in children {
                validate_expr(types, type_def, child)?;
            }
            Ok(())
        }
        RelationExpr::Exclusion { base, subtract } => {
            validate_expr(types, type_def, base)?;
            validate_expr(types, type_def, subtract)
        }
    }
}

/// Rejects relations that reach themselves through computed references
/// alone. Direct leaves and traversals consume a tuple per step and so
/// break the cycle; `define viewer: viewer` does not.
fn detect_direct_cycles(schema: &Schema) -> EngineResult<()> {
    // Nodes are (type, relation); edges are computed references, which
    // stay on the same object without consuming a tuple.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn computed_edges<'a>(expr: &'a RelationExpr, out: &mut Vec<&'a str>) {
        match expr {
            RelationExpr::Direct | RelationExpr::Traverse { .. } => {}
            RelationExpr::Computed { relation } => out.push(relation),
            RelationExpr::Union { children } | RelationExpr::Intersection { children } => {
                for child in children {
                    computed_edges(child, out);
                }
            }
            RelationExpr::Exclusion { base, subtract } => {
                computed_edges(base, out);
                computed_edges(subtract, out);
            }
        }
    }

    fn visit(
        type_def: &TypeDefinition,
        relation: &str,
        marks: &mut HashMap<(String, String), Mark>,
    ) -> EngineResult<()> {
        let key = (type_def.name.clone(), relation.to_string());
        match marks.get(&key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(EngineError::DirectCycle {
                    type_name: type_def.name.clone(),
                    relation: relation.to_string(),
                })
            }
            None => {}
        }
        marks.insert(key.clone(), Mark::Visiting);

        if let Some(def) = type_def.relations.iter().find(|r| r.name == relation) {
            let mut edges = Vec::new();
            computed_edges(&def.expr, &mut edges);
            for edge in edges {
                visit(type_def, edge, marks)?;
            }
        }

        marks.insert(key, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for type_def in &schema.type_definitions {
        for relation_def in &type_def.relations {
            visit(type_def, &relation_def.name, &mut marks)?;
        }
    }
    Ok(())
}
