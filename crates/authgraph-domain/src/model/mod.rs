//! Authorization model: schema types, DSL parser, and compiler.
//!
//! This module contains:
//! - Structured references (`ObjectRef`, `SubjectRef`) and the stored
//!   fact shape (`RelationshipTuple`)
//! - Schema structures and the relation expression tree
//! - DSL parser for the schema language
//! - Compiler producing an immutable, lookup-indexed [`CompiledModel`]

mod compiler;
mod parser;
mod types;
#[cfg(test)]
mod types_proptest;

pub use compiler::{compile, CompiledModel, CompiledType};
pub use parser::parse;
pub use types::*;
