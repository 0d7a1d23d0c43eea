//! authgraph-domain: Core relationship-graph authorization logic
//!
//! This crate contains the authorization core:
//! - Schema types and DSL parser for authorization models
//! - Model compiler with reference and cycle validation
//! - Graph evaluation engine (Check, Expand, ListObjects, ListUsers)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              authgraph-domain                │
//! ├─────────────────────────────────────────────┤
//! │  model/   - Schema types, DSL parser,       │
//! │             compiler & compiled model       │
//! │  engine/  - Graph evaluation engine and     │
//! │             collaborator traits             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The engine is read-only against its collaborators: it consumes a
//! [`engine::TupleReader`] for stored relationship facts and a
//! [`engine::ModelReader`] for compiled, version-pinned models. Writes,
//! persistence, and transport are the responsibility of surrounding
//! layers.

pub mod engine;
pub mod error;
pub mod model;

// Re-export commonly used types at the crate root
pub use error::{EngineError, EngineResult};
