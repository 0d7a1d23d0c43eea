//! authgraph-storage: storage collaborators for the authgraph engine.
//!
//! This crate provides:
//! - [`RelationshipStore`], the backend seam for relationship tuple
//!   persistence, with an in-memory implementation
//!   ([`MemoryTupleStore`]) carrying forward and reverse indices
//! - [`MemoryModelStore`], a versioned, publish-once registry of
//!   compiled authorization models
//!
//! Both in-memory stores implement the domain crate's collaborator
//! traits ([`authgraph_domain::engine::TupleReader`] and
//! [`authgraph_domain::engine::ModelReader`]), so an engine can be wired
//! directly on top of them. Durable backends implement the same traits
//! behind [`RelationshipStore`].

mod error;
mod memory;
mod model_store;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryTupleStore;
pub use model_store::{MemoryModelStore, PublishedModel};
pub use traits::{validate_tuple, RelationshipStore, TupleFilter};
