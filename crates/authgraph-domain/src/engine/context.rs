//! Internal traversal context for the evaluation engine.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

/// State threaded through every recursive evaluation step: the depth
/// budget, the visited set for data-level cycle detection, and the
/// caller's cancellation token.
///
/// The visited set is wrapped in `Arc` so that cloning the context for a
/// sibling branch is cheap; it is copied only when a new node is added
/// (copy-on-write).
#[derive(Debug, Clone)]
pub(crate) struct TraversalContext {
    /// Current traversal depth.
    pub(crate) depth: u32,
    /// Visited `object#relation` nodes on the current path.
    pub(crate) visited: Arc<HashSet<String>>,
    /// Caller cancellation signal.
    pub(crate) cancel: CancellationToken,
}

impl TraversalContext {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            depth: 0,
            visited: Arc::new(HashSet::new()),
            cancel,
        }
    }

    /// One step deeper, same path.
    pub(crate) fn descend(&self) -> Self {
        Self {
            depth: self.depth + 1,
            visited: Arc::clone(&self.visited),
            cancel: self.cancel.clone(),
        }
    }

    /// Same depth, path extended with a node.
    pub(crate) fn with_visited(&self, key: &str) -> Self {
        let mut visited = (*self.visited).clone();
        visited.insert(key.to_string());
        Self {
            depth: self.depth,
            visited: Arc::new(visited),
            cancel: self.cancel.clone(),
        }
    }

    /// Errors out if the caller has canceled the operation.
    pub(crate) fn ensure_active(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Canceled)
        } else {
            Ok(())
        }
    }
}
