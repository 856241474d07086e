use thiserror::Error;

use crate::live::{EntityKind, UpdateAction};
use crate::node::Level;

/// Failures of the path-addressed tree operations.
///
/// Callers build paths from the tree they are looking at, so these are logic
/// errors rather than user-facing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("no node at path {path:?}")]
    PathNotFound { path: Vec<usize> },

    #[error("unknown personnel role: {0}")]
    InvalidRole(String),

    #[error("{requested} cannot be added at depth {depth}")]
    DepthExceeded { requested: Level, depth: usize },
}

/// Failures converting external records into the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("duplicate node id: {0}")]
    DuplicateId(String),
}

/// Failures merging a live update into an estimate.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} {action} payload is missing `{field}`")]
    MissingField {
        kind: EntityKind,
        action: UpdateAction,
        field: &'static str,
    },

    #[error("{action} is not supported for {kind}")]
    Unsupported {
        kind: EntityKind,
        action: UpdateAction,
    },

    #[error(transparent)]
    Record(#[from] RecordError),
}
