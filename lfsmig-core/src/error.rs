//! Errors raised while converting objects
//!
//! Every variant is fatal for the run; nothing here is retried.

use std::path::PathBuf;

use crate::checker::TreeCheckError;
use crate::object::{ObjectId, ObjectKind, ParseError};
use crate::storage::StorageError;
use crate::task::{TaskKey, TaskKind};

/// Result type for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Rebuilt tree for {key} is malformed: {source}")]
    MalformedTree {
        key: TaskKey,
        #[source]
        source: TreeCheckError,
    },

    #[error("Cannot parse {id}: {source}")]
    Parse {
        id: ObjectId,
        #[source]
        source: ParseError,
    },

    #[error("Task kind {kind:?} does not apply to {found} object {id}")]
    KindMismatch {
        kind: TaskKind,
        id: ObjectId,
        found: ObjectKind,
    },

    #[error("Dependency cycle through {0}")]
    Cycle(TaskKey),

    #[error("Dependency {0} was not resolved before conversion")]
    Unresolved(TaskKey),

    #[error("Copy of {expected} was stored as {actual}")]
    IdMismatch { expected: ObjectId, actual: ObjectId },

    #[error("Conversion of {0} was abandoned after a failure elsewhere")]
    Abandoned(TaskKey),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error on {path:?} for {id}: {source}")]
    Io {
        id: ObjectId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LFS protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ConvertError {
    pub(crate) fn io(id: ObjectId, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ConvertError::Io { id, path, source }
    }

    /// Integrity failures mean the graph itself is wrong, not the environment
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ConvertError::MalformedTree { .. }
                | ConvertError::Parse { .. }
                | ConvertError::KindMismatch { .. }
                | ConvertError::Cycle(_)
                | ConvertError::Unresolved(_)
                | ConvertError::IdMismatch { .. }
        )
    }
}
