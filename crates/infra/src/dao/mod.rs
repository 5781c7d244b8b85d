//! Metadata persistence boundaries (workspaces, cloud contexts, controlled
//! resources, activity log) with in-memory implementations for tests/dev.

pub mod activity;
pub mod resource;
pub mod workspace;

use thiserror::Error;

pub use activity::{ActivityLogDao, ActivityLogEntry, InMemoryActivityLogDao};
pub use resource::{InMemoryResourceDao, ResourceDao};
pub use workspace::{InMemoryWorkspaceDao, WorkspaceDao};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DaoError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("metadata store error: {0}")]
    Backend(String),
}

pub(crate) fn poisoned() -> DaoError {
    DaoError::Backend("lock poisoned".to_string())
}
