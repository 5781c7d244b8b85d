use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wsm_core::{OperationType, WorkspaceId};

use super::{DaoError, poisoned};

/// One row of a workspace's activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub workspace_id: WorkspaceId,
    pub operation: OperationType,
    /// Flight that performed the change; with `operation` the idempotency key.
    pub flight_id: String,
    pub actor_email: String,
    pub actor_subject_id: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Workspace activity log.
#[async_trait]
pub trait ActivityLogDao: Send + Sync {
    /// Append an entry unless one with the same `(flight_id, operation)`
    /// exists. Returns whether a row was written.
    async fn write_activity(&self, entry: ActivityLogEntry) -> Result<bool, DaoError>;

    /// Entries for a workspace, oldest first.
    async fn list_activity(&self, workspace_id: WorkspaceId)
    -> Result<Vec<ActivityLogEntry>, DaoError>;

    /// Most recent entry for a workspace.
    async fn last_change(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Option<ActivityLogEntry>, DaoError> {
        Ok(self.list_activity(workspace_id).await?.pop())
    }
}

#[async_trait]
impl<S> ActivityLogDao for Arc<S>
where
    S: ActivityLogDao + ?Sized,
{
    async fn write_activity(&self, entry: ActivityLogEntry) -> Result<bool, DaoError> {
        (**self).write_activity(entry).await
    }

    async fn list_activity(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ActivityLogEntry>, DaoError> {
        (**self).list_activity(workspace_id).await
    }
}

/// In-memory activity log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryActivityLogDao {
    entries: RwLock<HashMap<WorkspaceId, Vec<ActivityLogEntry>>>,
}

impl InMemoryActivityLogDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all workspaces.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|e| e.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityLogDao for InMemoryActivityLogDao {
    async fn write_activity(&self, entry: ActivityLogEntry) -> Result<bool, DaoError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let log = entries.entry(entry.workspace_id).or_default();
        let duplicate = log
            .iter()
            .any(|e| e.flight_id == entry.flight_id && e.operation == entry.operation);
        if duplicate {
            return Ok(false);
        }
        log.push(entry);
        Ok(true)
    }

    async fn list_activity(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ActivityLogEntry>, DaoError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(&workspace_id).cloned().unwrap_or_default())
    }
}
