use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use wsm_core::{CloudContext, CloudPlatform, Workspace, WorkspaceId};

use super::{DaoError, poisoned};

/// Workspace and cloud-context metadata.
#[async_trait]
pub trait WorkspaceDao: Send + Sync {
    /// Insert a workspace on behalf of `creating_flight_id`.
    ///
    /// Re-inserting an id the same flight created is a no-op. An id created by
    /// another flight, or a user-facing id of another workspace, is a
    /// [`DaoError::Conflict`].
    async fn create_workspace(
        &self,
        workspace: &Workspace,
        creating_flight_id: &str,
    ) -> Result<(), DaoError>;

    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, DaoError>;

    /// Delete a workspace and its cloud contexts, optionally only when
    /// `creating_flight_id` created it. Returns whether a row was removed.
    async fn delete_workspace(
        &self,
        id: WorkspaceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError>;

    /// Record a cloud context. Re-recording a context created by the same flight
    /// is a no-op; a context owned by another flight is a conflict.
    async fn create_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        context: &CloudContext,
    ) -> Result<(), DaoError>;

    async fn get_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<Option<CloudContext>, DaoError>;

    /// Delete a cloud context, optionally only when `creating_flight_id`
    /// created it. Returns whether a row was removed.
    async fn delete_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError>;
}

#[async_trait]
impl<S> WorkspaceDao for Arc<S>
where
    S: WorkspaceDao + ?Sized,
{
    async fn create_workspace(
        &self,
        workspace: &Workspace,
        creating_flight_id: &str,
    ) -> Result<(), DaoError> {
        (**self).create_workspace(workspace, creating_flight_id).await
    }

    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, DaoError> {
        (**self).get_workspace(id).await
    }

    async fn delete_workspace(
        &self,
        id: WorkspaceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        (**self).delete_workspace(id, creating_flight_id).await
    }

    async fn create_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        context: &CloudContext,
    ) -> Result<(), DaoError> {
        (**self).create_cloud_context(workspace_id, context).await
    }

    async fn get_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<Option<CloudContext>, DaoError> {
        (**self).get_cloud_context(workspace_id, platform).await
    }

    async fn delete_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        (**self)
            .delete_cloud_context(workspace_id, platform, creating_flight_id)
            .await
    }
}

#[derive(Debug, Clone)]
struct WorkspaceRow {
    workspace: Workspace,
    creating_flight_id: String,
}

/// In-memory workspace metadata for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceDao {
    workspaces: RwLock<HashMap<WorkspaceId, WorkspaceRow>>,
    contexts: RwLock<HashMap<(WorkspaceId, CloudPlatform), CloudContext>>,
}

impl InMemoryWorkspaceDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceDao for InMemoryWorkspaceDao {
    async fn create_workspace(
        &self,
        workspace: &Workspace,
        creating_flight_id: &str,
    ) -> Result<(), DaoError> {
        let mut workspaces = self.workspaces.write().map_err(|_| poisoned())?;
        if let Some(row) = workspaces.get(&workspace.id) {
            if row.creating_flight_id == creating_flight_id {
                return Ok(());
            }
            return Err(DaoError::Conflict(format!(
                "workspace {} already exists",
                workspace.id
            )));
        }
        if workspaces
            .values()
            .any(|row| row.workspace.user_facing_id == workspace.user_facing_id)
        {
            return Err(DaoError::Conflict(format!(
                "workspace with user-facing id '{}' already exists",
                workspace.user_facing_id
            )));
        }
        workspaces.insert(
            workspace.id,
            WorkspaceRow {
                workspace: workspace.clone(),
                creating_flight_id: creating_flight_id.to_string(),
            },
        );
        Ok(())
    }

    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, DaoError> {
        let workspaces = self.workspaces.read().map_err(|_| poisoned())?;
        Ok(workspaces.get(&id).map(|row| row.workspace.clone()))
    }

    async fn delete_workspace(
        &self,
        id: WorkspaceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        {
            let mut workspaces = self.workspaces.write().map_err(|_| poisoned())?;
            let owned = match (workspaces.get(&id), creating_flight_id) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(row), Some(flight)) => row.creating_flight_id == flight,
            };
            if !owned {
                return Ok(false);
            }
            workspaces.remove(&id);
        }
        let mut contexts = self.contexts.write().map_err(|_| poisoned())?;
        contexts.retain(|(ws, _), _| *ws != id);
        Ok(true)
    }

    async fn create_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        context: &CloudContext,
    ) -> Result<(), DaoError> {
        if self.get_workspace(workspace_id).await?.is_none() {
            return Err(DaoError::NotFound {
                kind: "workspace",
                id: workspace_id.to_string(),
            });
        }
        let mut contexts = self.contexts.write().map_err(|_| poisoned())?;
        match contexts.get(&(workspace_id, context.platform)) {
            Some(existing) if existing.creating_flight_id == context.creating_flight_id => Ok(()),
            Some(_) => Err(DaoError::Conflict(format!(
                "workspace {workspace_id} already has a {} cloud context",
                context.platform
            ))),
            None => {
                contexts.insert((workspace_id, context.platform), context.clone());
                Ok(())
            }
        }
    }

    async fn get_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Result<Option<CloudContext>, DaoError> {
        let contexts = self.contexts.read().map_err(|_| poisoned())?;
        Ok(contexts.get(&(workspace_id, platform)).cloned())
    }

    async fn delete_cloud_context(
        &self,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        let mut contexts = self.contexts.write().map_err(|_| poisoned())?;
        let key = (workspace_id, platform);
        let owned = match (contexts.get(&key), creating_flight_id) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(ctx), Some(flight)) => ctx.creating_flight_id == flight,
        };
        if owned {
            contexts.remove(&key);
        }
        Ok(owned)
    }
}
