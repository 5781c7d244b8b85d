use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use wsm_core::{ControlledResource, ResourceId, WorkspaceId};

use super::{DaoError, poisoned};

/// Controlled-resource metadata.
#[async_trait]
pub trait ResourceDao: Send + Sync {
    /// Insert a resource on behalf of `creating_flight_id`.
    ///
    /// Re-inserting an id the same flight created is a no-op. An id created by
    /// another flight, or another resource with the same name in the
    /// workspace, is a conflict.
    async fn create_resource(
        &self,
        resource: &ControlledResource,
        creating_flight_id: &str,
    ) -> Result<(), DaoError>;

    async fn get_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
    ) -> Result<Option<ControlledResource>, DaoError>;

    async fn list_resources(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ControlledResource>, DaoError>;

    /// Delete a resource, optionally only when `creating_flight_id` created
    /// it. Returns whether a row was removed.
    async fn delete_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError>;
}

#[async_trait]
impl<S> ResourceDao for Arc<S>
where
    S: ResourceDao + ?Sized,
{
    async fn create_resource(
        &self,
        resource: &ControlledResource,
        creating_flight_id: &str,
    ) -> Result<(), DaoError> {
        (**self).create_resource(resource, creating_flight_id).await
    }

    async fn get_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
    ) -> Result<Option<ControlledResource>, DaoError> {
        (**self).get_resource(workspace_id, resource_id).await
    }

    async fn list_resources(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ControlledResource>, DaoError> {
        (**self).list_resources(workspace_id).await
    }

    async fn delete_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        (**self)
            .delete_resource(workspace_id, resource_id, creating_flight_id)
            .await
    }
}

#[derive(Debug, Clone)]
struct ResourceRow {
    resource: ControlledResource,
    creating_flight_id: String,
}

/// In-memory resource metadata for tests/dev.
///
/// Keyed by `(workspace, resource)` so listing is ordered and
/// workspace-scoped.
#[derive(Debug, Default)]
pub struct InMemoryResourceDao {
    resources: RwLock<BTreeMap<(WorkspaceId, ResourceId), ResourceRow>>,
}

impl InMemoryResourceDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceDao for InMemoryResourceDao {
    async fn create_resource(
        &self,
        resource: &ControlledResource,
        creating_flight_id: &str,
    ) -> Result<(), DaoError> {
        let mut resources = self.resources.write().map_err(|_| poisoned())?;
        let key = (resource.workspace_id, resource.resource_id);
        if let Some(row) = resources.get(&key) {
            if row.creating_flight_id == creating_flight_id {
                return Ok(());
            }
            return Err(DaoError::Conflict(format!(
                "resource {} already exists in workspace {}",
                resource.resource_id, resource.workspace_id
            )));
        }
        let name_taken = resources.values().map(|row| &row.resource).any(|r| {
            r.workspace_id == resource.workspace_id && r.name == resource.name
        });
        if name_taken {
            return Err(DaoError::Conflict(format!(
                "resource named '{}' already exists in workspace {}",
                resource.name, resource.workspace_id
            )));
        }
        resources.insert(
            key,
            ResourceRow {
                resource: resource.clone(),
                creating_flight_id: creating_flight_id.to_string(),
            },
        );
        Ok(())
    }

    async fn get_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
    ) -> Result<Option<ControlledResource>, DaoError> {
        let resources = self.resources.read().map_err(|_| poisoned())?;
        Ok(resources
            .get(&(workspace_id, resource_id))
            .map(|row| row.resource.clone()))
    }

    async fn list_resources(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<ControlledResource>, DaoError> {
        let resources = self.resources.read().map_err(|_| poisoned())?;
        Ok(resources
            .values()
            .map(|row| &row.resource)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn delete_resource(
        &self,
        workspace_id: WorkspaceId,
        resource_id: ResourceId,
        creating_flight_id: Option<&str>,
    ) -> Result<bool, DaoError> {
        let mut resources = self.resources.write().map_err(|_| poisoned())?;
        let key = (workspace_id, resource_id);
        let owned = match (resources.get(&key), creating_flight_id) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(row), Some(flight)) => row.creating_flight_id == flight,
        };
        if owned {
            resources.remove(&key);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsm_core::ResourceAttributes;

    fn bucket(workspace_id: WorkspaceId, name: &str) -> ControlledResource {
        ControlledResource {
            workspace_id,
            resource_id: ResourceId::new(),
            name: name.to_string(),
            description: None,
            attributes: ResourceAttributes::GcsBucket {
                bucket_name: format!("{name}-bucket"),
                location: None,
            },
        }
    }

    #[tokio::test]
    async fn names_are_unique_per_workspace() {
        let dao = InMemoryResourceDao::new();
        let ws_a = WorkspaceId::new();
        let ws_b = WorkspaceId::new();

        let first = bucket(ws_a, "data");
        dao.create_resource(&first, "f").await.unwrap();
        dao.create_resource(&first, "f").await.unwrap();
        dao.create_resource(&bucket(ws_b, "data"), "f").await.unwrap();

        assert!(matches!(
            dao.create_resource(&bucket(ws_a, "data"), "f").await,
            Err(DaoError::Conflict(_))
        ));
        assert_eq!(dao.list_resources(ws_a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let dao = InMemoryResourceDao::new();
        let r = bucket(WorkspaceId::new(), "data");
        dao.create_resource(&r, "f").await.unwrap();

        assert!(dao.delete_resource(r.workspace_id, r.resource_id, None).await.unwrap());
        assert!(!dao.delete_resource(r.workspace_id, r.resource_id, None).await.unwrap());
    }

    #[tokio::test]
    async fn resource_rows_belong_to_their_creating_flight() {
        let dao = InMemoryResourceDao::new();
        let r = bucket(WorkspaceId::new(), "data");
        dao.create_resource(&r, "flight-a").await.unwrap();

        let mut renamed = r.clone();
        renamed.name = "copy".to_string();
        assert!(matches!(
            dao.create_resource(&renamed, "flight-b").await,
            Err(DaoError::Conflict(_))
        ));
        assert!(
            !dao.delete_resource(r.workspace_id, r.resource_id, Some("flight-b"))
                .await
                .unwrap()
        );
        assert_eq!(
            dao.get_resource(r.workspace_id, r.resource_id).await.unwrap(),
            Some(r.clone())
        );
        assert!(
            dao.delete_resource(r.workspace_id, r.resource_id, Some("flight-a"))
                .await
                .unwrap()
        );
    }
}
