//! Cloud provider boundary used by the built-in flight steps.
//!
//! Real SDK calls live behind [`CloudService`]; [`InMemoryCloudService`] is a
//! fake with failure injection for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use wsm_core::ResourceType;
use wsm_flight::StepFailure;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The object already exists (HTTP 409).
    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Worth retrying (timeouts, 5xx, throttling).
    #[error("transient cloud error: {0}")]
    Transient(String),

    #[error("cloud error: {0}")]
    Permanent(String),
}

impl CloudError {
    fn into_failure(self) -> StepFailure {
        match self {
            CloudError::Transient(_) => StepFailure::retry(self.to_string()),
            other => StepFailure::fatal(other.to_string()),
        }
    }
}

/// Outcome of a create call as seen by a step: "already exists" converges.
pub fn created(result: Result<(), CloudError>) -> Result<(), StepFailure> {
    match result {
        Ok(()) | Err(CloudError::Conflict(_)) => Ok(()),
        Err(e) => Err(e.into_failure()),
    }
}

/// Outcome of a delete call as seen by a step: "not found" converges.
pub fn deleted(result: Result<(), CloudError>) -> Result<(), StepFailure> {
    match result {
        Ok(()) | Err(CloudError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into_failure()),
    }
}

/// Outcome of any other call: only transient errors are retried.
pub fn finished(result: Result<(), CloudError>) -> Result<(), StepFailure> {
    result.map_err(CloudError::into_failure)
}

#[async_trait]
pub trait CloudService: Send + Sync {
    async fn create_project(&self, project_id: &str) -> Result<(), CloudError>;

    async fn delete_project(&self, project_id: &str) -> Result<(), CloudError>;

    async fn create_azure_context(&self, resource_group: &str) -> Result<(), CloudError>;

    async fn delete_azure_context(&self, resource_group: &str) -> Result<(), CloudError>;

    /// Create a resource inside a project / resource group.
    async fn create_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
        spec: &JsonValue,
    ) -> Result<(), CloudError>;

    async fn delete_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<(), CloudError>;

    /// Copy the data of one resource into another existing resource of the
    /// same type. Copying again overwrites the destination.
    async fn copy_resource(
        &self,
        resource_type: ResourceType,
        source: CloudObject<'_>,
        destination: CloudObject<'_>,
    ) -> Result<(), CloudError>;
}

/// A resource addressed by its container and name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CloudObject<'a> {
    pub cloud_id: &'a str,
    pub name: &'a str,
}

#[async_trait]
impl<S> CloudService for Arc<S>
where
    S: CloudService + ?Sized,
{
    async fn create_project(&self, project_id: &str) -> Result<(), CloudError> {
        (**self).create_project(project_id).await
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), CloudError> {
        (**self).delete_project(project_id).await
    }

    async fn create_azure_context(&self, resource_group: &str) -> Result<(), CloudError> {
        (**self).create_azure_context(resource_group).await
    }

    async fn delete_azure_context(&self, resource_group: &str) -> Result<(), CloudError> {
        (**self).delete_azure_context(resource_group).await
    }

    async fn create_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
        spec: &JsonValue,
    ) -> Result<(), CloudError> {
        (**self)
            .create_resource(cloud_id, resource_type, name, spec)
            .await
    }

    async fn delete_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<(), CloudError> {
        (**self).delete_resource(cloud_id, resource_type, name).await
    }

    async fn copy_resource(
        &self,
        resource_type: ResourceType,
        source: CloudObject<'_>,
        destination: CloudObject<'_>,
    ) -> Result<(), CloudError> {
        (**self)
            .copy_resource(resource_type, source, destination)
            .await
    }
}

/// Cloud operations, for failure injection and call counting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloudOp {
    CreateProject,
    DeleteProject,
    CreateAzureContext,
    DeleteAzureContext,
    CreateResource,
    DeleteResource,
    CopyResource,
}

type ResourceKey = (String, ResourceType, String);

/// In-memory cloud for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCloudService {
    projects: RwLock<HashSet<String>>,
    resource_groups: RwLock<HashSet<String>>,
    resources: RwLock<HashMap<ResourceKey, JsonValue>>,
    /// Destination -> source of the last data copy.
    copies: RwLock<HashMap<ResourceKey, ResourceKey>>,
    injected: Mutex<Vec<(CloudOp, CloudError)>>,
    calls: Mutex<HashMap<CloudOp, usize>>,
}

impl InMemoryCloudService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: CloudOp, times: usize, error: CloudError) {
        let mut injected = self.injected.lock().unwrap_or_else(|e| e.into_inner());
        injected.extend(std::iter::repeat_n((op, error), times));
    }

    pub fn calls(&self, op: CloudOp) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(&op).copied().unwrap_or(0)
    }

    pub fn has_project(&self, project_id: &str) -> bool {
        self.projects
            .read()
            .map(|p| p.contains(project_id))
            .unwrap_or(false)
    }

    pub fn has_resource_group(&self, resource_group: &str) -> bool {
        self.resource_groups
            .read()
            .map(|g| g.contains(resource_group))
            .unwrap_or(false)
    }

    pub fn has_resource(&self, cloud_id: &str, resource_type: ResourceType, name: &str) -> bool {
        self.resources
            .read()
            .map(|r| r.contains_key(&(cloud_id.to_string(), resource_type, name.to_string())))
            .unwrap_or(false)
    }

    /// Source `(cloud_id, name)` whose data was last copied into the resource.
    pub fn copied_from(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
    ) -> Option<(String, String)> {
        let key = (cloud_id.to_string(), resource_type, name.to_string());
        self.copies
            .read()
            .ok()
            .and_then(|c| c.get(&key).map(|(id, _, n)| (id.clone(), n.clone())))
    }

    /// Count the call and pop an injected failure for `op`, if any.
    fn enter(&self, op: CloudOp) -> Result<(), CloudError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls.entry(op).or_default() += 1;
        }
        let mut injected = self.injected.lock().unwrap_or_else(|e| e.into_inner());
        match injected.iter().position(|(o, _)| *o == op) {
            Some(i) => Err(injected.remove(i).1),
            None => Ok(()),
        }
    }
}

fn lock_error() -> CloudError {
    CloudError::Transient("lock poisoned".to_string())
}

fn insert_unique(set: &RwLock<HashSet<String>>, key: &str) -> Result<(), CloudError> {
    let mut set = set.write().map_err(|_| lock_error())?;
    if !set.insert(key.to_string()) {
        return Err(CloudError::Conflict(key.to_string()));
    }
    Ok(())
}

fn remove_existing(set: &RwLock<HashSet<String>>, key: &str) -> Result<(), CloudError> {
    let mut set = set.write().map_err(|_| lock_error())?;
    if !set.remove(key) {
        return Err(CloudError::NotFound(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl CloudService for InMemoryCloudService {
    async fn create_project(&self, project_id: &str) -> Result<(), CloudError> {
        self.enter(CloudOp::CreateProject)?;
        insert_unique(&self.projects, project_id)
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), CloudError> {
        self.enter(CloudOp::DeleteProject)?;
        remove_existing(&self.projects, project_id)?;
        let mut resources = self.resources.write().map_err(|_| lock_error())?;
        resources.retain(|(cloud_id, _, _), _| cloud_id != project_id);
        Ok(())
    }

    async fn create_azure_context(&self, resource_group: &str) -> Result<(), CloudError> {
        self.enter(CloudOp::CreateAzureContext)?;
        insert_unique(&self.resource_groups, resource_group)
    }

    async fn delete_azure_context(&self, resource_group: &str) -> Result<(), CloudError> {
        self.enter(CloudOp::DeleteAzureContext)?;
        remove_existing(&self.resource_groups, resource_group)?;
        let mut resources = self.resources.write().map_err(|_| lock_error())?;
        resources.retain(|(cloud_id, _, _), _| cloud_id != resource_group);
        Ok(())
    }

    async fn create_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
        spec: &JsonValue,
    ) -> Result<(), CloudError> {
        self.enter(CloudOp::CreateResource)?;
        let container_exists = self.has_project(cloud_id) || self.has_resource_group(cloud_id);
        if !container_exists {
            return Err(CloudError::Permanent(format!("no cloud context '{cloud_id}'")));
        }
        let mut resources = self.resources.write().map_err(|_| lock_error())?;
        let key = (cloud_id.to_string(), resource_type, name.to_string());
        if resources.contains_key(&key) {
            return Err(CloudError::Conflict(format!("{resource_type} {name}")));
        }
        resources.insert(key, spec.clone());
        Ok(())
    }

    async fn delete_resource(
        &self,
        cloud_id: &str,
        resource_type: ResourceType,
        name: &str,
    ) -> Result<(), CloudError> {
        self.enter(CloudOp::DeleteResource)?;
        let mut resources = self.resources.write().map_err(|_| lock_error())?;
        let key = (cloud_id.to_string(), resource_type, name.to_string());
        match resources.remove(&key) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound(format!("{resource_type} {name}"))),
        }
    }

    async fn copy_resource(
        &self,
        resource_type: ResourceType,
        source: CloudObject<'_>,
        destination: CloudObject<'_>,
    ) -> Result<(), CloudError> {
        self.enter(CloudOp::CopyResource)?;
        let source_key = (source.cloud_id.to_string(), resource_type, source.name.to_string());
        let destination_key = (
            destination.cloud_id.to_string(),
            resource_type,
            destination.name.to_string(),
        );
        {
            let resources = self.resources.read().map_err(|_| lock_error())?;
            for (key, object) in [(&source_key, &source), (&destination_key, &destination)] {
                if !resources.contains_key(key) {
                    return Err(CloudError::NotFound(format!(
                        "{resource_type} {}/{}",
                        object.cloud_id, object.name
                    )));
                }
            }
        }
        let mut copies = self.copies.write().map_err(|_| lock_error())?;
        copies.insert(destination_key, source_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let cloud = InMemoryCloudService::new();
        cloud.fail_next(
            CloudOp::CreateProject,
            2,
            CloudError::Transient("503".to_string()),
        );

        assert!(cloud.create_project("p").await.is_err());
        assert!(cloud.create_project("p").await.is_err());
        assert!(cloud.create_project("p").await.is_ok());
        assert_eq!(cloud.calls(CloudOp::CreateProject), 3);
        assert!(cloud.has_project("p"));
    }

    #[tokio::test]
    async fn conflicts_and_missing_objects_converge_for_steps() {
        let cloud = InMemoryCloudService::new();
        cloud.create_project("p").await.unwrap();

        assert!(created(cloud.create_project("p").await).is_ok());
        cloud.delete_project("p").await.unwrap();
        assert!(deleted(cloud.delete_project("p").await).is_ok());
    }

    #[tokio::test]
    async fn copying_requires_both_resources() {
        let cloud = InMemoryCloudService::new();
        cloud.create_project("src").await.unwrap();
        cloud.create_project("dst").await.unwrap();
        let spec = JsonValue::Null;
        cloud
            .create_resource("src", ResourceType::GcsBucket, "a", &spec)
            .await
            .unwrap();
        let source = CloudObject {
            cloud_id: "src",
            name: "a",
        };
        let destination = CloudObject {
            cloud_id: "dst",
            name: "b",
        };

        assert!(matches!(
            cloud
                .copy_resource(ResourceType::GcsBucket, source, destination)
                .await,
            Err(CloudError::NotFound(_))
        ));
        cloud
            .create_resource("dst", ResourceType::GcsBucket, "b", &spec)
            .await
            .unwrap();
        cloud
            .copy_resource(ResourceType::GcsBucket, source, destination)
            .await
            .unwrap();

        assert_eq!(
            cloud.copied_from("dst", ResourceType::GcsBucket, "b"),
            Some(("src".to_string(), "a".to_string()))
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        let retry = created(Err(CloudError::Transient("timeout".to_string()))).unwrap_err();
        assert!(retry.is_retryable());

        let fatal = deleted(Err(CloudError::Permanent("403".to_string()))).unwrap_err();
        assert!(!fatal.is_retryable());
    }
}
