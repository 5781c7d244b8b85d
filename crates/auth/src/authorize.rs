use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wsm_core::{ResourceId, WorkspaceId};

use crate::{AuthenticatedUserRequest, IamAction};

/// IAM resource type of a workspace.
pub const WORKSPACE_RESOURCE_TYPE: &str = "workspace";

/// A resource known to the IAM service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IamResource {
    pub resource_type: String,
    pub resource_id: String,
}

impl IamResource {
    pub fn new(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    pub fn workspace(workspace_id: WorkspaceId) -> Self {
        Self::new(WORKSPACE_RESOURCE_TYPE, workspace_id)
    }

    pub fn controlled(iam_resource_type: &str, resource_id: ResourceId) -> Self {
        Self::new(iam_resource_type, resource_id)
    }
}

impl core::fmt::Display for IamResource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {email} may not '{action}' {resource}")]
    Forbidden {
        email: String,
        action: String,
        resource: String,
    },

    #[error("IAM resource already exists: {0}")]
    AlreadyExists(String),

    #[error("IAM resource not found: {0}")]
    NotFound(String),

    /// Transient failure talking to the IAM service.
    #[error("IAM service unavailable: {0}")]
    Unavailable(String),
}

impl AuthzError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthzError::Unavailable(_))
    }
}

/// Black-box IAM capability consumed by flight steps.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Whether `user` may perform `action` on `resource`.
    async fn is_authorized(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
        action: &IamAction,
    ) -> Result<bool, AuthzError>;

    /// Create an IAM resource owned by `user`.
    ///
    /// Fails with [`AuthzError::AlreadyExists`] if the resource exists.
    async fn create_resource(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
    ) -> Result<(), AuthzError>;

    /// Delete an IAM resource.
    ///
    /// Fails with [`AuthzError::NotFound`] if the resource does not exist.
    async fn delete_resource(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
    ) -> Result<(), AuthzError>;

    /// Like [`AuthorizationService::is_authorized`], but maps a denial to
    /// [`AuthzError::Forbidden`].
    async fn check_authorized(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
        action: &IamAction,
    ) -> Result<(), AuthzError> {
        if self.is_authorized(user, resource, action).await? {
            Ok(())
        } else {
            Err(AuthzError::Forbidden {
                email: user.email.clone(),
                action: action.to_string(),
                resource: resource.to_string(),
            })
        }
    }
}

/// In-memory IAM service for tests/dev.
///
/// The creator of a resource becomes its owner; owners may perform every
/// action. Transient failures can be injected with
/// [`InMemoryAuthorizationService::fail_next`].
#[derive(Debug, Default)]
pub struct InMemoryAuthorizationService {
    grants: RwLock<HashMap<IamResource, HashMap<String, HashSet<IamAction>>>>,
    pending_failures: AtomicU32,
}

impl InMemoryAuthorizationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with [`AuthzError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Grant `action` on an existing resource to `email`.
    pub fn grant(&self, resource: &IamResource, email: &str, action: IamAction) {
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants
            .entry(resource.clone())
            .or_default()
            .entry(email.to_string())
            .or_default()
            .insert(action);
    }

    pub fn contains(&self, resource: &IamResource) -> bool {
        self.grants
            .read()
            .map(|g| g.contains_key(resource))
            .unwrap_or(false)
    }

    fn injected_failure(&self) -> Result<(), AuthzError> {
        let took = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(AuthzError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl AuthorizationService for InMemoryAuthorizationService {
    async fn is_authorized(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
        action: &IamAction,
    ) -> Result<bool, AuthzError> {
        self.injected_failure()?;
        let grants = self
            .grants
            .read()
            .map_err(|_| AuthzError::Unavailable("lock poisoned".to_string()))?;

        let allowed = grants
            .get(resource)
            .and_then(|members| members.get(&user.email))
            .is_some_and(|actions| actions.contains(action) || actions.contains(&IamAction::OWN));
        Ok(allowed)
    }

    async fn create_resource(
        &self,
        user: &AuthenticatedUserRequest,
        resource: &IamResource,
    ) -> Result<(), AuthzError> {
        self.injected_failure()?;
        let mut grants = self
            .grants
            .write()
            .map_err(|_| AuthzError::Unavailable("lock poisoned".to_string()))?;

        if grants.contains_key(resource) {
            return Err(AuthzError::AlreadyExists(resource.to_string()));
        }
        let owner = HashMap::from([(user.email.clone(), HashSet::from([IamAction::OWN]))]);
        grants.insert(resource.clone(), owner);
        tracing::debug!(resource = %resource, owner = %user.email, "created IAM resource");
        Ok(())
    }

    async fn delete_resource(
        &self,
        _user: &AuthenticatedUserRequest,
        resource: &IamResource,
    ) -> Result<(), AuthzError> {
        self.injected_failure()?;
        let mut grants = self
            .grants
            .write()
            .map_err(|_| AuthzError::Unavailable("lock poisoned".to_string()))?;

        grants
            .remove(resource)
            .map(|_| ())
            .ok_or_else(|| AuthzError::NotFound(resource.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AuthenticatedUserRequest {
        AuthenticatedUserRequest::new("alice@example.com", "token-a")
    }

    fn bob() -> AuthenticatedUserRequest {
        AuthenticatedUserRequest::new("bob@example.com", "token-b")
    }

    #[tokio::test]
    async fn creator_owns_resource() {
        let iam = InMemoryAuthorizationService::new();
        let ws = IamResource::workspace(WorkspaceId::new());

        iam.create_resource(&alice(), &ws).await.unwrap();

        assert!(iam.is_authorized(&alice(), &ws, &IamAction::DELETE).await.unwrap());
        assert!(!iam.is_authorized(&bob(), &ws, &IamAction::READ).await.unwrap());
    }

    #[tokio::test]
    async fn check_authorized_maps_denial_to_forbidden() {
        let iam = InMemoryAuthorizationService::new();
        let ws = IamResource::workspace(WorkspaceId::new());
        iam.create_resource(&alice(), &ws).await.unwrap();
        iam.grant(&ws, "bob@example.com", IamAction::READ);

        assert!(iam.check_authorized(&bob(), &ws, &IamAction::READ).await.is_ok());
        assert!(matches!(
            iam.check_authorized(&bob(), &ws, &IamAction::WRITE).await,
            Err(AuthzError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_delete_are_reported() {
        let iam = InMemoryAuthorizationService::new();
        let ws = IamResource::workspace(WorkspaceId::new());

        iam.create_resource(&alice(), &ws).await.unwrap();
        assert!(matches!(
            iam.create_resource(&alice(), &ws).await,
            Err(AuthzError::AlreadyExists(_))
        ));

        iam.delete_resource(&alice(), &ws).await.unwrap();
        assert!(matches!(
            iam.delete_resource(&alice(), &ws).await,
            Err(AuthzError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let iam = InMemoryAuthorizationService::new();
        let ws = IamResource::workspace(WorkspaceId::new());
        iam.fail_next(1);

        let err = iam.create_resource(&alice(), &ws).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(iam.create_resource(&alice(), &ws).await.is_ok());
    }
}
