//! Workspace activity-log hook.
//!
//! Records a workspace activity entry when a job finishes:
//!
//! - successful jobs with an operation type are logged as that operation;
//! - failed DELETE jobs are logged only if the target is actually gone, which
//!   happens when a flight fails after the delete itself went through;
//! - other failures are not logged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use wsm_auth::AuthenticatedUserRequest;
use wsm_core::{CloudPlatform, ControlledResource, OperationType, WorkspaceId};
use wsm_flight::{
    FlightHook, FlightKind, FlightMapError, FlightRecord, FlightStatus, HookError,
};

use crate::dao::{ActivityLogDao, ActivityLogEntry, DaoError, ResourceDao, WorkspaceDao};
use crate::flights;
use crate::jobs::keys;

#[derive(Debug, Error)]
pub enum ActivityLogError {
    /// A DELETE flight kind with no reconciliation rule.
    #[error("activity log should be updated for failures of deletion flight {0}")]
    UnhandledDeletionFlight(FlightKind),

    #[error("malformed flight input: {0}")]
    Input(#[from] FlightMapError),

    #[error(transparent)]
    Dao(#[from] DaoError),
}

impl From<ActivityLogError> for HookError {
    fn from(err: ActivityLogError) -> Self {
        match err {
            ActivityLogError::UnhandledDeletionFlight(_) => HookError::Unhandled(err.to_string()),
            other => HookError::Failed(other.to_string()),
        }
    }
}

/// What a deletion flight removes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeletionTarget {
    Workspace,
    CloudContext(CloudPlatform),
    ControlledResource,
}

/// Deletion target of a flight kind, if it is a known deletion flight.
pub fn classify_deletion(kind: &FlightKind) -> Option<DeletionTarget> {
    match kind.as_str() {
        k if k == flights::WORKSPACE_DELETE.as_str() => Some(DeletionTarget::Workspace),
        k if k == flights::GCP_CONTEXT_DELETE.as_str() => {
            Some(DeletionTarget::CloudContext(CloudPlatform::Gcp))
        }
        k if k == flights::AZURE_CONTEXT_DELETE.as_str() => {
            Some(DeletionTarget::CloudContext(CloudPlatform::Azure))
        }
        k if k == flights::CONTROLLED_RESOURCE_DELETE.as_str() => {
            Some(DeletionTarget::ControlledResource)
        }
        _ => None,
    }
}

/// Flight hook reconciling job outcomes with the workspace activity log.
pub struct ActivityLogHook {
    activity: Arc<dyn ActivityLogDao>,
    workspaces: Arc<dyn WorkspaceDao>,
    resources: Arc<dyn ResourceDao>,
}

impl ActivityLogHook {
    pub fn new(
        activity: Arc<dyn ActivityLogDao>,
        workspaces: Arc<dyn WorkspaceDao>,
        resources: Arc<dyn ResourceDao>,
    ) -> Self {
        Self {
            activity,
            workspaces,
            resources,
        }
    }

    /// Apply the logging rules to a finished flight. Returns whether an
    /// entry was written.
    pub async fn reconcile(&self, record: &FlightRecord) -> Result<bool, ActivityLogError> {
        info!(
            flight_id = %record.flight_id,
            flight_kind = %record.kind,
            status = %record.status,
            "end flight"
        );

        let input = &record.input;
        let Some(operation) = input.get::<OperationType>(keys::OPERATION_TYPE)? else {
            // Only sub-flights and flights launched directly (tests) lack one.
            warn!(
                flight_id = %record.flight_id,
                "operation type is missing; skipping activity log"
            );
            return Ok(false);
        };
        let workspace_id: WorkspaceId = input.get_required(keys::WORKSPACE_ID)?;

        if record.status == FlightStatus::Success {
            return self.write(record, workspace_id, operation).await;
        }
        if operation != OperationType::Delete {
            return Ok(false);
        }

        let target = classify_deletion(&record.kind)
            .ok_or_else(|| ActivityLogError::UnhandledDeletionFlight(record.kind.clone()))?;

        let still_present = match target {
            DeletionTarget::Workspace => {
                self.workspaces.get_workspace(workspace_id).await?.is_some()
            }
            DeletionTarget::CloudContext(platform) => self
                .workspaces
                .get_cloud_context(workspace_id, platform)
                .await?
                .is_some(),
            DeletionTarget::ControlledResource => {
                let resource: ControlledResource = input.get_required(keys::RESOURCE)?;
                self.resources
                    .get_resource(workspace_id, resource.resource_id)
                    .await?
                    .is_some()
            }
        };

        if still_present {
            warn!(
                flight_id = %record.flight_id,
                workspace_id = %workspace_id,
                target = ?target,
                "deletion failed; not writing deletion to workspace activity log"
            );
            return Ok(false);
        }
        self.write(record, workspace_id, OperationType::Delete).await
    }

    async fn write(
        &self,
        record: &FlightRecord,
        workspace_id: WorkspaceId,
        operation: OperationType,
    ) -> Result<bool, ActivityLogError> {
        let actor: Option<AuthenticatedUserRequest> = record.input.get(keys::AUTH_USER_INFO)?;
        let (actor_email, actor_subject_id) = match actor {
            Some(user) => (user.email, user.subject_id),
            None => (String::new(), None),
        };
        let written = self
            .activity
            .write_activity(ActivityLogEntry {
                workspace_id,
                operation,
                flight_id: record.flight_id.to_string(),
                actor_email,
                actor_subject_id,
                changed_at: record.completed_at.unwrap_or_else(Utc::now),
            })
            .await?;
        Ok(written)
    }
}

#[async_trait]
impl FlightHook for ActivityLogHook {
    fn name(&self) -> &str {
        "activity-log"
    }

    async fn end_flight(&self, record: &FlightRecord) -> Result<(), HookError> {
        self.reconcile(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wsm_core::{ResourceAttributes, ResourceId, Workspace};
    use wsm_flight::{FlightId, FlightMap, StepError};

    use crate::dao::{InMemoryActivityLogDao, InMemoryResourceDao, InMemoryWorkspaceDao};

    struct Fixture {
        activity: Arc<InMemoryActivityLogDao>,
        workspaces: Arc<InMemoryWorkspaceDao>,
        resources: Arc<InMemoryResourceDao>,
        hook: ActivityLogHook,
    }

    fn fixture() -> Fixture {
        let activity = Arc::new(InMemoryActivityLogDao::new());
        let workspaces = Arc::new(InMemoryWorkspaceDao::new());
        let resources = Arc::new(InMemoryResourceDao::new());
        let hook = ActivityLogHook::new(activity.clone(), workspaces.clone(), resources.clone());
        Fixture {
            activity,
            workspaces,
            resources,
            hook,
        }
    }

    fn finished(kind: FlightKind, input: FlightMap, success: bool) -> FlightRecord {
        let mut record = FlightRecord::new(FlightId::generate(), kind, input, vec!["s".to_string()]);
        record.mark_running();
        if success {
            record.step_succeeded(0, FlightMap::new());
            record.complete();
        } else {
            record.begin_undo(0, StepError::new("boom"), FlightMap::new());
            record.step_undone(0, FlightMap::new());
        }
        record
    }

    fn input(workspace_id: WorkspaceId, operation: OperationType) -> FlightMap {
        FlightMap::new()
            .with(keys::WORKSPACE_ID, &workspace_id)
            .unwrap()
            .with(keys::OPERATION_TYPE, &operation)
            .unwrap()
            .with(
                keys::AUTH_USER_INFO,
                &AuthenticatedUserRequest::new("alice@example.com", "t"),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn success_logs_the_operation_once() {
        let f = fixture();
        let ws = WorkspaceId::new();
        let record = finished(
            flights::WORKSPACE_CREATE,
            input(ws, OperationType::Create),
            true,
        );

        assert!(f.hook.reconcile(&record).await.unwrap());
        assert!(!f.hook.reconcile(&record).await.unwrap());

        let log = f.activity.list_activity(ws).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, OperationType::Create);
        assert_eq!(log[0].actor_email, "alice@example.com");
    }

    #[tokio::test]
    async fn missing_operation_type_is_skipped() {
        let f = fixture();
        let record = finished(flights::WORKSPACE_CREATE, FlightMap::new(), true);
        assert!(!f.hook.reconcile(&record).await.unwrap());
        assert!(f.activity.is_empty());
    }

    #[tokio::test]
    async fn failed_non_delete_is_not_logged() {
        let f = fixture();
        let record = finished(
            flights::WORKSPACE_CREATE,
            input(WorkspaceId::new(), OperationType::Create),
            false,
        );
        assert!(!f.hook.reconcile(&record).await.unwrap());
        assert!(f.activity.is_empty());
    }

    #[tokio::test]
    async fn failed_cloud_context_delete_logs_when_context_is_gone() {
        let f = fixture();
        let ws = Workspace::new(WorkspaceId::new(), "ws");
        f.workspaces.create_workspace(&ws, "setup").await.unwrap();

        let record = finished(
            flights::GCP_CONTEXT_DELETE,
            input(ws.id, OperationType::Delete),
            false,
        );
        assert!(f.hook.reconcile(&record).await.unwrap());
    }

    #[tokio::test]
    async fn failed_resource_delete_with_resource_present_is_not_logged() {
        let f = fixture();
        let ws = WorkspaceId::new();
        let resource = ControlledResource {
            workspace_id: ws,
            resource_id: ResourceId::new(),
            name: "data".to_string(),
            description: None,
            attributes: ResourceAttributes::GcsBucket {
                bucket_name: "data-bucket".to_string(),
                location: None,
            },
        };
        f.resources.create_resource(&resource, "setup").await.unwrap();

        let flight_input = input(ws, OperationType::Delete)
            .with(keys::RESOURCE, &resource)
            .unwrap();
        let record = finished(flights::CONTROLLED_RESOURCE_DELETE, flight_input, false);

        assert!(!f.hook.reconcile(&record).await.unwrap());
        assert!(f.activity.is_empty());
    }

    #[tokio::test]
    async fn unknown_deletion_flight_is_a_programming_error() {
        let f = fixture();
        let record = finished(
            FlightKind::from_static("workspace.purge"),
            input(WorkspaceId::new(), OperationType::Delete),
            false,
        );

        let err = f.hook.end_flight(&record).await.unwrap_err();
        assert!(matches!(err, HookError::Unhandled(_)));
    }
}
