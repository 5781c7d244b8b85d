//! Workspace create/delete flights.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use wsm_auth::{AuthenticatedUserRequest, AuthzError, IamResource};
use wsm_core::{CloudPlatform, Workspace, WorkspaceId, WorkspaceStage};
use wsm_flight::{
    Flight, FlightBuildError, FlightContext, FlightMap, FlightRegistryBuilder, Step, StepResult,
};

use super::cloud_context::DeleteCloudContextStep;
use super::controlled_resource::purge_resource;
use super::{
    FlightServices, WORKSPACE_CREATE, WORKSPACE_DELETE, authz_failure, cannot_undo, dao_failure,
};
use crate::jobs::keys;

/// Working-map marker: this flight created the workspace's IAM resource.
const WORKSPACE_IAM_CREATED: &str = "workspace_iam_created";

pub(crate) fn register(
    builder: FlightRegistryBuilder,
    services: &Arc<FlightServices>,
) -> FlightRegistryBuilder {
    let create = services.clone();
    let delete = services.clone();
    builder
        .register_fn(WORKSPACE_CREATE, move |input| create_flight(&create, input))
        .register_fn(WORKSPACE_DELETE, move |input| delete_flight(&delete, input))
}

/// Input: the [`Workspace`] under `request` and the caller.
fn create_flight(services: &Arc<FlightServices>, input: &FlightMap) -> Result<Flight, FlightBuildError> {
    let workspace: Workspace = input.get_required(keys::REQUEST)?;
    workspace
        .validate()
        .map_err(|e| FlightBuildError::Invalid(e.to_string()))?;
    if let Some(id) = input.get::<WorkspaceId>(keys::WORKSPACE_ID)? {
        if id != workspace.id {
            return Err(FlightBuildError::Invalid(format!(
                "workspace id {id} does not match request {}",
                workspace.id
            )));
        }
    }
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(WORKSPACE_CREATE);
    let workspace_id = workspace.id;
    let stage = workspace.stage;
    // Metadata first: it fails the flight when the id belongs to another one.
    flight.add_step_with_retry(
        CreateWorkspaceMetadataStep {
            services: services.clone(),
            workspace,
        },
        services.database_retry,
    );
    // Stage-2 workspaces get their IAM resource from another system.
    if stage == WorkspaceStage::McWorkspace {
        flight.add_step_with_retry(
            CreateWorkspaceAuthzStep {
                services: services.clone(),
                user,
                workspace_id,
            },
            services.cloud_retry,
        );
    }
    Ok(flight)
}

/// Input: `workspace_id` and the caller.
fn delete_flight(services: &Arc<FlightServices>, input: &FlightMap) -> Result<Flight, FlightBuildError> {
    let workspace_id: WorkspaceId = input.get_required(keys::WORKSPACE_ID)?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(WORKSPACE_DELETE);
    flight
        .add_step_with_retry(
            DeleteWorkspaceResourcesStep {
                services: services.clone(),
                user: user.clone(),
                workspace_id,
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteCloudContextStep::new(services.clone(), workspace_id, CloudPlatform::Gcp),
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteCloudContextStep::new(services.clone(), workspace_id, CloudPlatform::Azure),
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteWorkspaceAuthzStep {
                services: services.clone(),
                user,
                workspace_id,
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteWorkspaceMetadataStep {
                services: services.clone(),
                workspace_id,
            },
            services.database_retry,
        );
    Ok(flight)
}

struct CreateWorkspaceAuthzStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    workspace_id: WorkspaceId,
}

#[async_trait]
impl Step for CreateWorkspaceAuthzStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource = IamResource::workspace(self.workspace_id);
        // The metadata step proved this flight owns the workspace id, so an
        // existing IAM resource is left over from an earlier run of it.
        match self.services.authz.create_resource(&self.user, &resource).await {
            Ok(()) | Err(AuthzError::AlreadyExists(_)) => {
                ctx.working_mut().put(WORKSPACE_IAM_CREATED, &true)?;
                Ok(())
            }
            Err(e) => Err(authz_failure(e)),
        }
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if ctx.working().get::<bool>(WORKSPACE_IAM_CREATED)? != Some(true) {
            return Ok(());
        }
        let resource = IamResource::workspace(self.workspace_id);
        match self.services.authz.delete_resource(&self.user, &resource).await {
            Ok(()) | Err(AuthzError::NotFound(_)) => Ok(()),
            Err(e) => Err(authz_failure(e)),
        }
    }
}

struct CreateWorkspaceMetadataStep {
    services: Arc<FlightServices>,
    workspace: Workspace,
}

#[async_trait]
impl Step for CreateWorkspaceMetadataStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.services
            .workspaces
            .create_workspace(&self.workspace, ctx.flight_id().as_str())
            .await
            .map_err(dao_failure)?;
        ctx.working_mut().put(keys::RESPONSE, &self.workspace.id)?;
        Ok(())
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        // Never removes a workspace another flight created.
        let removed = self
            .services
            .workspaces
            .delete_workspace(self.workspace.id, Some(ctx.flight_id().as_str()))
            .await
            .map_err(dao_failure)?;
        debug!(workspace_id = %self.workspace.id, removed, "workspace metadata undone");
        Ok(())
    }
}

struct DeleteWorkspaceResourcesStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    workspace_id: WorkspaceId,
}

#[async_trait]
impl Step for DeleteWorkspaceResourcesStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        let resources = self
            .services
            .resources
            .list_resources(self.workspace_id)
            .await
            .map_err(dao_failure)?;
        for resource in &resources {
            purge_resource(&self.services, &self.user, resource).await?;
        }
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        error!(workspace_id = %self.workspace_id, "unable to undo deletion of controlled resources");
        Err(cannot_undo("controlled resources"))
    }
}

struct DeleteWorkspaceAuthzStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    workspace_id: WorkspaceId,
}

#[async_trait]
impl Step for DeleteWorkspaceAuthzStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        let workspace = self
            .services
            .workspaces
            .get_workspace(self.workspace_id)
            .await
            .map_err(dao_failure)?;
        // Metadata already gone means a previous run finished this step.
        let Some(workspace) = workspace else {
            return Ok(());
        };
        if workspace.stage != WorkspaceStage::McWorkspace {
            return Ok(());
        }
        let resource = IamResource::workspace(self.workspace_id);
        match self.services.authz.delete_resource(&self.user, &resource).await {
            Ok(()) | Err(AuthzError::NotFound(_)) => Ok(()),
            Err(e) => Err(authz_failure(e)),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("workspace authorization"))
    }
}

struct DeleteWorkspaceMetadataStep {
    services: Arc<FlightServices>,
    workspace_id: WorkspaceId,
}

#[async_trait]
impl Step for DeleteWorkspaceMetadataStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        self.services
            .workspaces
            .delete_workspace(self.workspace_id, None)
            .await
            .map_err(dao_failure)?;
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("workspace"))
    }
}
