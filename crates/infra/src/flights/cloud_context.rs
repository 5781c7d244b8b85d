//! Cloud-context create/delete flights (GCP projects, Azure resource groups).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use uuid::Uuid;

use wsm_auth::{AuthenticatedUserRequest, IamAction, IamResource};
use wsm_core::{CloudContext, CloudPlatform, WorkspaceId};
use wsm_flight::{
    Flight, FlightBuildError, FlightContext, FlightKind, FlightMap, FlightRegistryBuilder, Step,
    StepFailure, StepResult,
};

use super::controlled_resource::purge_resource;
use super::{
    AZURE_CONTEXT_CREATE, AZURE_CONTEXT_DELETE, CLOUD_ID, FlightServices, GCP_CONTEXT_CREATE,
    GCP_CONTEXT_DELETE, authz_failure, cannot_undo, dao_failure,
};
use crate::cloud::{created, deleted};
use crate::jobs::keys;

pub(crate) fn register(
    builder: FlightRegistryBuilder,
    services: &Arc<FlightServices>,
) -> FlightRegistryBuilder {
    let mut builder = builder;
    for platform in [CloudPlatform::Gcp, CloudPlatform::Azure] {
        let create = services.clone();
        let delete = services.clone();
        builder = builder
            .register_fn(create_kind(platform), move |input| {
                create_flight(&create, platform, input)
            })
            .register_fn(delete_kind(platform), move |input| {
                delete_flight(&delete, platform, input)
            });
    }
    builder
}

fn create_kind(platform: CloudPlatform) -> FlightKind {
    match platform {
        CloudPlatform::Gcp => GCP_CONTEXT_CREATE,
        CloudPlatform::Azure => AZURE_CONTEXT_CREATE,
    }
}

fn delete_kind(platform: CloudPlatform) -> FlightKind {
    match platform {
        CloudPlatform::Gcp => GCP_CONTEXT_DELETE,
        CloudPlatform::Azure => AZURE_CONTEXT_DELETE,
    }
}

fn create_flight(
    services: &Arc<FlightServices>,
    platform: CloudPlatform,
    input: &FlightMap,
) -> Result<Flight, FlightBuildError> {
    let workspace_id: WorkspaceId = input.get_required(keys::WORKSPACE_ID)?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(create_kind(platform));
    flight
        .add_step_with_retry(
            CheckWorkspaceAccessStep {
                services: services.clone(),
                user,
                workspace_id,
                action: IamAction::WRITE,
            },
            services.cloud_retry,
        )
        .add_step(GenerateCloudIdStep { platform })
        .add_step_with_retry(
            CreateCloudContainerStep {
                services: services.clone(),
                platform,
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            StoreCloudContextStep {
                services: services.clone(),
                workspace_id,
                platform,
            },
            services.database_retry,
        );
    Ok(flight)
}

fn delete_flight(
    services: &Arc<FlightServices>,
    platform: CloudPlatform,
    input: &FlightMap,
) -> Result<Flight, FlightBuildError> {
    let workspace_id: WorkspaceId = input.get_required(keys::WORKSPACE_ID)?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(delete_kind(platform));
    flight
        .add_step_with_retry(
            DeleteContextResourcesStep {
                services: services.clone(),
                user,
                workspace_id,
                platform,
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteCloudContextStep::new(services.clone(), workspace_id, platform),
            services.cloud_retry,
        );
    Ok(flight)
}

/// Fails the flight unless the caller may perform `action` on the workspace.
pub(crate) struct CheckWorkspaceAccessStep {
    pub(crate) services: Arc<FlightServices>,
    pub(crate) user: AuthenticatedUserRequest,
    pub(crate) workspace_id: WorkspaceId,
    pub(crate) action: IamAction,
}

#[async_trait]
impl Step for CheckWorkspaceAccessStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        self.services
            .authz
            .check_authorized(
                &self.user,
                &IamResource::workspace(self.workspace_id),
                &self.action,
            )
            .await
            .map_err(authz_failure)
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

/// Picks the project id / resource group name once and keeps it in the
/// working map so a re-run reuses it.
struct GenerateCloudIdStep {
    platform: CloudPlatform,
}

#[async_trait]
impl Step for GenerateCloudIdStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        if ctx.working().contains_key(CLOUD_ID) {
            return Ok(());
        }
        let suffix = Uuid::now_v7().simple().to_string();
        let cloud_id = match self.platform {
            CloudPlatform::Gcp => format!("wsm-{}", &suffix[suffix.len() - 12..]),
            CloudPlatform::Azure => format!("mrg-{}", &suffix[suffix.len() - 12..]),
        };
        ctx.working_mut().put(CLOUD_ID, &cloud_id)?;
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct CreateCloudContainerStep {
    services: Arc<FlightServices>,
    platform: CloudPlatform,
}

#[async_trait]
impl Step for CreateCloudContainerStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let cloud_id: String = ctx.working().get_required(CLOUD_ID)?;
        let cloud = &self.services.cloud;
        match self.platform {
            CloudPlatform::Gcp => created(cloud.create_project(&cloud_id).await),
            CloudPlatform::Azure => created(cloud.create_azure_context(&cloud_id).await),
        }
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        // Nothing to remove if the id was never generated.
        let Some(cloud_id) = ctx.working().get::<String>(CLOUD_ID)? else {
            return Ok(());
        };
        let cloud = &self.services.cloud;
        match self.platform {
            CloudPlatform::Gcp => deleted(cloud.delete_project(&cloud_id).await),
            CloudPlatform::Azure => deleted(cloud.delete_azure_context(&cloud_id).await),
        }
    }
}

struct StoreCloudContextStep {
    services: Arc<FlightServices>,
    workspace_id: WorkspaceId,
    platform: CloudPlatform,
}

#[async_trait]
impl Step for StoreCloudContextStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let context = CloudContext {
            platform: self.platform,
            cloud_id: ctx.working().get_required(CLOUD_ID)?,
            creating_flight_id: ctx.flight_id().to_string(),
        };
        self.services
            .workspaces
            .create_cloud_context(self.workspace_id, &context)
            .await
            .map_err(dao_failure)?;
        ctx.working_mut().put(keys::RESPONSE, &context)?;
        info!(
            workspace_id = %self.workspace_id,
            platform = %self.platform,
            cloud_id = %context.cloud_id,
            "cloud context created"
        );
        Ok(())
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        // Only remove a context this flight created.
        self.services
            .workspaces
            .delete_cloud_context(
                self.workspace_id,
                self.platform,
                Some(ctx.flight_id().as_str()),
            )
            .await
            .map_err(dao_failure)?;
        Ok(())
    }
}

struct DeleteContextResourcesStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    workspace_id: WorkspaceId,
    platform: CloudPlatform,
}

#[async_trait]
impl Step for DeleteContextResourcesStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        let resources = self
            .services
            .resources
            .list_resources(self.workspace_id)
            .await
            .map_err(dao_failure)?;
        for resource in &resources {
            let platform = self
                .services
                .capabilities
                .cloud_platform(resource)
                .map_err(|e| StepFailure::fatal(e.to_string()))?;
            if platform == self.platform {
                purge_resource(&self.services, &self.user, resource).await?;
            }
        }
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        error!(
            workspace_id = %self.workspace_id,
            platform = %self.platform,
            "unable to undo deletion of controlled resources"
        );
        Err(cannot_undo("controlled resources"))
    }
}

/// Removes a workspace's cloud context on one platform, cloud side first.
pub(crate) struct DeleteCloudContextStep {
    services: Arc<FlightServices>,
    workspace_id: WorkspaceId,
    platform: CloudPlatform,
}

impl DeleteCloudContextStep {
    pub(crate) fn new(
        services: Arc<FlightServices>,
        workspace_id: WorkspaceId,
        platform: CloudPlatform,
    ) -> Self {
        Self {
            services,
            workspace_id,
            platform,
        }
    }
}

#[async_trait]
impl Step for DeleteCloudContextStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        let context = self
            .services
            .workspaces
            .get_cloud_context(self.workspace_id, self.platform)
            .await
            .map_err(dao_failure)?;
        let Some(context) = context else {
            return Ok(());
        };

        let cloud = &self.services.cloud;
        match self.platform {
            CloudPlatform::Gcp => deleted(cloud.delete_project(&context.cloud_id).await)?,
            CloudPlatform::Azure => deleted(cloud.delete_azure_context(&context.cloud_id).await)?,
        }
        self.services
            .workspaces
            .delete_cloud_context(self.workspace_id, self.platform, None)
            .await
            .map_err(dao_failure)?;
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("cloud context"))
    }
}
