//! Controlled-resource create/clone/delete flights.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use wsm_auth::{AuthenticatedUserRequest, AuthzError, IamAction, IamResource};
use wsm_core::{
    CloningInstructions, CloudPlatform, ControlledResource, DomainError, ResourceId, WorkspaceId,
};
use wsm_flight::{
    Flight, FlightBuildError, FlightContext, FlightMap, FlightRegistryBuilder, Step, StepFailure,
    StepResult,
};

use super::cloud_context::CheckWorkspaceAccessStep;
use super::{
    CLOUD_ID, CONTROLLED_RESOURCE_CLONE, CONTROLLED_RESOURCE_CREATE, CONTROLLED_RESOURCE_DELETE,
    FlightServices, authz_failure, cannot_undo, dao_failure,
};
use crate::cloud::{CloudObject, created, deleted, finished};
use crate::jobs::keys;

/// Working-map markers: this flight may have created the IAM resource or the
/// cloud object, so undo must remove it. Without them undo leaves both alone.
const RESOURCE_IAM_CREATED: &str = "resource_iam_created";
const CLOUD_RESOURCE_CREATED: &str = "cloud_resource_created";

/// Working-map key for the cloud id of a clone's source context.
const SOURCE_CLOUD_ID: &str = "source_cloud_id";

pub(crate) fn register(
    builder: FlightRegistryBuilder,
    services: &Arc<FlightServices>,
) -> FlightRegistryBuilder {
    let create = services.clone();
    let clone = services.clone();
    let delete = services.clone();
    builder
        .register_fn(CONTROLLED_RESOURCE_CREATE, move |input| {
            create_flight(&create, input)
        })
        .register_fn(CONTROLLED_RESOURCE_CLONE, move |input| {
            clone_flight(&clone, input)
        })
        .register_fn(CONTROLLED_RESOURCE_DELETE, move |input| {
            delete_flight(&delete, input)
        })
}

/// Decode the resource under `resource`, checking its type against the
/// capability table before the payload.
fn decode_resource(
    services: &FlightServices,
    input: &FlightMap,
) -> Result<(ControlledResource, CloudPlatform), FlightBuildError> {
    let raw: JsonValue = input.get_required(keys::RESOURCE)?;
    let resource = services
        .capabilities
        .decode(raw)
        .map_err(|e| FlightBuildError::Invalid(e.to_string()))?;
    let workspace_id: WorkspaceId = input.get_required(keys::WORKSPACE_ID)?;
    if resource.workspace_id != workspace_id {
        return Err(FlightBuildError::Invalid(format!(
            "resource {} belongs to workspace {}, not {workspace_id}",
            resource.resource_id, resource.workspace_id
        )));
    }
    let platform = services
        .capabilities
        .cloud_platform(&resource)
        .map_err(|e| FlightBuildError::Invalid(e.to_string()))?;
    Ok((resource, platform))
}

fn create_flight(services: &Arc<FlightServices>, input: &FlightMap) -> Result<Flight, FlightBuildError> {
    let (resource, platform) = decode_resource(services, input)?;
    services
        .capabilities
        .validate(&resource)
        .map_err(|e| FlightBuildError::Invalid(e.to_string()))?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(CONTROLLED_RESOURCE_CREATE);
    flight
        .add_step_with_retry(
            CheckWorkspaceAccessStep {
                services: services.clone(),
                user: user.clone(),
                workspace_id: resource.workspace_id,
                action: IamAction::WRITE,
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            StoreResourceMetadataStep {
                services: services.clone(),
                resource: resource.clone(),
            },
            services.database_retry,
        )
        .add_step_with_retry(
            LoadCloudContextStep {
                services: services.clone(),
                workspace_id: resource.workspace_id,
                platform,
                required: true,
                key: CLOUD_ID,
            },
            services.database_retry,
        )
        .add_step_with_retry(
            CreateResourceIamStep {
                services: services.clone(),
                user,
                resource: resource.clone(),
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            CreateCloudResourceStep {
                services: services.clone(),
                resource,
            },
            services.cloud_retry,
        );
    Ok(flight)
}

/// The resource a clone creates: the source definition moved to the
/// destination workspace under the caller's id, name and cloud name.
fn clone_destination(
    source: &ControlledResource,
    input: &FlightMap,
) -> Result<ControlledResource, FlightBuildError> {
    let workspace_id: WorkspaceId = input.get_required(keys::DESTINATION_WORKSPACE_ID)?;
    let resource_id: ResourceId = input.get_required(keys::DESTINATION_RESOURCE_ID)?;
    if resource_id == source.resource_id {
        return Err(FlightBuildError::Invalid(
            "a clone needs a resource id of its own".to_string(),
        ));
    }
    let name = input
        .get::<String>(keys::DESTINATION_RESOURCE_NAME)?
        .unwrap_or_else(|| source.name.clone());
    let attributes = match input.get::<String>(keys::DESTINATION_CLOUD_NAME)? {
        Some(cloud_name) => source.attributes.clone().with_cloud_name(cloud_name),
        None => source.attributes.clone(),
    };
    Ok(ControlledResource {
        workspace_id,
        resource_id,
        name,
        description: source.description.clone(),
        attributes,
    })
}

/// Input: the source resource under `resource`, its workspace, the
/// destination workspace and resource id, and the cloning instructions.
///
/// The result is the new resource, or `null` for `COPY_NOTHING`.
fn clone_flight(services: &Arc<FlightServices>, input: &FlightMap) -> Result<Flight, FlightBuildError> {
    let (source, platform) = decode_resource(services, input)?;
    let instructions: CloningInstructions = input.get_required(keys::CLONING_INSTRUCTIONS)?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(CONTROLLED_RESOURCE_CLONE);
    match instructions {
        CloningInstructions::CopyNothing => {
            flight.add_step(SkipCloneStep {
                resource_id: source.resource_id,
            });
            return Ok(flight);
        }
        CloningInstructions::CopyReference => {
            return Err(FlightBuildError::Invalid(format!(
                "{instructions} is not supported for controlled resources"
            )));
        }
        CloningInstructions::CopyDefinition | CloningInstructions::CopyResource => {}
    }

    let destination = clone_destination(&source, input)?;
    services
        .capabilities
        .validate(&destination)
        .map_err(|e| FlightBuildError::Invalid(e.to_string()))?;

    flight
        .add_step_with_retry(
            CheckWorkspaceAccessStep {
                services: services.clone(),
                user: user.clone(),
                workspace_id: source.workspace_id,
                action: IamAction::READ,
            },
            services.access_retry,
        )
        .add_step_with_retry(
            CheckWorkspaceAccessStep {
                services: services.clone(),
                user: user.clone(),
                workspace_id: destination.workspace_id,
                action: IamAction::WRITE,
            },
            services.access_retry,
        )
        .add_step_with_retry(
            LoadCloudContextStep {
                services: services.clone(),
                workspace_id: source.workspace_id,
                platform,
                required: true,
                key: SOURCE_CLOUD_ID,
            },
            services.database_retry,
        )
        .add_step_with_retry(
            StoreResourceMetadataStep {
                services: services.clone(),
                resource: destination.clone(),
            },
            services.database_retry,
        )
        .add_step_with_retry(
            LoadCloudContextStep {
                services: services.clone(),
                workspace_id: destination.workspace_id,
                platform,
                required: true,
                key: CLOUD_ID,
            },
            services.database_retry,
        )
        .add_step_with_retry(
            CreateResourceIamStep {
                services: services.clone(),
                user,
                resource: destination.clone(),
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            CreateCloudResourceStep {
                services: services.clone(),
                resource: destination.clone(),
            },
            services.cloud_retry,
        );
    if instructions == CloningInstructions::CopyResource {
        flight.add_step_with_retry(
            CopyResourceDataStep {
                services: services.clone(),
                source,
                destination,
            },
            services.long_running_retry,
        );
    }
    Ok(flight)
}

fn delete_flight(services: &Arc<FlightServices>, input: &FlightMap) -> Result<Flight, FlightBuildError> {
    let (resource, platform) = decode_resource(services, input)?;
    let user: AuthenticatedUserRequest = input.get_required(keys::AUTH_USER_INFO)?;

    let mut flight = Flight::new(CONTROLLED_RESOURCE_DELETE);
    flight
        .add_step_with_retry(
            LoadCloudContextStep {
                services: services.clone(),
                workspace_id: resource.workspace_id,
                platform,
                required: false,
                key: CLOUD_ID,
            },
            services.database_retry,
        )
        .add_step_with_retry(
            DeleteCloudResourceStep {
                services: services.clone(),
                resource: resource.clone(),
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteResourceIamStep {
                services: services.clone(),
                user,
                resource: resource.clone(),
            },
            services.cloud_retry,
        )
        .add_step_with_retry(
            DeleteResourceMetadataStep {
                services: services.clone(),
                resource,
            },
            services.database_retry,
        );
    Ok(flight)
}

fn capability_failure(err: DomainError) -> StepFailure {
    StepFailure::fatal(err.to_string())
}

fn iam_resource(
    services: &FlightServices,
    resource: &ControlledResource,
) -> Result<IamResource, StepFailure> {
    let caps = services
        .capabilities
        .get(resource.resource_type())
        .map_err(capability_failure)?;
    Ok(IamResource::controlled(caps.iam_resource_type, resource.resource_id))
}

async fn delete_iam(
    services: &FlightServices,
    user: &AuthenticatedUserRequest,
    resource: &ControlledResource,
) -> StepResult {
    let iam = iam_resource(services, resource)?;
    match services.authz.delete_resource(user, &iam).await {
        Ok(()) | Err(AuthzError::NotFound(_)) => Ok(()),
        Err(e) => Err(authz_failure(e)),
    }
}

async fn delete_cloud_object(
    services: &FlightServices,
    cloud_id: &str,
    resource: &ControlledResource,
) -> StepResult {
    deleted(
        services
            .cloud
            .delete_resource(
                cloud_id,
                resource.resource_type(),
                resource.attributes.cloud_name(),
            )
            .await,
    )
}

/// Remove a resource from the cloud, IAM and the metadata store.
///
/// Each part converges when already gone, so a workspace or context delete
/// can call this again after a crash.
pub(crate) async fn purge_resource(
    services: &FlightServices,
    user: &AuthenticatedUserRequest,
    resource: &ControlledResource,
) -> StepResult {
    let platform = services
        .capabilities
        .cloud_platform(resource)
        .map_err(capability_failure)?;
    let context = services
        .workspaces
        .get_cloud_context(resource.workspace_id, platform)
        .await
        .map_err(dao_failure)?;
    if let Some(context) = context {
        delete_cloud_object(services, &context.cloud_id, resource).await?;
    }
    delete_iam(services, user, resource).await?;
    services
        .resources
        .delete_resource(resource.workspace_id, resource.resource_id, None)
        .await
        .map_err(dao_failure)?;
    debug!(
        workspace_id = %resource.workspace_id,
        resource_id = %resource.resource_id,
        "controlled resource purged"
    );
    Ok(())
}

struct StoreResourceMetadataStep {
    services: Arc<FlightServices>,
    resource: ControlledResource,
}

#[async_trait]
impl Step for StoreResourceMetadataStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        self.services
            .resources
            .create_resource(&self.resource, ctx.flight_id().as_str())
            .await
            .map_err(dao_failure)
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        let removed = self
            .services
            .resources
            .delete_resource(
                self.resource.workspace_id,
                self.resource.resource_id,
                Some(ctx.flight_id().as_str()),
            )
            .await
            .map_err(dao_failure)?;
        debug!(resource_id = %self.resource.resource_id, removed, "resource metadata undone");
        Ok(())
    }
}

/// Copies the context's project / resource group into the working map
/// under `key`.
struct LoadCloudContextStep {
    services: Arc<FlightServices>,
    workspace_id: WorkspaceId,
    platform: CloudPlatform,
    required: bool,
    key: &'static str,
}

#[async_trait]
impl Step for LoadCloudContextStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let context = self
            .services
            .workspaces
            .get_cloud_context(self.workspace_id, self.platform)
            .await
            .map_err(dao_failure)?;
        match context {
            Some(context) => {
                ctx.working_mut().put(self.key, &context.cloud_id)?;
                Ok(())
            }
            None if self.required => Err(StepFailure::fatal(format!(
                "workspace {} has no {} cloud context",
                self.workspace_id, self.platform
            ))),
            None => Ok(()),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct CreateResourceIamStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    resource: ControlledResource,
}

#[async_trait]
impl Step for CreateResourceIamStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let iam = iam_resource(&self.services, &self.resource)?;
        // The metadata step made this flight the owner of the resource id, and
        // the IAM resource is keyed by that id.
        ctx.working_mut().put(RESOURCE_IAM_CREATED, &true)?;
        match self.services.authz.create_resource(&self.user, &iam).await {
            Ok(()) | Err(AuthzError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(authz_failure(e)),
        }
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if ctx.working().get::<bool>(RESOURCE_IAM_CREATED)? != Some(true) {
            return Ok(());
        }
        delete_iam(&self.services, &self.user, &self.resource).await
    }
}

struct CreateCloudResourceStep {
    services: Arc<FlightServices>,
    resource: ControlledResource,
}

#[async_trait]
impl Step for CreateCloudResourceStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let cloud_id: String = ctx.working().get_required(CLOUD_ID)?;
        let spec = self
            .services
            .capabilities
            .to_wire(&self.resource)
            .map_err(capability_failure)?;
        ensure_cloud_name_free(&self.services, &self.resource).await?;
        ctx.working_mut().put(CLOUD_RESOURCE_CREATED, &true)?;
        created(
            self.services
                .cloud
                .create_resource(
                    &cloud_id,
                    self.resource.resource_type(),
                    self.resource.attributes.cloud_name(),
                    &spec,
                )
                .await,
        )?;
        ctx.working_mut().put(keys::RESPONSE, &self.resource)?;
        info!(
            workspace_id = %self.resource.workspace_id,
            resource_id = %self.resource.resource_id,
            resource_type = %self.resource.resource_type(),
            "controlled resource created"
        );
        Ok(())
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        if ctx.working().get::<bool>(CLOUD_RESOURCE_CREATED)? != Some(true) {
            return Ok(());
        }
        let Some(cloud_id) = ctx.working().get::<String>(CLOUD_ID)? else {
            return Ok(());
        };
        delete_cloud_object(&self.services, &cloud_id, &self.resource).await
    }
}

/// Fail when another resource in the workspace already uses the cloud name.
///
/// Cloud objects are addressed by name inside the workspace's project, so
/// after this check an existing object of that name was made by this flight.
async fn ensure_cloud_name_free(
    services: &FlightServices,
    resource: &ControlledResource,
) -> StepResult {
    let siblings = services
        .resources
        .list_resources(resource.workspace_id)
        .await
        .map_err(dao_failure)?;
    let taken = siblings.iter().any(|other| {
        other.resource_id != resource.resource_id
            && other.resource_type() == resource.resource_type()
            && other.attributes.cloud_name() == resource.attributes.cloud_name()
    });
    if taken {
        return Err(StepFailure::fatal(format!(
            "{} '{}' is already used by another resource in workspace {}",
            resource.resource_type(),
            resource.attributes.cloud_name(),
            resource.workspace_id
        )));
    }
    Ok(())
}

/// Copies the source's data into the freshly created clone.
///
/// Undo has nothing to do: removing the clone's cloud object removes the data.
struct CopyResourceDataStep {
    services: Arc<FlightServices>,
    source: ControlledResource,
    destination: ControlledResource,
}

#[async_trait]
impl Step for CopyResourceDataStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let source_cloud_id: String = ctx.working().get_required(SOURCE_CLOUD_ID)?;
        let destination_cloud_id: String = ctx.working().get_required(CLOUD_ID)?;
        finished(
            self.services
                .cloud
                .copy_resource(
                    self.source.resource_type(),
                    CloudObject {
                        cloud_id: &source_cloud_id,
                        name: self.source.attributes.cloud_name(),
                    },
                    CloudObject {
                        cloud_id: &destination_cloud_id,
                        name: self.destination.attributes.cloud_name(),
                    },
                )
                .await,
        )?;
        info!(
            source_resource_id = %self.source.resource_id,
            resource_id = %self.destination.resource_id,
            "controlled resource data copied"
        );
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

/// `COPY_NOTHING`: the clone succeeds without creating anything.
struct SkipCloneStep {
    resource_id: ResourceId,
}

#[async_trait]
impl Step for SkipCloneStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        debug!(resource_id = %self.resource_id, "resource skipped by clone");
        ctx.working_mut()
            .put(keys::RESPONSE, &Option::<ControlledResource>::None)?;
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Ok(())
    }
}

struct DeleteCloudResourceStep {
    services: Arc<FlightServices>,
    resource: ControlledResource,
}

#[async_trait]
impl Step for DeleteCloudResourceStep {
    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        // No context means the cloud side went with it.
        let Some(cloud_id) = ctx.working().get::<String>(CLOUD_ID)? else {
            return Ok(());
        };
        delete_cloud_object(&self.services, &cloud_id, &self.resource).await
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("cloud resource"))
    }
}

struct DeleteResourceIamStep {
    services: Arc<FlightServices>,
    user: AuthenticatedUserRequest,
    resource: ControlledResource,
}

#[async_trait]
impl Step for DeleteResourceIamStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        delete_iam(&self.services, &self.user, &self.resource).await
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("resource authorization"))
    }
}

struct DeleteResourceMetadataStep {
    services: Arc<FlightServices>,
    resource: ControlledResource,
}

#[async_trait]
impl Step for DeleteResourceMetadataStep {
    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        self.services
            .resources
            .delete_resource(self.resource.workspace_id, self.resource.resource_id, None)
            .await
            .map_err(dao_failure)?;
        Ok(())
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        Err(cannot_undo("resource metadata"))
    }
}
