//! Built-in workspace-manager flights.
//!
//! Each flight kind has a factory that decodes the job input once, up front,
//! and hands the decoded values to its steps. Steps reach external systems
//! only through [`FlightServices`].

pub mod cloud_context;
pub mod controlled_resource;
pub mod workspace;

use std::sync::Arc;

use wsm_auth::{AuthorizationService, AuthzError};
use wsm_core::ResourceCapabilityTable;
use wsm_flight::{FlightKind, FlightRegistryBuilder, RetryRule, StepFailure};

use crate::cloud::CloudService;
use crate::dao::{DaoError, ResourceDao, WorkspaceDao};

pub const WORKSPACE_CREATE: FlightKind = FlightKind::from_static("workspace.create");
pub const WORKSPACE_DELETE: FlightKind = FlightKind::from_static("workspace.delete");
pub const GCP_CONTEXT_CREATE: FlightKind = FlightKind::from_static("cloud_context.gcp.create");
pub const GCP_CONTEXT_DELETE: FlightKind = FlightKind::from_static("cloud_context.gcp.delete");
pub const AZURE_CONTEXT_CREATE: FlightKind = FlightKind::from_static("cloud_context.azure.create");
pub const AZURE_CONTEXT_DELETE: FlightKind = FlightKind::from_static("cloud_context.azure.delete");
pub const CONTROLLED_RESOURCE_CREATE: FlightKind =
    FlightKind::from_static("controlled_resource.create");
pub const CONTROLLED_RESOURCE_DELETE: FlightKind =
    FlightKind::from_static("controlled_resource.delete");
pub const CONTROLLED_RESOURCE_CLONE: FlightKind =
    FlightKind::from_static("controlled_resource.clone");

/// Working-map key for the project id / resource group of a cloud context.
pub const CLOUD_ID: &str = "cloud_id";

/// Collaborators shared by every built-in step.
#[derive(Clone)]
pub struct FlightServices {
    pub workspaces: Arc<dyn WorkspaceDao>,
    pub resources: Arc<dyn ResourceDao>,
    pub cloud: Arc<dyn CloudService>,
    pub authz: Arc<dyn AuthorizationService>,
    pub capabilities: Arc<ResourceCapabilityTable>,
    /// Rule for cloud and IAM calls.
    pub cloud_retry: RetryRule,
    /// Rule for metadata writes.
    pub database_retry: RetryRule,
    /// Rule for permission checks that should answer within seconds.
    pub access_retry: RetryRule,
    /// Rule for cloud calls that may take minutes, such as data copies.
    pub long_running_retry: RetryRule,
}

impl FlightServices {
    pub fn new(
        workspaces: Arc<dyn WorkspaceDao>,
        resources: Arc<dyn ResourceDao>,
        cloud: Arc<dyn CloudService>,
        authz: Arc<dyn AuthorizationService>,
        capabilities: Arc<ResourceCapabilityTable>,
    ) -> Self {
        Self {
            workspaces,
            resources,
            cloud,
            authz,
            capabilities,
            cloud_retry: RetryRule::cloud(),
            database_retry: RetryRule::short_database(),
            access_retry: RetryRule::short_exponential(),
            long_running_retry: RetryRule::cloud_long_running(),
        }
    }

    /// Override both retry rules (tests use short intervals).
    pub fn with_retry(mut self, cloud: RetryRule, database: RetryRule) -> Self {
        self.cloud_retry = cloud;
        self.database_retry = database;
        self
    }

    /// Override the permission-check and long-running rules.
    pub fn with_clone_retry(mut self, access: RetryRule, long_running: RetryRule) -> Self {
        self.access_retry = access;
        self.long_running_retry = long_running;
        self
    }
}

impl core::fmt::Debug for FlightServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlightServices")
            .field("cloud_retry", &self.cloud_retry)
            .field("database_retry", &self.database_retry)
            .field("access_retry", &self.access_retry)
            .field("long_running_retry", &self.long_running_retry)
            .finish_non_exhaustive()
    }
}

/// Register every built-in flight kind.
pub fn register_flights(
    builder: FlightRegistryBuilder,
    services: Arc<FlightServices>,
) -> FlightRegistryBuilder {
    let builder = workspace::register(builder, &services);
    let builder = cloud_context::register(builder, &services);
    controlled_resource::register(builder, &services)
}

/// Metadata store failures: only backend errors are worth retrying.
pub(crate) fn dao_failure(err: DaoError) -> StepFailure {
    match err {
        DaoError::Backend(_) => StepFailure::retry(err.to_string()),
        other => StepFailure::fatal(other.to_string()),
    }
}

pub(crate) fn authz_failure(err: AuthzError) -> StepFailure {
    if err.is_retryable() {
        StepFailure::retry(err.to_string())
    } else {
        StepFailure::fatal(err.to_string())
    }
}

/// Undo of an irreversible delete.
pub(crate) fn cannot_undo(what: &str) -> StepFailure {
    StepFailure::fatal(format!("cannot undo delete of {what}"))
}
