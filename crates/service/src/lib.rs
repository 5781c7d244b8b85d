//! Workspace-manager control plane wiring.
//!
//! Builds the flight store, collaborators, flight registry, executor and job
//! service from a [`ServiceConfig`], then resumes interrupted flights.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use wsm_auth::{AuthorizationService, InMemoryAuthorizationService};
use wsm_core::ResourceCapabilityTable;
use wsm_flight::{FlightHook, FlightRegistry};
use wsm_infra::cloud::{CloudService, InMemoryCloudService};
use wsm_infra::dao::{
    ActivityLogDao, InMemoryActivityLogDao, InMemoryResourceDao, InMemoryWorkspaceDao, ResourceDao,
    WorkspaceDao,
};
use wsm_infra::{
    ActivityLogHook, FlightExecutor, FlightServices, FlightStore, InMemoryFlightStore, JobService,
    PostgresFlightStore, ServiceConfig, register_flights,
};

/// Running control plane.
#[derive(Clone)]
pub struct WorkspaceManager {
    pub jobs: JobService,
    pub workspaces: Arc<dyn WorkspaceDao>,
    pub resources: Arc<dyn ResourceDao>,
    pub activity: Arc<dyn ActivityLogDao>,
}

impl WorkspaceManager {
    pub fn executor(&self) -> &FlightExecutor {
        self.jobs.executor()
    }
}

async fn flight_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn FlightStore>> {
    match &config.database_url {
        Some(url) => {
            // connect() applies the schema.
            let store = PostgresFlightStore::connect(url)
                .await
                .context("connecting to the flight database")?;
            info!("using Postgres flight store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; flights are kept in memory and lost on restart");
            Ok(Arc::new(InMemoryFlightStore::new()))
        }
    }
}

/// Build every component and resume flights left by a previous process.
pub async fn build(config: &ServiceConfig) -> anyhow::Result<WorkspaceManager> {
    let store = flight_store(config).await?;

    let workspaces: Arc<dyn WorkspaceDao> = Arc::new(InMemoryWorkspaceDao::new());
    let resources: Arc<dyn ResourceDao> = Arc::new(InMemoryResourceDao::new());
    let activity: Arc<dyn ActivityLogDao> = Arc::new(InMemoryActivityLogDao::new());
    let cloud: Arc<dyn CloudService> = Arc::new(InMemoryCloudService::new());
    let authz: Arc<dyn AuthorizationService> = Arc::new(InMemoryAuthorizationService::new());

    let services = FlightServices::new(
        workspaces.clone(),
        resources.clone(),
        cloud,
        authz,
        Arc::new(ResourceCapabilityTable::standard()),
    );
    let registry = register_flights(FlightRegistry::builder(), Arc::new(services))
        .build()
        .context("registering built-in flights")?;

    let hooks: Vec<Arc<dyn FlightHook>> = vec![Arc::new(ActivityLogHook::new(
        activity.clone(),
        workspaces.clone(),
        resources.clone(),
    ))];
    let executor = FlightExecutor::new(store, Arc::new(registry), hooks, config.executor_config());

    let resumed = executor
        .recover()
        .await
        .context("recovering unfinished flights")?;
    info!(
        resumed,
        max_concurrent_flights = config.max_concurrent_flights,
        "workspace manager ready"
    );

    Ok(WorkspaceManager {
        jobs: JobService::new(executor, config.job_config()),
        workspaces,
        resources,
        activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use wsm_auth::AuthenticatedUserRequest;
    use wsm_core::{OperationType, Workspace, WorkspaceId};
    use wsm_infra::NewJob;
    use wsm_infra::flights::WORKSPACE_CREATE;

    #[tokio::test]
    async fn in_memory_manager_runs_jobs() {
        let manager = build(&ServiceConfig::default()).await.unwrap();
        let user = AuthenticatedUserRequest::new("alice@example.com", "token");
        let workspace = Workspace::new(WorkspaceId::new(), "wired-up");

        let created: WorkspaceId = manager
            .jobs
            .new_job(
                NewJob::new(WORKSPACE_CREATE, "create workspace", user)
                    .with_workspace_id(workspace.id)
                    .with_operation_type(OperationType::Create)
                    .with_request(&workspace)
                    .unwrap(),
            )
            .unwrap()
            .submit_and_wait()
            .await
            .unwrap();

        assert_eq!(created, workspace.id);
        assert_eq!(
            manager.workspaces.get_workspace(workspace.id).await.unwrap(),
            Some(workspace.clone())
        );
        let log = manager.activity.list_activity(workspace.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, OperationType::Create);
    }

    #[test]
    fn every_built_in_kind_is_registered() {
        let services = FlightServices::new(
            Arc::new(InMemoryWorkspaceDao::new()),
            Arc::new(InMemoryResourceDao::new()),
            Arc::new(InMemoryCloudService::new()),
            Arc::new(InMemoryAuthorizationService::new()),
            Arc::new(ResourceCapabilityTable::standard()),
        );
        let registry = register_flights(FlightRegistry::builder(), Arc::new(services))
            .build()
            .unwrap();
        assert_eq!(registry.kinds().count(), 9);
    }
}
