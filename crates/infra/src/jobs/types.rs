//! Caller-facing job types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use wsm_auth::AuthenticatedUserRequest;
use wsm_core::{OperationType, WorkspaceId};
use wsm_flight::{
    FlightError, FlightId, FlightKind, FlightMap, FlightMapError, FlightRecord, FlightStatus,
};

use super::keys;
use crate::executor::ExecutorError;

/// Job service configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// How long `submit_and_wait` waits before giving up.
    pub timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Everything needed to launch a job.
///
/// Built with [`NewJob::new`] plus the `with_*` methods, then validated by
/// `JobService::new_job`.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Idempotency key; generated when absent.
    pub job_id: Option<FlightId>,
    pub kind: FlightKind,
    pub description: String,
    pub user: AuthenticatedUserRequest,
    /// Required for the job to appear in the activity log.
    pub operation_type: Option<OperationType>,
    pub workspace_id: Option<WorkspaceId>,
    pub request: Option<JsonValue>,
    /// Flight-specific input parameters.
    pub parameters: FlightMap,
}

impl NewJob {
    pub fn new(
        kind: FlightKind,
        description: impl Into<String>,
        user: AuthenticatedUserRequest,
    ) -> Self {
        Self {
            job_id: None,
            kind,
            description: description.into(),
            user,
            operation_type: None,
            workspace_id: None,
            request: None,
            parameters: FlightMap::new(),
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<FlightId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = Some(operation_type);
        self
    }

    pub fn with_workspace_id(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_request<T: Serialize>(mut self, request: &T) -> Result<Self, JobError> {
        let value = serde_json::to_value(request).map_err(|e| {
            JobError::Input(FlightMapError::Serde {
                key: keys::REQUEST.to_string(),
                message: e.to_string(),
            })
        })?;
        self.request = Some(value);
        Ok(self)
    }

    pub fn with_parameter<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self, JobError> {
        self.parameters.put(key, value)?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), JobError> {
        if self.description.trim().is_empty() {
            return Err(JobError::Invalid("job description must not be empty".to_string()));
        }
        if self.job_id.as_ref().is_some_and(|id| id.as_str().trim().is_empty()) {
            return Err(JobError::Invalid("job id must not be blank".to_string()));
        }
        if self.operation_type.is_some() && self.workspace_id.is_none() {
            return Err(JobError::Invalid(
                "jobs with an operation type must name a workspace".to_string(),
            ));
        }
        Ok(())
    }

    /// Flight input map: parameters plus the well-known job keys.
    pub(crate) fn into_input(self) -> Result<FlightMap, JobError> {
        let mut input = self.parameters;
        input.put(keys::DESCRIPTION, &self.description)?;
        input.put(keys::AUTH_USER_INFO, &self.user)?;
        if let Some(operation_type) = self.operation_type {
            input.put(keys::OPERATION_TYPE, &operation_type)?;
        }
        if let Some(workspace_id) = self.workspace_id {
            input.put(keys::WORKSPACE_ID, &workspace_id)?;
        }
        if let Some(request) = self.request {
            input.put(keys::REQUEST, &request)?;
        }
        Ok(input)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

impl From<FlightStatus> for JobStatus {
    fn from(status: FlightStatus) -> Self {
        match status {
            FlightStatus::Created | FlightStatus::Running => JobStatus::Running,
            FlightStatus::Success => JobStatus::Succeeded,
            FlightStatus::Error | FlightStatus::Fatal => JobStatus::Failed,
        }
    }
}

/// Progress of a job as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub id: FlightId,
    pub description: String,
    pub status: JobStatus,
    /// HTTP-style status: 202 while running, 200 on success, 500 on failure.
    pub status_code: u16,
    pub submitted: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl JobReport {
    pub(crate) fn from_record(record: &FlightRecord) -> Self {
        let status = JobStatus::from(record.status);
        let status_code = match status {
            JobStatus::Running => 202,
            JobStatus::Succeeded => 200,
            JobStatus::Failed => 500,
        };
        Self {
            id: record.flight_id.clone(),
            description: record
                .input
                .get::<String>(keys::DESCRIPTION)
                .ok()
                .flatten()
                .unwrap_or_default(),
            status,
            status_code,
            submitted: record.submitted_at,
            completed: record.completed_at,
        }
    }
}

/// Structured failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    pub status_code: u16,
    pub causes: Vec<String>,
}

impl From<&FlightError> for ErrorReport {
    fn from(error: &FlightError) -> Self {
        let mut causes = Vec::new();
        if let Some(undo) = &error.undo_failure {
            causes.push(format!("undo of step {} failed: {}", undo.step, undo.cause));
        }
        Self {
            message: error.cause.message.clone(),
            status_code: 500,
            causes,
        }
    }
}

/// Job report plus either the typed result or the error report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncJobResult<T> {
    pub job_report: JobReport,
    pub result: Option<T>,
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(FlightId),

    #[error("caller may not access job {0}")]
    Forbidden(FlightId),

    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("invalid job input: {0}")]
    Input(#[from] FlightMapError),

    /// The job ran and failed; the flight error is attached.
    #[error("job {job_id} failed: {error}")]
    Failed { job_id: FlightId, error: FlightError },

    #[error("job {job_id} result could not be decoded: {message}")]
    ResultDecode { job_id: FlightId, message: String },

    #[error("timed out waiting for job {0}")]
    Timeout(FlightId),

    #[error(transparent)]
    Executor(ExecutorError),
}

impl From<ExecutorError> for JobError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::NotFound(id) => JobError::NotFound(id),
            ExecutorError::Timeout(id) => JobError::Timeout(id),
            ExecutorError::Build(e) => JobError::Invalid(e.to_string()),
            e @ ExecutorError::KindMismatch { .. } => JobError::Invalid(e.to_string()),
            other => JobError::Executor(other),
        }
    }
}
