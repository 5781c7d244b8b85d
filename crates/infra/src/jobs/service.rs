//! Job service: an async job API over the flight executor.

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use wsm_auth::AuthenticatedUserRequest;
use wsm_flight::{FlightId, FlightKind, FlightMap, FlightRecord, FlightStatus};

use super::keys;
use super::types::{AsyncJobResult, ErrorReport, JobConfig, JobError, JobReport, NewJob};
use crate::executor::FlightExecutor;

/// Launches flights as jobs and reports their results.
///
/// The job id is the flight id, so resubmitting a job id is answered from the
/// existing flight instead of starting a new one. Only the original submitter
/// may resubmit, and only as the same kind of job.
#[derive(Debug, Clone)]
pub struct JobService {
    executor: FlightExecutor,
    config: JobConfig,
}

impl JobService {
    pub fn new(executor: FlightExecutor, config: JobConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &FlightExecutor {
        &self.executor
    }

    /// Validate a job description and prepare it for submission.
    pub fn new_job(&self, new_job: NewJob) -> Result<Job, JobError> {
        new_job.validate()?;
        if !self.executor.registry().contains(&new_job.kind) {
            return Err(JobError::Invalid(format!("unknown job kind '{}'", new_job.kind)));
        }
        let job_id = new_job.job_id.clone().unwrap_or_else(FlightId::generate);
        let kind = new_job.kind.clone();
        let user = new_job.user.clone();
        let input = new_job.into_input()?;
        Ok(Job {
            service: self.clone(),
            job_id,
            kind,
            user,
            input,
        })
    }

    /// Report and, once finished, the result or error of a job.
    ///
    /// Only the submitter may read a job.
    pub async fn retrieve_async_job_result<T: DeserializeOwned>(
        &self,
        job_id: &FlightId,
        user: &AuthenticatedUserRequest,
    ) -> Result<AsyncJobResult<T>, JobError> {
        let record = self.executor.get_flight(job_id).await?;
        verify_access(&record, user)?;

        let job_report = JobReport::from_record(&record);
        let (result, error) = match record.status {
            FlightStatus::Success => (Some(decode_output(&record.flight_id, record.output)?), None),
            FlightStatus::Error | FlightStatus::Fatal => {
                (None, record.error.as_ref().map(ErrorReport::from))
            }
            FlightStatus::Created | FlightStatus::Running => (None, None),
        };
        Ok(AsyncJobResult {
            job_report,
            result,
            error,
        })
    }

    /// Report of a job without its result.
    pub async fn retrieve_job(
        &self,
        job_id: &FlightId,
        user: &AuthenticatedUserRequest,
    ) -> Result<JobReport, JobError> {
        let record = self.executor.get_flight(job_id).await?;
        verify_access(&record, user)?;
        Ok(JobReport::from_record(&record))
    }

    /// Wait for a job and return its typed result, or its failure.
    ///
    /// Only the submitter may wait on a job.
    pub async fn wait_for_job<T: DeserializeOwned>(
        &self,
        job_id: &FlightId,
        user: &AuthenticatedUserRequest,
    ) -> Result<T, JobError> {
        let record = self.executor.get_flight(job_id).await?;
        verify_access(&record, user)?;

        let outcome = self
            .executor
            .wait_for_flight(job_id, Some(self.config.timeout))
            .await?;
        match (outcome.status, outcome.error) {
            (FlightStatus::Success, _) => decode_output(&outcome.flight_id, outcome.output),
            (_, Some(error)) => Err(JobError::Failed {
                job_id: outcome.flight_id,
                error,
            }),
            (status, None) => Err(JobError::ResultDecode {
                job_id: outcome.flight_id,
                message: format!("job ended {status} without an error"),
            }),
        }
    }
}

fn verify_access(record: &FlightRecord, user: &AuthenticatedUserRequest) -> Result<(), JobError> {
    let owner: Option<AuthenticatedUserRequest> = record.input.get(keys::AUTH_USER_INFO)?;
    let allowed = match owner {
        None => true,
        Some(owner) => match (&owner.subject_id, &user.subject_id) {
            (Some(a), Some(b)) => a == b,
            _ => owner.email == user.email,
        },
    };
    if allowed {
        Ok(())
    } else {
        Err(JobError::Forbidden(record.flight_id.clone()))
    }
}

/// A missing output decodes as JSON `null`, which suits `()` and `Option<_>`.
fn decode_output<T: DeserializeOwned>(
    job_id: &FlightId,
    output: Option<JsonValue>,
) -> Result<T, JobError> {
    serde_json::from_value(output.unwrap_or(JsonValue::Null)).map_err(|e| JobError::ResultDecode {
        job_id: job_id.clone(),
        message: e.to_string(),
    })
}

/// A validated job ready to be submitted.
#[derive(Debug, Clone)]
pub struct Job {
    service: JobService,
    job_id: FlightId,
    kind: FlightKind,
    user: AuthenticatedUserRequest,
    input: FlightMap,
}

impl Job {
    pub fn job_id(&self) -> &FlightId {
        &self.job_id
    }

    pub fn kind(&self) -> &FlightKind {
        &self.kind
    }

    pub fn input(&self) -> &FlightMap {
        &self.input
    }

    /// Submit the job and return its id without waiting.
    ///
    /// Submitting an id that already exists returns the id and does not
    /// start a second flight. It fails with [`JobError::Invalid`] when the
    /// existing job is of another kind and with [`JobError::Forbidden`] when
    /// another user submitted it.
    pub async fn submit(&self) -> Result<FlightId, JobError> {
        let executor = &self.service.executor;
        let job_id = executor
            .submit(self.job_id.clone(), self.kind.clone(), self.input.clone())
            .await?;
        let record = executor.get_flight(&job_id).await?;
        verify_access(&record, &self.user)?;
        info!(job_id = %job_id, flight_kind = %self.kind, "job submitted");
        Ok(job_id)
    }

    /// Submit the job and wait for its typed result.
    pub async fn submit_and_wait<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        let job_id = self.submit().await?;
        debug!(job_id = %job_id, "waiting for job");
        self.service.wait_for_job(&job_id, &self.user).await
    }
}
