//! Step contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::FlightContext;
use crate::map::FlightMapError;

/// Structured cause of a step failure, persisted with the flight record.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A failed step attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// Transient; the executor retries according to the step's rule.
    #[error("retryable failure: {0}")]
    Retry(StepError),

    /// Stops forward progress and starts undo.
    #[error("fatal failure: {0}")]
    Fatal(StepError),
}

impl StepFailure {
    pub fn retry(message: impl Into<String>) -> Self {
        Self::Retry(StepError::new(message))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(StepError::new(message))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepFailure::Retry(_))
    }

    pub fn error(&self) -> &StepError {
        match self {
            StepFailure::Retry(e) | StepFailure::Fatal(e) => e,
        }
    }

    pub fn into_error(self) -> StepError {
        match self {
            StepFailure::Retry(e) | StepFailure::Fatal(e) => e,
        }
    }
}

/// Malformed flight maps cannot be fixed by retrying.
impl From<FlightMapError> for StepFailure {
    fn from(value: FlightMapError) -> Self {
        StepFailure::Fatal(StepError::new(value.to_string()))
    }
}

/// Outcome of a step's forward or undo action.
pub type StepResult = Result<(), StepFailure>;

/// A unit of work with a compensating action.
///
/// Both actions may run more than once (retries, or re-execution after a crash
/// before the outcome was recorded), so implementations must converge: an
/// "already exists" response on create and a "not found" response on delete
/// are successes. `undo_step` must be safe when `do_step` never ran or only
/// partially ran.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name recorded in the flight record and logs.
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult;

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::flight::{FlightId, FlightKind};
    use crate::map::FlightMap;

    struct NoopStep;

    #[async_trait]
    impl Step for NoopStep {
        async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
            Ok(())
        }

        async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
            Ok(())
        }
    }

    #[test]
    fn default_name_is_the_type_name() {
        assert_eq!(NoopStep.name(), "NoopStep");
    }

    struct MarkStep;

    #[async_trait]
    impl Step for MarkStep {
        async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
            ctx.working_mut().put("marked", &true)?;
            Ok(())
        }

        async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
            ctx.working_mut().remove("marked");
            Ok(())
        }
    }

    #[tokio::test]
    async fn steps_share_state_through_the_working_map() {
        let mut ctx = FlightContext::new(
            FlightId::new("f-1"),
            FlightKind::from_static("test.mark"),
            FlightMap::new(),
            FlightMap::new(),
        );

        MarkStep.do_step(&mut ctx).await.unwrap();
        assert_eq!(ctx.working().get::<bool>("marked").unwrap(), Some(true));

        MarkStep.undo_step(&mut ctx).await.unwrap();
        MarkStep.undo_step(&mut ctx).await.unwrap();
        assert!(!ctx.working().contains_key("marked"));
    }

    #[test]
    fn map_errors_are_fatal() {
        let failure: StepFailure = FlightMapError::Missing("workspace_id".to_string()).into();
        assert!(!failure.is_retryable());
        assert!(failure.error().message.contains("workspace_id"));
    }
}
