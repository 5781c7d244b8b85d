//! Durable flight state.
//!
//! A [`FlightRecord`] is the single source of truth for a flight's progress.
//! The executor mutates it only through the transition methods below and
//! persists it after every step outcome, so a restarted process can resume at
//! exactly the last recorded step boundary.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::flight::{FlightId, FlightKind};
use crate::map::FlightMap;
use crate::step::StepError;

/// Working-map key whose value becomes the flight's output on success.
pub const RESPONSE_KEY: &str = "response";

/// Overall flight status.
///
/// ```text
/// CREATED -> RUNNING(forward) -> SUCCESS
///                             -> RUNNING(undo) -> ERROR | FATAL
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Created,
    Running,
    /// All steps completed forward.
    Success,
    /// A step failed and every undo succeeded.
    Error,
    /// An undo failed; external state may be partially applied.
    Fatal,
}

impl FlightStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlightStatus::Success | FlightStatus::Error | FlightStatus::Fatal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Created => "CREATED",
            FlightStatus::Running => "RUNNING",
            FlightStatus::Success => "SUCCESS",
            FlightStatus::Error => "ERROR",
            FlightStatus::Fatal => "FATAL",
        }
    }
}

impl core::fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(FlightStatus::Created),
            "RUNNING" => Ok(FlightStatus::Running),
            "SUCCESS" => Ok(FlightStatus::Success),
            "ERROR" => Ok(FlightStatus::Error),
            "FATAL" => Ok(FlightStatus::Fatal),
            other => Err(format!("unknown flight status '{other}'")),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Undo,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Forward action not recorded as done.
    Pending,
    Done,
    /// Forward action failed for good.
    Failed,
    Undone,
    UndoFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub state: StepState,
    /// Attempts of the most recent action (forward or undo) on this step.
    pub attempts: u32,
    pub last_error: Option<StepError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoFailure {
    pub step: usize,
    pub cause: StepError,
}

/// Structured error of a failed flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightError {
    /// Index of the step whose forward action failed.
    pub failed_step: usize,
    pub cause: StepError,
    /// Present when the flight ended `FATAL`.
    pub undo_failure: Option<UndoFailure>,
}

impl core::fmt::Display for FlightError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "step {} failed: {}", self.failed_step, self.cause)?;
        if let Some(undo) = &self.undo_failure {
            write!(f, "; undo of step {} failed: {}", undo.step, undo.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for FlightError {}

/// Persisted snapshot of a flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    pub flight_id: FlightId,
    pub kind: FlightKind,
    pub input: FlightMap,
    pub working: FlightMap,
    pub status: FlightStatus,
    pub direction: Direction,
    /// Forward: next step to run. Undo: next step to undo.
    pub cursor: usize,
    pub steps: Vec<StepRecord>,
    pub output: Option<JsonValue>,
    pub error: Option<FlightError>,
    /// Whether completion hooks have observed the terminal state.
    pub hooks_completed: bool,
    /// Number of updates since creation. A store accepts an update only when it
    /// carries exactly the next version.
    #[serde(default)]
    pub version: u64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlightRecord {
    pub fn new(flight_id: FlightId, kind: FlightKind, input: FlightMap, step_names: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            flight_id,
            kind,
            input,
            working: FlightMap::new(),
            status: FlightStatus::Created,
            direction: Direction::Forward,
            cursor: 0,
            steps: step_names
                .into_iter()
                .map(|name| StepRecord {
                    name,
                    state: StepState::Pending,
                    attempts: 0,
                    last_error: None,
                })
                .collect(),
            output: None,
            error: None,
            hooks_completed: false,
            version: 0,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Non-terminal, or terminal with hooks still to run.
    pub fn needs_attention(&self) -> bool {
        !self.is_terminal() || !self.hooks_completed
    }

    pub fn mark_running(&mut self) {
        if self.status == FlightStatus::Created {
            self.status = FlightStatus::Running;
            self.touch();
        }
    }

    /// Record the result of one attempt of the current action on `index`.
    pub fn record_attempt(&mut self, index: usize, attempt: u32, error: Option<StepError>) {
        if let Some(step) = self.steps.get_mut(index) {
            step.attempts = attempt;
            step.last_error = error;
        }
        self.touch();
    }

    pub fn step_succeeded(&mut self, index: usize, working: FlightMap) {
        self.set_state(index, StepState::Done);
        self.working = working;
        self.cursor = index + 1;
        self.touch();
    }

    /// Switch to undo, starting with the failing step itself.
    pub fn begin_undo(&mut self, index: usize, cause: StepError, working: FlightMap) {
        self.set_state(index, StepState::Failed);
        self.working = working;
        self.direction = Direction::Undo;
        self.cursor = index;
        self.error = Some(FlightError {
            failed_step: index,
            cause,
            undo_failure: None,
        });
        self.touch();
    }

    pub fn step_undone(&mut self, index: usize, working: FlightMap) {
        self.set_state(index, StepState::Undone);
        self.working = working;
        if index == 0 {
            self.finish(FlightStatus::Error);
        } else {
            self.cursor = index - 1;
            self.touch();
        }
    }

    pub fn undo_failed(&mut self, index: usize, cause: StepError, working: FlightMap) {
        self.set_state(index, StepState::UndoFailed);
        self.working = working;
        let failure = UndoFailure { step: index, cause };
        match &mut self.error {
            Some(err) => err.undo_failure = Some(failure),
            None => {
                self.error = Some(FlightError {
                    failed_step: index,
                    cause: failure.cause.clone(),
                    undo_failure: Some(failure),
                })
            }
        }
        self.finish(FlightStatus::Fatal);
    }

    /// All steps ran forward; the output is the working map's response value.
    pub fn complete(&mut self) {
        self.output = self.working.get_raw(RESPONSE_KEY).cloned();
        self.finish(FlightStatus::Success);
    }

    /// The flight cannot be driven at all (e.g. its kind is no longer
    /// registered). No undo is possible without the step list.
    pub fn abandon(&mut self, cause: StepError) {
        self.error = Some(FlightError {
            failed_step: self.cursor,
            cause: cause.clone(),
            undo_failure: Some(UndoFailure {
                step: self.cursor,
                cause,
            }),
        });
        self.finish(FlightStatus::Fatal);
    }

    pub fn mark_hooks_completed(&mut self) {
        self.hooks_completed = true;
        self.touch();
    }

    fn finish(&mut self, status: FlightStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    fn set_state(&mut self, index: usize, state: StepState) {
        if let Some(step) = self.steps.get_mut(index) {
            step.state = state;
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(steps: usize) -> FlightRecord {
        FlightRecord::new(
            FlightId::new("f-1"),
            FlightKind::from_static("demo"),
            FlightMap::new(),
            (0..steps).map(|i| format!("step-{i}")).collect(),
        )
    }

    #[test]
    fn forward_success_lifecycle() {
        let mut r = record(2);
        assert_eq!(r.status, FlightStatus::Created);
        assert!(r.needs_attention());

        r.mark_running();
        r.step_succeeded(0, FlightMap::new());
        let working = FlightMap::new().with(RESPONSE_KEY, "done").unwrap();
        r.step_succeeded(1, working);
        r.complete();

        assert_eq!(r.status, FlightStatus::Success);
        assert_eq!(r.output, Some(JsonValue::String("done".to_string())));
        assert!(r.completed_at.is_some());
        assert!(r.needs_attention());

        r.mark_hooks_completed();
        assert!(!r.needs_attention());
    }

    #[test]
    fn undo_walks_back_to_error() {
        let mut r = record(3);
        r.mark_running();
        r.step_succeeded(0, FlightMap::new());
        r.step_succeeded(1, FlightMap::new());
        r.begin_undo(2, StepError::new("boom"), FlightMap::new());
        assert_eq!((r.direction, r.cursor), (Direction::Undo, 2));

        r.step_undone(2, FlightMap::new());
        r.step_undone(1, FlightMap::new());
        assert_eq!(r.status, FlightStatus::Running);
        r.step_undone(0, FlightMap::new());

        assert_eq!(r.status, FlightStatus::Error);
        let err = r.error.unwrap();
        assert_eq!(err.failed_step, 2);
        assert!(err.undo_failure.is_none());
    }

    #[test]
    fn undo_failure_is_fatal_and_keeps_both_causes() {
        let mut r = record(2);
        r.mark_running();
        r.step_succeeded(0, FlightMap::new());
        r.begin_undo(1, StepError::new("create failed"), FlightMap::new());
        r.step_undone(1, FlightMap::new());
        r.undo_failed(0, StepError::new("cannot undo"), FlightMap::new());

        assert_eq!(r.status, FlightStatus::Fatal);
        assert_eq!(r.steps[0].state, StepState::UndoFailed);
        let rendered = r.error.unwrap().to_string();
        assert!(rendered.contains("create failed"));
        assert!(rendered.contains("cannot undo"));
    }
}
