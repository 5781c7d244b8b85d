//! Flight definitions and their factories.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::map::{FlightMap, FlightMapError};
use crate::retry::RetryRule;
use crate::step::Step;

/// Unique flight identifier; doubles as the job idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightId(String);

impl FlightId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh time-ordered id for callers that do not supply one.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for FlightId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlightId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FlightId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stable flight type identifier (e.g. "workspace.delete").
///
/// Persisted in the flight record and used to rebuild the step list after a
/// restart, so values must never be renamed once flights of that kind exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightKind(Cow<'static, str>);

impl FlightKind {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for FlightKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlightBuildError {
    #[error("invalid flight input: {0}")]
    Input(#[from] FlightMapError),

    #[error("invalid flight input: {0}")]
    Invalid(String),

    #[error("unknown flight kind: {0}")]
    UnknownKind(FlightKind),

    #[error("flight kind registered twice: {0}")]
    DuplicateKind(FlightKind),
}

/// A step together with the retry rule for its forward action.
pub struct StepEntry {
    pub step: Box<dyn Step>,
    pub retry: RetryRule,
}

/// An ordered list of steps.
///
/// Flights are cheap, disposable values: the executor rebuilds them from the
/// persisted input map whenever it needs to drive one.
pub struct Flight {
    kind: FlightKind,
    steps: Vec<StepEntry>,
}

impl Flight {
    pub fn new(kind: FlightKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
        }
    }

    /// Append a step whose retryable failures are not retried.
    pub fn add_step(&mut self, step: impl Step + 'static) -> &mut Self {
        self.add_step_with_retry(step, RetryRule::None)
    }

    pub fn add_step_with_retry(&mut self, step: impl Step + 'static, retry: RetryRule) -> &mut Self {
        self.steps.push(StepEntry {
            step: Box::new(step),
            retry,
        });
        self
    }

    pub fn kind(&self) -> &FlightKind {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&StepEntry> {
        self.steps.get(index)
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|e| e.step.name().to_string()).collect()
    }
}

impl core::fmt::Debug for Flight {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Flight")
            .field("kind", &self.kind)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Deterministically builds a flight of one kind from its input map.
pub trait FlightFactory: Send + Sync {
    fn kind(&self) -> FlightKind;

    fn build(&self, input: &FlightMap) -> Result<Flight, FlightBuildError>;
}

/// Adapter turning a closure into a [`FlightFactory`].
pub(crate) struct FnFactory<F> {
    pub(crate) kind: FlightKind,
    pub(crate) build: F,
}

impl<F> FlightFactory for FnFactory<F>
where
    F: Fn(&FlightMap) -> Result<Flight, FlightBuildError> + Send + Sync,
{
    fn kind(&self) -> FlightKind {
        self.kind.clone()
    }

    fn build(&self, input: &FlightMap) -> Result<Flight, FlightBuildError> {
        (self.build)(input)
    }
}
