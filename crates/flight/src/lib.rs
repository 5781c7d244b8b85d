//! Flight mechanics (framework only, no IO).
//!
//! - A **flight** is an ordered list of steps plus an immutable input map and a
//!   mutable working map shared by its steps.
//! - A **step** has a forward action and a compensating (undo) action, and
//!   reports its outcome as a [`StepResult`] value.
//! - A [`RetryRule`] decides whether and when a retryable failure is retried.
//! - A [`FlightRecord`] is the durable snapshot an executor persists after
//!   every step outcome; flights themselves are rebuilt from it through the
//!   [`FlightRegistry`].
//! - A [`FlightHook`] observes flights reaching a terminal state.
//!
//! `wsm-infra` is responsible for persisting records and driving flights.

pub mod context;
pub mod flight;
pub mod hook;
pub mod map;
pub mod record;
pub mod registry;
pub mod retry;
pub mod step;

pub use context::FlightContext;
pub use flight::{Flight, FlightBuildError, FlightFactory, FlightId, FlightKind, StepEntry};
pub use hook::{FlightHook, HookError};
pub use map::{FlightMap, FlightMapError};
pub use record::{
    Direction, FlightError, FlightRecord, FlightStatus, RESPONSE_KEY, StepRecord, StepState,
    UndoFailure,
};
pub use registry::{FlightRegistry, FlightRegistryBuilder};
pub use retry::RetryRule;
pub use step::{Step, StepError, StepFailure, StepResult};
