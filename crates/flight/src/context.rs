//! Execution context handed to steps.

use std::time::{Duration, Instant};

use crate::flight::{FlightId, FlightKind};
use crate::map::FlightMap;
use crate::record::Direction;

/// What a step sees while it runs: flight identity, the read-only input map,
/// the read/write working map and an elapsed-time signal.
#[derive(Debug)]
pub struct FlightContext {
    flight_id: FlightId,
    kind: FlightKind,
    input: FlightMap,
    working: FlightMap,
    step_index: usize,
    direction: Direction,
    started_at: Instant,
    deadline: Option<Instant>,
}

impl FlightContext {
    pub fn new(flight_id: FlightId, kind: FlightKind, input: FlightMap, working: FlightMap) -> Self {
        Self {
            flight_id,
            kind,
            input,
            working,
            step_index: 0,
            direction: Direction::Forward,
            started_at: Instant::now(),
            deadline: None,
        }
    }

    /// Bound the run; steps can consult [`FlightContext::remaining`].
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.deadline = budget.map(|b| self.started_at + b);
        self
    }

    pub fn flight_id(&self) -> &FlightId {
        &self.flight_id
    }

    pub fn kind(&self) -> &FlightKind {
        &self.kind
    }

    pub fn input(&self) -> &FlightMap {
        &self.input
    }

    pub fn working(&self) -> &FlightMap {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut FlightMap {
        &mut self.working
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Time since this run of the flight started (resets after recovery).
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left in the flight's budget, if it has one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Position the context on the step about to run.
    pub fn set_position(&mut self, step_index: usize, direction: Direction) {
        self.step_index = step_index;
        self.direction = direction;
    }
}
