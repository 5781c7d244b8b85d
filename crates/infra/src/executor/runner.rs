//! Step loop: forward execution with retry, then undo in reverse on failure.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use wsm_flight::{
    Direction, Flight, FlightContext, FlightId, FlightRecord, FlightStatus, HookError, StepEntry,
    StepError, StepFailure,
};

use super::{ExecutorError, FlightExecutor};

impl FlightExecutor {
    /// Load the record and drive it to a terminal state, then run hooks.
    ///
    /// The caller must hold the flight's claim and lease.
    pub(super) async fn drive(&self, flight_id: &FlightId) -> Result<(), ExecutorError> {
        let mut record = self
            .inner
            .store
            .get(flight_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(flight_id.clone()))?;

        if !record.is_terminal() {
            match self.inner.registry.build(&record.kind, &record.input) {
                Ok(flight) if flight.len() == record.steps.len() => {
                    self.run_flight(&flight, &mut record).await?;
                }
                Ok(flight) => {
                    let cause = StepError::new(format!(
                        "flight {} now has {} steps but the record has {}",
                        record.kind,
                        flight.len(),
                        record.steps.len()
                    ));
                    self.abandon(&mut record, cause).await?;
                }
                Err(e) => {
                    self.abandon(&mut record, StepError::new(e.to_string())).await?;
                }
            }
        }

        if !record.hooks_completed {
            self.run_hooks(&mut record).await?;
        }
        Ok(())
    }

    /// Write the record as the next version.
    async fn persist(&self, record: &mut FlightRecord) -> Result<(), ExecutorError> {
        record.version += 1;
        self.inner.store.update(record).await?;
        Ok(())
    }

    async fn abandon(&self, record: &mut FlightRecord, cause: StepError) -> Result<(), ExecutorError> {
        error!(
            flight_id = %record.flight_id,
            flight_kind = %record.kind,
            error = %cause,
            "cannot rebuild flight from its record; marking FATAL"
        );
        record.abandon(cause);
        self.persist(record).await?;
        Ok(())
    }

    async fn run_flight(&self, flight: &Flight, record: &mut FlightRecord) -> Result<(), ExecutorError> {
        if record.status == FlightStatus::Created {
            record.mark_running();
            self.persist(record).await?;
        }

        let mut ctx = FlightContext::new(
            record.flight_id.clone(),
            record.kind.clone(),
            record.input.clone(),
            record.working.clone(),
        )
        .with_budget(self.inner.config.max_flight_duration);

        while !record.is_terminal() {
            let index = record.cursor;
            let direction = record.direction;

            let Some(entry) = flight.step(index) else {
                if direction == Direction::Forward {
                    record.complete();
                    self.persist(record).await?;
                    info!(
                        flight_id = %record.flight_id,
                        flight_kind = %record.kind,
                        "flight succeeded"
                    );
                } else {
                    let cause = StepError::new(format!("undo cursor {index} out of range"));
                    self.abandon(record, cause).await?;
                }
                break;
            };

            ctx.set_position(index, direction);
            let outcome = self.run_action(entry, &mut ctx, record, index, direction).await;
            let working = ctx.working().clone();

            match (direction, outcome) {
                (Direction::Forward, Ok(())) => {
                    debug!(flight_id = %record.flight_id, step = index, "step done");
                    record.step_succeeded(index, working);
                }
                (Direction::Forward, Err(cause)) => {
                    warn!(
                        flight_id = %record.flight_id,
                        flight_kind = %record.kind,
                        step = index,
                        step_name = entry.step.name(),
                        error = %cause,
                        "step failed; undoing flight"
                    );
                    record.begin_undo(index, cause, working);
                }
                (Direction::Undo, Ok(())) => {
                    debug!(flight_id = %record.flight_id, step = index, "step undone");
                    record.step_undone(index, working);
                }
                (Direction::Undo, Err(cause)) => {
                    error!(
                        flight_id = %record.flight_id,
                        flight_kind = %record.kind,
                        step = index,
                        step_name = entry.step.name(),
                        error = %cause,
                        "undo failed; flight is FATAL and may have left partial state"
                    );
                    record.undo_failed(index, cause, working);
                }
            }
            self.persist(record).await?;
        }

        if record.status == FlightStatus::Error {
            warn!(
                flight_id = %record.flight_id,
                flight_kind = %record.kind,
                "flight failed and was rolled back"
            );
        }
        Ok(())
    }

    /// Run one step action, retrying retryable failures per the step's rule.
    ///
    /// Undo honors the same rule as the forward action.
    async fn run_action(
        &self,
        entry: &StepEntry,
        ctx: &mut FlightContext,
        record: &mut FlightRecord,
        index: usize,
        direction: Direction,
    ) -> Result<(), StepError> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match direction {
                Direction::Forward => entry.step.do_step(ctx).await,
                Direction::Undo => entry.step.undo_step(ctx).await,
            };

            let failure = match result {
                Ok(()) => {
                    record.record_attempt(index, attempt, None);
                    return Ok(());
                }
                Err(failure) => failure,
            };
            record.record_attempt(index, attempt, Some(failure.error().clone()));

            let cause = match failure {
                StepFailure::Fatal(cause) => return Err(cause),
                StepFailure::Retry(cause) => cause,
            };

            let delay = if ctx.is_past_deadline() {
                None
            } else {
                entry.retry.next_delay(attempt, started.elapsed())
            };
            let Some(delay) = delay else {
                debug!(
                    flight_id = %record.flight_id,
                    step = index,
                    attempt,
                    "retry budget exhausted"
                );
                return Err(cause);
            };

            warn!(
                flight_id = %record.flight_id,
                step = index,
                step_name = entry.step.name(),
                attempt,
                delay_ms = millis(delay),
                error = %cause,
                "retryable step failure"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Invoke every hook, then record completion.
    ///
    /// All hooks run even if one fails; the first failure is returned and the
    /// record stays marked as needing hooks so recovery replays them.
    async fn run_hooks(&self, record: &mut FlightRecord) -> Result<(), ExecutorError> {
        let mut first_error = None;
        for hook in &self.inner.hooks {
            let Err(e) = hook.end_flight(record).await else {
                continue;
            };
            match &e {
                HookError::Unhandled(_) => error!(
                    flight_id = %record.flight_id,
                    flight_kind = %record.kind,
                    hook = hook.name(),
                    error = %e,
                    "programming error in flight hook"
                ),
                HookError::Failed(_) => error!(
                    flight_id = %record.flight_id,
                    hook = hook.name(),
                    error = %e,
                    "flight hook failed"
                ),
            }
            if first_error.is_none() {
                first_error = Some(ExecutorError::Hook {
                    hook: hook.name().to_string(),
                    flight_id: record.flight_id.clone(),
                    source: e,
                });
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        record.mark_hooks_completed();
        self.persist(record).await?;
        Ok(())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_micros(2_500)), 2);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
