use tracing::{info, warn};

use super::{ExecutorError, FlightExecutor};

impl FlightExecutor {
    /// Resume every flight left unfinished by a previous process.
    ///
    /// Picks up non-terminal records and terminal records whose hooks have not
    /// run. A step not recorded as done restarts from the beginning of its
    /// action. Flights leased by another live executor are left to it.
    /// Returns the number of flights scheduled.
    pub async fn recover(&self) -> Result<usize, ExecutorError> {
        let pending = self.inner.store.list_incomplete().await?;
        let mut scheduled = 0;
        for record in pending {
            if !self.inner.registry.contains(&record.kind) {
                warn!(
                    flight_id = %record.flight_id,
                    flight_kind = %record.kind,
                    "recovering flight of unregistered kind"
                );
            }
            match self.start(record.flight_id.clone()).await {
                Ok(true) => scheduled += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    flight_id = %record.flight_id,
                    error = %e,
                    "could not resume flight"
                ),
            }
        }
        info!(executor = %self.inner.config.name, scheduled, "flight recovery started");
        Ok(scheduled)
    }
}
