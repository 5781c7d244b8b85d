//! Durable flight executor.
//!
//! Submission persists a `CREATED` record before returning; execution then runs
//! in its own tokio task, persisting the record after every step outcome.
//!
//! Only one task anywhere drives a flight at a time. Within a process a
//! per-flight-id claim serializes tasks; across processes the executor holds
//! a lease in the store ([`FlightStore::try_claim`]) that a heartbeat renews
//! while the flight runs. Every write carries the next record version, so an
//! executor that lost its lease fails instead of overwriting newer progress.

mod recovery;
mod runner;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use wsm_flight::{
    FlightBuildError, FlightError, FlightHook, FlightId, FlightKind, FlightMap, FlightRecord,
    FlightRegistry, FlightStatus, HookError,
};

use crate::flight_store::{FlightStore, FlightStoreError};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How often `wait_for_flight` polls the store.
    pub poll_interval: Duration,
    /// Maximum flights executing at once.
    pub max_concurrent_flights: usize,
    /// Once a run exceeds this, retryable failures are no longer retried.
    pub max_flight_duration: Option<Duration>,
    /// Name for logging
    pub name: String,
    /// Lease owner name. Executors sharing a store must use distinct ids.
    pub instance_id: String,
    /// How long a claimed flight stays claimed without a heartbeat.
    pub lease: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_concurrent_flights: 16,
            max_flight_duration: None,
            name: "flight-executor".to_string(),
            instance_id: format!("executor-{}", uuid::Uuid::now_v7()),
            lease: Duration::from_secs(60),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent_flights(mut self, max: usize) -> Self {
        self.max_concurrent_flights = max;
        self
    }

    pub fn with_max_flight_duration(mut self, max: Duration) -> Self {
        self.max_flight_duration = Some(max);
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("flight not found: {0}")]
    NotFound(FlightId),

    #[error("flight not completed: {0}")]
    NotCompleted(FlightId),

    /// The flight is still active and cannot be deleted.
    #[error("flight is active: {0}")]
    Active(FlightId),

    #[error("timed out waiting for flight {0}")]
    Timeout(FlightId),

    /// A flight with this id exists but is of a different kind.
    #[error("flight {flight_id} is a {existing} flight, not {requested}")]
    KindMismatch {
        flight_id: FlightId,
        existing: FlightKind,
        requested: FlightKind,
    },

    #[error(transparent)]
    Build(#[from] FlightBuildError),

    #[error(transparent)]
    Store(#[from] FlightStoreError),

    #[error("hook '{hook}' failed for flight {flight_id}: {source}")]
    Hook {
        hook: String,
        flight_id: FlightId,
        #[source]
        source: HookError,
    },
}

/// Terminal outcome of a flight as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightOutcome {
    pub flight_id: FlightId,
    pub kind: FlightKind,
    pub status: FlightStatus,
    pub output: Option<JsonValue>,
    pub error: Option<FlightError>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlightOutcome {
    fn from_record(record: FlightRecord) -> Self {
        Self {
            flight_id: record.flight_id,
            kind: record.kind,
            status: record.status,
            output: record.output,
            error: record.error,
            submitted_at: record.submitted_at,
            completed_at: record.completed_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FlightStatus::Success
    }
}

struct Inner {
    store: Arc<dyn FlightStore>,
    registry: Arc<FlightRegistry>,
    hooks: Vec<Arc<dyn FlightHook>>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<FlightId>>>,
}

/// Runs flights durably against a [`FlightStore`].
///
/// Cheap to clone; clones share the store, registry, hooks and worker pool.
#[derive(Clone)]
pub struct FlightExecutor {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for FlightExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlightExecutor")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("hooks", &self.inner.hooks.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Exclusive right to drive one flight; released on drop.
struct Claim {
    active: Arc<Mutex<HashSet<FlightId>>>,
    flight_id: FlightId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.flight_id);
    }
}

impl FlightExecutor {
    pub fn new(
        store: Arc<dyn FlightStore>,
        registry: Arc<FlightRegistry>,
        hooks: Vec<Arc<dyn FlightHook>>,
        config: ExecutorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_flights.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                hooks,
                config,
                permits,
                active: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    pub fn registry(&self) -> &FlightRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Submit a flight for execution.
    ///
    /// The input is validated by building the flight once. If a record with
    /// `flight_id` already exists nothing is created or re-run and the id is
    /// returned as-is, provided the existing flight is of the same kind.
    pub async fn submit(
        &self,
        flight_id: FlightId,
        kind: FlightKind,
        input: FlightMap,
    ) -> Result<FlightId, ExecutorError> {
        if let Some(existing) = self.inner.store.get(&flight_id).await? {
            debug!(flight_id = %flight_id, "duplicate submission; returning existing flight");
            return same_kind(existing, kind);
        }

        let flight = self.inner.registry.build(&kind, &input)?;
        let record = FlightRecord::new(flight_id.clone(), kind.clone(), input, flight.step_names());

        if !self.inner.store.create(&record).await? {
            debug!(flight_id = %flight_id, "lost submission race; returning existing flight");
            let existing = self.get_flight(&flight_id).await?;
            return same_kind(existing, kind);
        }

        debug!(
            flight_id = %flight_id,
            flight_kind = %record.kind,
            steps = record.steps.len(),
            "flight submitted"
        );
        // The record is durable; recovery picks it up if starting fails here.
        if let Err(e) = self.start(flight_id.clone()).await {
            warn!(flight_id = %flight_id, error = %e, "could not start submitted flight");
        }
        Ok(flight_id)
    }

    /// Drive a flight to completion in the current task.
    ///
    /// Returns `false` without doing anything when another task, in this
    /// process or another one, already holds the flight.
    pub async fn execute(&self, flight_id: &FlightId) -> Result<bool, ExecutorError> {
        let Some(_claim) = self.try_claim(flight_id) else {
            return Ok(false);
        };
        self.drive_leased(flight_id).await
    }

    /// Current record of a flight, whatever its state.
    pub async fn get_flight(&self, flight_id: &FlightId) -> Result<FlightRecord, ExecutorError> {
        self.inner
            .store
            .get(flight_id)
            .await?
            .ok_or_else(|| ExecutorError::NotFound(flight_id.clone()))
    }

    /// Terminal outcome of a flight.
    pub async fn get_result(&self, flight_id: &FlightId) -> Result<FlightOutcome, ExecutorError> {
        let record = self.get_flight(flight_id).await?;
        if !record.is_terminal() {
            return Err(ExecutorError::NotCompleted(flight_id.clone()));
        }
        Ok(FlightOutcome::from_record(record))
    }

    /// Poll until the flight is terminal and no task in this process is still
    /// working on it (its hooks have run or failed).
    pub async fn wait_for_flight(
        &self,
        flight_id: &FlightId,
        timeout: Option<Duration>,
    ) -> Result<FlightOutcome, ExecutorError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            match self.get_result(flight_id).await {
                Ok(outcome) if !self.is_active(flight_id) => return Ok(outcome),
                Ok(_) | Err(ExecutorError::NotCompleted(_)) => {}
                Err(e) => return Err(e),
            }
            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                return Err(ExecutorError::Timeout(flight_id.clone()));
            }
            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    /// Remove a finished flight's record.
    pub async fn delete_flight(&self, flight_id: &FlightId) -> Result<(), ExecutorError> {
        let record = self.get_flight(flight_id).await?;
        if !record.is_terminal() || self.is_active(flight_id) {
            return Err(ExecutorError::Active(flight_id.clone()));
        }
        if !self.inner.store.delete(flight_id).await? {
            return Err(ExecutorError::NotFound(flight_id.clone()));
        }
        debug!(flight_id = %flight_id, "flight record deleted");
        Ok(())
    }

    /// Whether a task in this process currently holds the flight.
    ///
    /// Flights leased by other executor instances are not reported.
    pub fn is_active(&self, flight_id: &FlightId) -> bool {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains(flight_id)
    }

    fn try_claim(&self, flight_id: &FlightId) -> Option<Claim> {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(flight_id.clone()) {
            return None;
        }
        Some(Claim {
            active: self.inner.active.clone(),
            flight_id: flight_id.clone(),
        })
    }

    /// Start driving a flight on its own task.
    ///
    /// Returns `false` when the flight is already claimed in this process or
    /// leased by another executor instance.
    pub(crate) async fn start(&self, flight_id: FlightId) -> Result<bool, ExecutorError> {
        let Some(claim) = self.try_claim(&flight_id) else {
            debug!(flight_id = %flight_id, "flight already claimed");
            return Ok(false);
        };
        if !self.claim_lease(&flight_id).await? {
            debug!(flight_id = %flight_id, "flight leased by another executor");
            return Ok(false);
        }

        let executor = self.clone();
        let span = info_span!("flight", executor = %self.inner.config.name, flight_id = %flight_id);
        tokio::spawn(
            async move {
                let _claim = claim;
                let Ok(_permit) = executor.inner.permits.clone().acquire_owned().await else {
                    return;
                };
                if let Err(e) = executor.drive_leased(&flight_id).await {
                    error!(flight_id = %flight_id, error = %e, "flight execution stopped");
                }
            }
            .instrument(span),
        );
        Ok(true)
    }

    async fn claim_lease(&self, flight_id: &FlightId) -> Result<bool, ExecutorError> {
        let config = &self.inner.config;
        Ok(self
            .inner
            .store
            .try_claim(flight_id, &config.instance_id, config.lease)
            .await?)
    }

    /// Drive a flight while holding its store lease.
    ///
    /// The caller must hold the local claim. The lease is renewed in the
    /// background and released once the flight and its hooks are done.
    async fn drive_leased(&self, flight_id: &FlightId) -> Result<bool, ExecutorError> {
        // Waiting for a permit may have outlived the lease taken at start.
        if !self.claim_lease(flight_id).await? {
            debug!(flight_id = %flight_id, "lease taken over by another executor");
            return Ok(false);
        }

        let heartbeat = self.heartbeat(flight_id.clone());
        let result = self.drive(flight_id).await;
        heartbeat.abort();

        if let Err(e) = self
            .inner
            .store
            .release(flight_id, &self.inner.config.instance_id)
            .await
        {
            warn!(flight_id = %flight_id, error = %e, "could not release flight lease");
        }
        result.map(|()| true)
    }

    fn heartbeat(&self, flight_id: FlightId) -> JoinHandle<()> {
        let store = self.inner.store.clone();
        let owner = self.inner.config.instance_id.clone();
        let lease = self.inner.config.lease;
        let period = (lease / 3).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.try_claim(&flight_id, &owner, lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(flight_id = %flight_id, "flight lease lost to another executor");
                        return;
                    }
                    Err(e) => {
                        warn!(flight_id = %flight_id, error = %e, "flight lease renewal failed");
                    }
                }
            }
        })
    }
}

fn same_kind(existing: FlightRecord, requested: FlightKind) -> Result<FlightId, ExecutorError> {
    if existing.kind != requested {
        return Err(ExecutorError::KindMismatch {
            flight_id: existing.flight_id,
            existing: existing.kind,
            requested,
        });
    }
    Ok(existing.flight_id)
}
