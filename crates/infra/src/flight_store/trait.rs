use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use wsm_flight::{FlightId, FlightRecord};

/// Flight store operation error.
///
/// These are **infrastructure errors** (storage, encoding) as opposed to step
/// failures, which are captured inside the record itself.
#[derive(Debug, Error)]
pub enum FlightStoreError {
    #[error("flight not found: {0}")]
    NotFound(FlightId),

    /// Optimistic concurrency check failed: another writer updated the record.
    #[error("concurrent update of flight: {0}")]
    Conflict(String),

    #[error("failed to encode/decode flight record: {0}")]
    Serialization(String),

    #[error("flight store backend error: {0}")]
    Backend(String),
}

/// Durable storage for flight records.
///
/// The store is the only state shared between flights and between executor
/// instances. Every write replaces the whole record, so a reader always
/// observes a snapshot taken at a step boundary.
///
/// ## Exclusive execution
///
/// An executor drives a flight only while it holds the flight's lease
/// ([`FlightStore::try_claim`]). Updates are additionally version-checked, so
/// a writer that lost its lease cannot overwrite newer progress.
#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Insert `record` unless a record with the same id already exists.
    ///
    /// Returns `false` (and leaves the stored record untouched) on conflict.
    async fn create(&self, record: &FlightRecord) -> Result<bool, FlightStoreError>;

    /// Replace an existing record.
    ///
    /// `record.version` must be the stored version plus one; anything else is
    /// a [`FlightStoreError::Conflict`].
    async fn update(&self, record: &FlightRecord) -> Result<(), FlightStoreError>;

    async fn get(&self, flight_id: &FlightId) -> Result<Option<FlightRecord>, FlightStoreError>;

    /// Records that are not terminal, or whose completion hooks have not run.
    ///
    /// Ordered by submission time.
    async fn list_incomplete(&self) -> Result<Vec<FlightRecord>, FlightStoreError>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, flight_id: &FlightId) -> Result<bool, FlightStoreError>;

    /// Take or renew the execution lease on a flight for `lease`.
    ///
    /// Succeeds when the flight is unowned, already owned by `owner`, or the
    /// previous owner's lease has expired. Returns `false` while another owner
    /// holds a live lease.
    async fn try_claim(
        &self,
        flight_id: &FlightId,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, FlightStoreError>;

    /// Give up the lease if `owner` holds it.
    async fn release(&self, flight_id: &FlightId, owner: &str) -> Result<(), FlightStoreError>;
}

#[async_trait]
impl<S> FlightStore for Arc<S>
where
    S: FlightStore + ?Sized,
{
    async fn create(&self, record: &FlightRecord) -> Result<bool, FlightStoreError> {
        (**self).create(record).await
    }

    async fn update(&self, record: &FlightRecord) -> Result<(), FlightStoreError> {
        (**self).update(record).await
    }

    async fn get(&self, flight_id: &FlightId) -> Result<Option<FlightRecord>, FlightStoreError> {
        (**self).get(flight_id).await
    }

    async fn list_incomplete(&self) -> Result<Vec<FlightRecord>, FlightStoreError> {
        (**self).list_incomplete().await
    }

    async fn delete(&self, flight_id: &FlightId) -> Result<bool, FlightStoreError> {
        (**self).delete(flight_id).await
    }

    async fn try_claim(
        &self,
        flight_id: &FlightId,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, FlightStoreError> {
        (**self).try_claim(flight_id, owner, lease).await
    }

    async fn release(&self, flight_id: &FlightId, owner: &str) -> Result<(), FlightStoreError> {
        (**self).release(flight_id, owner).await
    }
}
