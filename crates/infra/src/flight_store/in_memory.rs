use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use wsm_flight::{FlightId, FlightRecord};

use super::r#trait::{FlightStore, FlightStoreError};

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct Stored {
    record: FlightRecord,
    lease: Option<Lease>,
}

/// In-memory flight store.
///
/// Intended for tests/dev. Records survive executor restarts as long as the
/// store value itself is kept, which is how crash recovery is exercised.
/// Several executors may share one store to stand in for several processes.
#[derive(Debug, Default)]
pub struct InMemoryFlightStore {
    records: RwLock<HashMap<FlightId, Stored>>,
    writes: AtomicUsize,
}

impl InMemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `create`/`update` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> FlightStoreError {
    FlightStoreError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl FlightStore for InMemoryFlightStore {
    async fn create(&self, record: &FlightRecord) -> Result<bool, FlightStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&record.flight_id) {
            return Ok(false);
        }
        records.insert(
            record.flight_id.clone(),
            Stored {
                record: record.clone(),
                lease: None,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn update(&self, record: &FlightRecord) -> Result<(), FlightStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let slot = records
            .get_mut(&record.flight_id)
            .ok_or_else(|| FlightStoreError::NotFound(record.flight_id.clone()))?;
        if record.version != slot.record.version + 1 {
            return Err(FlightStoreError::Conflict(format!(
                "flight {} is at version {}, update carries {}",
                record.flight_id, slot.record.version, record.version
            )));
        }
        slot.record = record.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, flight_id: &FlightId) -> Result<Option<FlightRecord>, FlightStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(flight_id).map(|s| s.record.clone()))
    }

    async fn list_incomplete(&self) -> Result<Vec<FlightRecord>, FlightStoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut pending: Vec<FlightRecord> = records
            .values()
            .filter(|s| s.record.needs_attention())
            .map(|s| s.record.clone())
            .collect();
        pending.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(pending)
    }

    async fn delete(&self, flight_id: &FlightId) -> Result<bool, FlightStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(flight_id).is_some())
    }

    async fn try_claim(
        &self,
        flight_id: &FlightId,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, FlightStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let slot = records
            .get_mut(flight_id)
            .ok_or_else(|| FlightStoreError::NotFound(flight_id.clone()))?;
        let now = Instant::now();
        let available = match &slot.lease {
            None => true,
            Some(held) => held.owner == owner || held.expires_at <= now,
        };
        if available {
            slot.lease = Some(Lease {
                owner: owner.to_string(),
                expires_at: now + lease,
            });
        }
        Ok(available)
    }

    async fn release(&self, flight_id: &FlightId, owner: &str) -> Result<(), FlightStoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if let Some(slot) = records.get_mut(flight_id) {
            if slot.lease.as_ref().is_some_and(|l| l.owner == owner) {
                slot.lease = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsm_flight::{FlightKind, FlightMap};

    const LEASE: Duration = Duration::from_secs(60);

    fn record(id: &str) -> FlightRecord {
        FlightRecord::new(
            FlightId::new(id),
            FlightKind::from_static("test.flight"),
            FlightMap::new(),
            vec!["only".to_string()],
        )
    }

    #[tokio::test]
    async fn create_is_idempotent_on_flight_id() {
        let store = InMemoryFlightStore::new();
        let first = record("f-1");
        assert!(store.create(&first).await.unwrap());

        let mut second = record("f-1");
        second.cursor = 1;
        assert!(!store.create(&second).await.unwrap());

        let stored = store.get(&FlightId::new("f-1")).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 0);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails() {
        let store = InMemoryFlightStore::new();
        let err = store.update(&record("missing")).await.unwrap_err();
        assert!(matches!(err, FlightStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn stale_updates_are_rejected() {
        let store = InMemoryFlightStore::new();
        let mut r = record("f-1");
        store.create(&r).await.unwrap();

        r.version = 1;
        r.cursor = 1;
        store.update(&r).await.unwrap();

        // A second writer still holding version 0 loses.
        let mut stale = record("f-1");
        stale.version = 1;
        assert!(matches!(
            store.update(&stale).await,
            Err(FlightStoreError::Conflict(_))
        ));
        let stored = store.get(&r.flight_id).await.unwrap().unwrap();
        assert_eq!((stored.version, stored.cursor), (1, 1));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released_or_expired() {
        let store = InMemoryFlightStore::new();
        let r = record("f-1");
        store.create(&r).await.unwrap();

        assert!(store.try_claim(&r.flight_id, "a", LEASE).await.unwrap());
        assert!(store.try_claim(&r.flight_id, "a", LEASE).await.unwrap());
        assert!(!store.try_claim(&r.flight_id, "b", LEASE).await.unwrap());

        store.release(&r.flight_id, "b").await.unwrap();
        assert!(!store.try_claim(&r.flight_id, "b", LEASE).await.unwrap());

        store.release(&r.flight_id, "a").await.unwrap();
        assert!(store.try_claim(&r.flight_id, "b", Duration::ZERO).await.unwrap());

        // b's lease expired immediately.
        assert!(store.try_claim(&r.flight_id, "a", LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn claiming_an_unknown_flight_fails() {
        let store = InMemoryFlightStore::new();
        assert!(matches!(
            store.try_claim(&FlightId::new("missing"), "a", LEASE).await,
            Err(FlightStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_incomplete_includes_terminal_records_awaiting_hooks() {
        let store = InMemoryFlightStore::new();

        let running = record("running");
        let mut done_hooks_pending = record("hooks-pending");
        done_hooks_pending.complete();
        let mut finished = record("finished");
        finished.complete();
        finished.mark_hooks_completed();

        for r in [&running, &done_hooks_pending, &finished] {
            store.create(r).await.unwrap();
        }

        let ids: Vec<String> = store
            .list_incomplete()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.flight_id.to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"running".to_string()));
        assert!(ids.contains(&"hooks-pending".to_string()));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryFlightStore::new();
        store.create(&record("f-1")).await.unwrap();
        assert!(store.delete(&FlightId::new("f-1")).await.unwrap());
        assert!(!store.delete(&FlightId::new("f-1")).await.unwrap());
        assert!(store.is_empty());
    }
}
