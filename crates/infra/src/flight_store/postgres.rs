//! Postgres-backed flight store.
//!
//! The record is stored whole as JSONB in the `flights` table. The scalar
//! columns (`status`, `hooks_completed`, `version`, timestamps) mirror record
//! fields so that recovery can filter without decoding every row.
//!
//! Updates are conditional on `version = new_version - 1`. Leases are taken
//! with a conditional `UPDATE` on `lease_owner`/`lease_expires_at` so that
//! exactly one executor instance drives a flight at a time.
//!
//! ## Error Mapping
//!
//! | SQLx Error | FlightStoreError |
//! |------------|------------------|
//! | Database (any code) | `Backend` |
//! | PoolClosed | `Backend` |
//! | ColumnDecode / Decode | `Serialization` |
//! | Other | `Backend` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use wsm_flight::{FlightId, FlightRecord};

use super::r#trait::{FlightStore, FlightStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_flights.sql");

/// Postgres-backed flight store.
///
/// Creation uses `INSERT ... ON CONFLICT DO NOTHING`, which makes concurrent
/// submissions of the same flight id race-free at the database level.
#[derive(Debug, Clone)]
pub struct PostgresFlightStore {
    pool: Arc<PgPool>,
}

impl PostgresFlightStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, FlightStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Apply the (idempotent) schema script.
    pub async fn ensure_schema(&self) -> Result<(), FlightStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

fn encode(record: &FlightRecord) -> Result<JsonValue, FlightStoreError> {
    serde_json::to_value(record).map_err(|e| FlightStoreError::Serialization(e.to_string()))
}

fn version(record: &FlightRecord) -> Result<i64, FlightStoreError> {
    i64::try_from(record.version).map_err(|_| {
        FlightStoreError::Serialization(format!("version {} out of range", record.version))
    })
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<FlightRecord, FlightStoreError> {
    let value: JsonValue = row
        .try_get("record")
        .map_err(|e| map_sqlx_error("decode", e))?;
    serde_json::from_value(value).map_err(|e| FlightStoreError::Serialization(e.to_string()))
}

#[async_trait]
impl FlightStore for PostgresFlightStore {
    #[instrument(skip(self, record), fields(flight_id = %record.flight_id), err)]
    async fn create(&self, record: &FlightRecord) -> Result<bool, FlightStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO flights
                (flight_id, kind, status, hooks_completed, record, version, submitted_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (flight_id) DO NOTHING
            "#,
        )
        .bind(record.flight_id.as_str())
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.hooks_completed)
        .bind(encode(record)?)
        .bind(version(record)?)
        .bind(record.submitted_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, record), fields(flight_id = %record.flight_id, status = %record.status), err)]
    async fn update(&self, record: &FlightRecord) -> Result<(), FlightStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flights
            SET status = $2,
                hooks_completed = $3,
                record = $4,
                updated_at = $5,
                completed_at = $6,
                version = $7
            WHERE flight_id = $1 AND version = $7 - 1
            "#,
        )
        .bind(record.flight_id.as_str())
        .bind(record.status.as_str())
        .bind(record.hooks_completed)
        .bind(encode(record)?)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .bind(version(record)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM flights WHERE flight_id = $1")
                .bind(record.flight_id.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("update", e))?;
        match stored {
            None => Err(FlightStoreError::NotFound(record.flight_id.clone())),
            Some(current) => Err(FlightStoreError::Conflict(format!(
                "flight {} is at version {}, update carries {}",
                record.flight_id, current, record.version
            ))),
        }
    }

    #[instrument(skip(self), fields(flight_id = %flight_id), err)]
    async fn get(&self, flight_id: &FlightId) -> Result<Option<FlightRecord>, FlightStoreError> {
        let row = sqlx::query("SELECT record FROM flights WHERE flight_id = $1")
            .bind(flight_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_incomplete(&self) -> Result<Vec<FlightRecord>, FlightStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record
            FROM flights
            WHERE status NOT IN ('SUCCESS', 'ERROR', 'FATAL') OR NOT hooks_completed
            ORDER BY submitted_at ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_incomplete", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self), fields(flight_id = %flight_id), err)]
    async fn delete(&self, flight_id: &FlightId) -> Result<bool, FlightStoreError> {
        let result = sqlx::query("DELETE FROM flights WHERE flight_id = $1")
            .bind(flight_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(flight_id = %flight_id), err)]
    async fn try_claim(
        &self,
        flight_id: &FlightId,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, FlightStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE flights
            SET lease_owner = $2,
                lease_expires_at = now() + ($3::double precision * INTERVAL '1 millisecond')
            WHERE flight_id = $1
              AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at < now())
            "#,
        )
        .bind(flight_id.as_str())
        .bind(owner)
        .bind(lease.as_secs_f64() * 1000.0)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("try_claim", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<String> =
            sqlx::query_scalar("SELECT flight_id FROM flights WHERE flight_id = $1")
                .bind(flight_id.as_str())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("try_claim", e))?;
        match exists {
            None => Err(FlightStoreError::NotFound(flight_id.clone())),
            Some(_) => Ok(false),
        }
    }

    #[instrument(skip(self), fields(flight_id = %flight_id), err)]
    async fn release(&self, flight_id: &FlightId, owner: &str) -> Result<(), FlightStoreError> {
        sqlx::query(
            r#"
            UPDATE flights
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE flight_id = $1 AND lease_owner = $2
            "#,
        )
        .bind(flight_id.as_str())
        .bind(owner)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> FlightStoreError {
    match err {
        sqlx::Error::Database(db_err) => FlightStoreError::Backend(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolClosed => {
            FlightStoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            FlightStoreError::Serialization(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => FlightStoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsm_flight::{FlightKind, FlightMap};

    #[test]
    fn schema_carries_version_and_lease_columns() {
        for column in ["version BIGINT", "lease_owner TEXT", "lease_expires_at TIMESTAMPTZ"] {
            assert!(SCHEMA.contains(column), "missing {column}");
        }
    }

    #[test]
    fn versions_beyond_bigint_are_rejected() {
        let mut record = FlightRecord::new(
            FlightId::new("f-1"),
            FlightKind::from_static("test.flight"),
            FlightMap::new(),
            Vec::new(),
        );
        record.version = 7;
        assert_eq!(version(&record).unwrap(), 7);
        record.version = u64::MAX;
        assert!(matches!(
            version(&record),
            Err(FlightStoreError::Serialization(_))
        ));
    }
}
