//! `PostgreSQL` storage for ride events.
//!
//! [`PostgresRideEventStore`] implements [`RideEventSink`] on top of a sqlx
//! connection pool. Rows are keyed by `(trip_id, event_type)` and inserted with
//! `ON CONFLICT DO NOTHING`, so redelivered events are dropped by the database
//! rather than by the caller.
//!
//! # Example
//!
//! ```no_run
//! use rideshare_postgres::PostgresRideEventStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresRideEventStore::new("postgres://localhost/rides").await?;
//! store.run_migrations().await?;
//! println!("{} events stored", store.count_events().await?);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use rideshare_core::metrics::INSERT_DURATION_SECONDS;
use rideshare_core::sink::{InsertOutcome, PersistenceError, RideEventRecord, RideEventSink};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

/// `PostgreSQL`-backed ride event store.
#[derive(Clone, Debug)]
pub struct PostgresRideEventStore {
    pool: PgPool,
}

impl PostgresRideEventStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| PersistenceError::DatabaseError(format!("Failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool (for custom pool settings or tests).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `ride_events` table and its indexes if they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if a migration fails.
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PersistenceError::DatabaseError(format!("Migration failed: {e}")))?;

        tracing::info!("Ride event migrations applied");
        Ok(())
    }

    /// All stored events of one ride, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if the query fails or a row
    /// cannot be read back.
    pub async fn load_trip_events(
        &self,
        trip_id: &str,
    ) -> Result<Vec<RideEventRecord>, PersistenceError> {
        let rows = sqlx::query(
            r"
            SELECT id, trip_id, event_type, event_state, event_time,
                   driver_id, passenger_id, payload
            FROM ride_events
            WHERE trip_id = $1
            ORDER BY event_time ASC, inserted_at ASC
            ",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }

    /// Total number of stored events.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if the query fails.
    pub async fn count_events(&self) -> Result<i64, PersistenceError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ride_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;
        Ok(count)
    }

    async fn insert(&self, record: RideEventRecord) -> Result<InsertOutcome, PersistenceError> {
        let payload: Option<serde_json::Value> = serde_json::from_slice(&record.payload)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;

        let started = Instant::now();
        let result = sqlx::query(
            r"
            INSERT INTO ride_events (
                trip_id, event_type, id, event_state, event_time,
                driver_id, passenger_id, payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (trip_id, event_type) DO NOTHING
            ",
        )
        .bind(&record.trip_id)
        .bind(&record.event_type)
        .bind(&record.id)
        .bind(&record.event_state)
        .bind(record.event_time)
        .bind(&record.driver_id)
        .bind(&record.passenger_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::DatabaseError(e.to_string()))?;

        metrics::histogram!(INSERT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let outcome = if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        };

        tracing::debug!(
            trip_id = %record.trip_id,
            event_type = %record.event_type,
            ?outcome,
            "Ride event insert finished"
        );

        Ok(outcome)
    }
}

impl RideEventSink for PostgresRideEventStore {
    fn insert_ride_event(
        &self,
        record: &RideEventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, PersistenceError>> + Send + '_>> {
        let record = record.clone();
        Box::pin(self.insert(record))
    }
}

fn record_from_row(row: &PgRow) -> Result<RideEventRecord, PersistenceError> {
    let read = |e: sqlx::Error| PersistenceError::DatabaseError(format!("Bad row: {e}"));

    let payload: Option<serde_json::Value> = row.try_get("payload").map_err(read)?;
    let event_time: DateTime<Utc> = row.try_get("event_time").map_err(read)?;

    Ok(RideEventRecord {
        id: row.try_get("id").map_err(read)?,
        trip_id: row.try_get("trip_id").map_err(read)?,
        event_type: row.try_get("event_type").map_err(read)?,
        event_state: row.try_get("event_state").map_err(read)?,
        event_time,
        driver_id: row.try_get("driver_id").map_err(read)?,
        passenger_id: row.try_get("passenger_id").map_err(read)?,
        payload: serde_json::to_vec(&payload)
            .map_err(|e| PersistenceError::SerializationError(e.to_string()))?,
    })
}
