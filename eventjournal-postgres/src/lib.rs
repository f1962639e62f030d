//! PostgreSQL stream backend for `eventjournal`.
//!
//! Events live in one table, `journal_events`, keyed by
//! `(stream_name, stream_position)`. Appends run in a transaction that takes a
//! per-stream advisory lock, compares the stream's current version with the
//! expected one, and inserts the batch at consecutive positions. The primary
//! key backs the lock up: a racing insert at an occupied position fails with a
//! unique violation, which is reported as a version conflict.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use eventjournal::{
    decode, encode, BackendError, BackendResult, EventTypeName, LoadedStream, NewEvents, Operation,
    PersistableEvent, SerializedEvent, StreamBackend, StreamName, StreamVersion, UpdatedStream,
};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{query, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub use config::{
    MaxConnections, PostgresConfig, ACQUIRE_TIMEOUT_VAR, IDLE_TIMEOUT_VAR, MAX_CONNECTIONS_VAR,
};

/// Failures while setting up a [`PostgresStreamBackend`].
///
/// Failures of `load` and `append` are [`BackendError`]s like for every other
/// backend.
#[derive(Debug, Error)]
pub enum PostgresBackendError {
    /// The connection pool could not be created.
    #[error("failed to create postgres connection pool")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A configuration value could not be parsed.
    #[error("invalid value '{value}' for {variable}: {reason}")]
    Configuration {
        /// The environment variable holding the value.
        variable: &'static str,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The schema migration failed.
    #[error("postgres migration failed")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// The database did not answer a health check.
    #[error("postgres health check failed")]
    Unreachable(#[source] sqlx::Error),
}

/// Durable [`StreamBackend`] for events of type `E`.
///
/// Clones share the connection pool.
pub struct PostgresStreamBackend<E> {
    pool: Pool<Postgres>,
    _events: PhantomData<fn() -> E>,
}

impl<E> PostgresStreamBackend<E> {
    /// Connects with the default [`PostgresConfig`].
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresBackendError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connects with a custom [`PostgresConfig`].
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresBackendError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresBackendError::ConnectionFailed)?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool.
    ///
    /// Use this to share one pool across several components.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            _events: PhantomData,
        }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Runs `SELECT 1` against the database.
    pub async fn ping(&self) -> Result<(), PostgresBackendError> {
        let _ = query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(PostgresBackendError::Unreachable)?;
        Ok(())
    }

    /// Creates or upgrades the `journal_events` table.
    pub async fn migrate(&self) -> Result<(), PostgresBackendError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|error| {
                error!(error = %error, "[postgres.migrate] schema migration failed");
                PostgresBackendError::MigrationFailed(error)
            })
    }
}

impl<E> Clone for PostgresStreamBackend<E> {
    fn clone(&self) -> Self {
        Self::from_pool(self.pool.clone())
    }
}

impl<E> fmt::Debug for PostgresStreamBackend<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStreamBackend")
            .field("pool", &self.pool)
            .finish()
    }
}

#[async_trait]
impl<E> StreamBackend for PostgresStreamBackend<E>
where
    E: PersistableEvent,
{
    type Event = E;

    #[instrument(name = "postgres.load", skip(self))]
    async fn load(&self, name: &StreamName) -> BackendResult<LoadedStream<E>> {
        info!(stream = %name, "[postgres.load] reading events from postgres");

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::Load))?;
        let events = stored_events(&mut conn, name, Operation::Load).await?;

        let events = NewEvents::try_from(events)
            .map_err(|_| BackendError::StreamNotFound(name.clone()))?;
        Ok(LoadedStream::new(name.clone(), events))
    }

    #[instrument(
        name = "postgres.append",
        skip(self, update),
        fields(stream = %update.name(), expected = %update.expected_version())
    )]
    async fn append(&self, update: UpdatedStream<E>) -> BackendResult<LoadedStream<E>> {
        let name = update.name().clone();
        let expected = update.expected_version();
        let batch = update
            .events_to_append()
            .iter()
            .map(|event| encode(&name, event))
            .collect::<BackendResult<Vec<_>>>()?;

        info!(
            event_count = batch.len(),
            "[postgres.append] appending events to postgres"
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::BeginTransaction))?;

        // Serialises appenders of the same stream until commit or rollback.
        let _ = query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(name.as_ref())
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::LockStream))?;

        let actual = current_version(&mut tx, &name, Operation::Append).await?;
        if actual != expected {
            warn!(
                %actual,
                "[postgres.append] optimistic concurrency check failed"
            );
            return Err(BackendError::VersionConflict {
                stream: name,
                expected,
                actual,
            });
        }

        let mut position = expected;
        for SerializedEvent { event_type, payload } in batch {
            position = position.advance(1);
            let inserted = query(
                "INSERT INTO journal_events (stream_name, stream_position, event_id, event_type, payload)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(name.as_ref())
            .bind(position_from_version(position, Operation::Append)?)
            .bind(Uuid::now_v7())
            .bind(event_type.as_ref())
            .bind(payload)
            .execute(&mut *tx)
            .await;

            if let Err(error) = inserted {
                if is_unique_violation(&error) {
                    drop(tx);
                    return Err(self.conflict_after_race(name, expected).await);
                }
                return Err(map_sqlx_error(error, Operation::Append));
            }
        }

        // The result reflects storage, not the caller's snapshot of the history.
        let stored = stored_events(&mut tx, &name, Operation::Append).await?;

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))?;

        let stored = NewEvents::try_from(stored).map_err(|_| BackendError::StoreFailure {
            operation: Operation::Append,
            detail: format!("stream '{name}' has no events after appending"),
        })?;
        let committed = LoadedStream::new(name, stored);
        info!(
            version = %committed.version(),
            "[postgres.append] committed events"
        );
        Ok(committed)
    }
}

impl<E> PostgresStreamBackend<E> {
    /// Builds the conflict for an insert that lost a race on the primary key.
    async fn conflict_after_race(&self, name: StreamName, expected: StreamVersion) -> BackendError {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(error) => return map_sqlx_error(error, Operation::Load),
        };
        match current_version(&mut conn, &name, Operation::Load).await {
            Ok(actual) => {
                warn!(
                    %actual,
                    "[postgres.append] position already taken by a concurrent append"
                );
                BackendError::VersionConflict {
                    stream: name,
                    expected,
                    actual,
                }
            }
            Err(error) => error,
        }
    }
}

/// Committed events of `name` in position order; empty if it has none.
async fn stored_events<E: PersistableEvent>(
    conn: &mut PgConnection,
    name: &StreamName,
    operation: Operation,
) -> BackendResult<Vec<E>> {
    let rows = query(
        "SELECT event_type, payload FROM journal_events WHERE stream_name = $1 ORDER BY stream_position ASC",
    )
    .bind(name.as_ref())
    .fetch_all(&mut *conn)
    .await
    .map_err(|error| map_sqlx_error(error, operation))?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let event_type: String = row
            .try_get("event_type")
            .map_err(|error| map_sqlx_error(error, operation))?;
        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|error| map_sqlx_error(error, operation))?;
        let event_type = EventTypeName::try_new(event_type).map_err(|error| {
            BackendError::DeserializationFailed {
                stream: name.clone(),
                detail: format!("stored event type is invalid: {error}"),
            }
        })?;
        events.push(decode(name, &SerializedEvent { event_type, payload })?);
    }
    Ok(events)
}

/// Highest committed position of `name`, or 0 if it has none.
async fn current_version(
    conn: &mut PgConnection,
    name: &StreamName,
    operation: Operation,
) -> BackendResult<StreamVersion> {
    let row = query(
        "SELECT COALESCE(MAX(stream_position), 0) AS version FROM journal_events WHERE stream_name = $1",
    )
    .bind(name.as_ref())
    .fetch_one(conn)
    .await
    .map_err(|error| map_sqlx_error(error, operation))?;

    let position: i64 = row
        .try_get("version")
        .map_err(|error| map_sqlx_error(error, operation))?;
    version_from_position(position, operation)
}

fn position_from_version(version: StreamVersion, operation: Operation) -> BackendResult<i64> {
    i64::try_from(version.into_inner()).map_err(|_| BackendError::StoreFailure {
        operation,
        detail: format!("stream version {version} exceeds the BIGINT range"),
    })
}

fn version_from_position(position: i64, operation: Operation) -> BackendResult<StreamVersion> {
    u64::try_from(position)
        .map(StreamVersion::new)
        .map_err(|_| BackendError::StoreFailure {
            operation,
            detail: format!("negative stream position {position} in journal_events"),
        })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> BackendError {
    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    BackendError::StoreFailure {
        operation,
        detail: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn infrastructure_errors_become_store_failures() {
        let mapped = map_sqlx_error(sqlx::Error::PoolTimedOut, Operation::BeginTransaction);

        assert!(matches!(
            mapped,
            BackendError::StoreFailure {
                operation: Operation::BeginTransaction,
                ..
            }
        ));
        assert!(logs_contain("[postgres.database_error] database operation failed"));
    }

    #[test]
    fn pool_timeouts_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn positions_and_versions_convert_both_ways() {
        let version = StreamVersion::new(42);
        let position = position_from_version(version, Operation::Append).expect("fits in i64");
        assert_eq!(position, 42);
        assert_eq!(
            version_from_position(position, Operation::Load).expect("non-negative"),
            version
        );
    }

    #[test]
    fn out_of_range_values_are_store_failures() {
        assert!(position_from_version(StreamVersion::new(u64::MAX), Operation::Append).is_err());
        assert!(version_from_position(-1, Operation::Load).is_err());
    }

    #[test]
    fn setup_errors_render_readably() {
        let error = PostgresBackendError::ConnectionFailed(sqlx::Error::PoolTimedOut);
        insta::assert_snapshot!(error.to_string(), @"failed to create postgres connection pool");
    }

    proptest! {
        #[test]
        fn every_storable_position_maps_back_to_itself(position in 0_i64..=i64::MAX) {
            let version = version_from_position(position, Operation::Load)
                .expect("non-negative positions are versions");
            prop_assert_eq!(position_from_version(version, Operation::Append), Ok(position));
        }
    }
}
