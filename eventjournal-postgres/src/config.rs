//! Connection pool configuration.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use nutype::nutype;

use crate::PostgresBackendError;

/// Environment variable overriding [`PostgresConfig::max_connections`].
pub const MAX_CONNECTIONS_VAR: &str = "JOURNAL_DB_MAX_CONNECTIONS";
/// Environment variable overriding [`PostgresConfig::acquire_timeout`], in seconds.
pub const ACQUIRE_TIMEOUT_VAR: &str = "JOURNAL_DB_ACQUIRE_TIMEOUT_SECS";
/// Environment variable overriding [`PostgresConfig::idle_timeout`], in seconds.
pub const IDLE_TIMEOUT_VAR: &str = "JOURNAL_DB_IDLE_TIMEOUT_SECS";

/// Maximum number of database connections in the pool.
///
/// At least 1, enforced by the `NonZeroU32` underneath.
///
/// ```
/// use eventjournal_postgres::MaxConnections;
/// use std::num::NonZeroU32;
///
/// let small_pool = MaxConnections::new(NonZeroU32::new(5).expect("5 is non-zero"));
/// assert_eq!(small_pool.into_inner().get(), 5);
/// ```
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(NonZeroU32);

/// Configuration for the [`PostgresStreamBackend`](crate::PostgresStreamBackend) pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = match NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PostgresConfig {
    /// Sets the pool size.
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: MaxConnections) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Sets how long to wait for a free connection.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Sets how long an unused connection stays open.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Defaults overridden by `JOURNAL_DB_MAX_CONNECTIONS`,
    /// `JOURNAL_DB_ACQUIRE_TIMEOUT_SECS` and `JOURNAL_DB_IDLE_TIMEOUT_SECS`.
    ///
    /// Unset variables keep their default. A set but unparsable variable is a
    /// [`PostgresBackendError::Configuration`] error.
    pub fn from_env() -> Result<Self, PostgresBackendError> {
        Self::from_lookup(|variable| std::env::var(variable).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, PostgresBackendError> {
        let defaults = Self::default();

        let max_connections = parse_var::<NonZeroU32>(&lookup, MAX_CONNECTIONS_VAR)?
            .map_or(defaults.max_connections, MaxConnections::new);
        let acquire_timeout = parse_var::<u64>(&lookup, ACQUIRE_TIMEOUT_VAR)?
            .map_or(defaults.acquire_timeout, Duration::from_secs);
        let idle_timeout = parse_var::<u64>(&lookup, IDLE_TIMEOUT_VAR)?
            .map_or(defaults.idle_timeout, Duration::from_secs);

        Ok(Self {
            max_connections,
            acquire_timeout,
            idle_timeout,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    variable: &'static str,
) -> Result<Option<T>, PostgresBackendError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(variable)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|error| PostgresBackendError::Configuration {
                    variable,
                    value: raw.clone(),
                    reason: error.to_string(),
                })
        })
        .transpose()
}
