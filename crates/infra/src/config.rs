//! Service configuration read from the environment.
//!
//! | variable                        | default            |
//! |---------------------------------|--------------------|
//! | `DATABASE_URL`                  | unset: in-memory   |
//! | `WSM_MAX_CONCURRENT_FLIGHTS`    | 16                 |
//! | `WSM_FLIGHT_POLL_INTERVAL_MS`   | 100                |
//! | `WSM_MAX_FLIGHT_DURATION_SECS`  | unset: unbounded   |
//! | `WSM_JOB_TIMEOUT_SECS`          | 3600               |
//! | `WSM_FLIGHT_LEASE_SECS`         | 60                 |
//! | `WSM_INSTANCE_ID`               | random per process |

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::executor::ExecutorConfig;
use crate::jobs::JobConfig;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const MAX_CONCURRENT_FLIGHTS: &str = "WSM_MAX_CONCURRENT_FLIGHTS";
pub const FLIGHT_POLL_INTERVAL_MS: &str = "WSM_FLIGHT_POLL_INTERVAL_MS";
pub const MAX_FLIGHT_DURATION_SECS: &str = "WSM_MAX_FLIGHT_DURATION_SECS";
pub const JOB_TIMEOUT_SECS: &str = "WSM_JOB_TIMEOUT_SECS";
pub const FLIGHT_LEASE_SECS: &str = "WSM_FLIGHT_LEASE_SECS";
pub const INSTANCE_ID: &str = "WSM_INSTANCE_ID";

const KEYS: [&str; 7] = [
    DATABASE_URL,
    MAX_CONCURRENT_FLIGHTS,
    FLIGHT_POLL_INTERVAL_MS,
    MAX_FLIGHT_DURATION_SECS,
    JOB_TIMEOUT_SECS,
    FLIGHT_LEASE_SECS,
    INSTANCE_ID,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}='{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Postgres DSN for the flight store; `None` keeps flights in memory.
    pub database_url: Option<String>,
    pub max_concurrent_flights: usize,
    pub poll_interval: Duration,
    pub max_flight_duration: Option<Duration>,
    pub job_timeout: Duration,
    /// How long a flight stays claimed by this instance without a heartbeat.
    pub flight_lease: Duration,
    /// Lease owner name; must differ between processes sharing a database.
    pub instance_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        Self {
            database_url: None,
            max_concurrent_flights: executor.max_concurrent_flights,
            poll_interval: executor.poll_interval,
            max_flight_duration: executor.max_flight_duration,
            job_timeout: JobConfig::default().timeout,
            flight_lease: executor.lease,
            instance_id: executor.instance_id,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut envs = HashMap::new();
        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key, value);
            }
        }
        Self::from_env_map(&envs)
    }

    fn from_env_map(envs: &HashMap<&'static str, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &'static str| {
            envs.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_concurrent_flights = match get(MAX_CONCURRENT_FLIGHTS) {
            Some(raw) => match parse_u64(MAX_CONCURRENT_FLIGHTS, &raw)? {
                0 => return Err(invalid(MAX_CONCURRENT_FLIGHTS, &raw, "must be at least 1")),
                n => usize::try_from(n)
                    .map_err(|e| invalid(MAX_CONCURRENT_FLIGHTS, &raw, e))?,
            },
            None => defaults.max_concurrent_flights,
        };
        let poll_interval = match get(FLIGHT_POLL_INTERVAL_MS) {
            Some(raw) => Duration::from_millis(parse_u64(FLIGHT_POLL_INTERVAL_MS, &raw)?.max(1)),
            None => defaults.poll_interval,
        };
        let max_flight_duration = match get(MAX_FLIGHT_DURATION_SECS) {
            Some(raw) => Some(Duration::from_secs(parse_u64(MAX_FLIGHT_DURATION_SECS, &raw)?)),
            None => defaults.max_flight_duration,
        };
        let job_timeout = match get(JOB_TIMEOUT_SECS) {
            Some(raw) => Duration::from_secs(parse_u64(JOB_TIMEOUT_SECS, &raw)?),
            None => defaults.job_timeout,
        };
        let flight_lease = match get(FLIGHT_LEASE_SECS) {
            Some(raw) => match parse_u64(FLIGHT_LEASE_SECS, &raw)? {
                0 => return Err(invalid(FLIGHT_LEASE_SECS, &raw, "must be at least 1")),
                n => Duration::from_secs(n),
            },
            None => defaults.flight_lease,
        };

        Ok(Self {
            database_url: get(DATABASE_URL),
            max_concurrent_flights,
            poll_interval,
            max_flight_duration,
            job_timeout,
            flight_lease,
            instance_id: get(INSTANCE_ID).unwrap_or(defaults.instance_id),
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let config = ExecutorConfig::default()
            .with_max_concurrent_flights(self.max_concurrent_flights)
            .with_poll_interval(self.poll_interval)
            .with_lease(self.flight_lease)
            .with_instance_id(self.instance_id.clone());
        match self.max_flight_duration {
            Some(max) => config.with_max_flight_duration(max),
            None => config,
        }
    }

    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            timeout: self.job_timeout,
        }
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|e| invalid(key, raw, e))
}

fn invalid(key: &'static str, raw: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}
