//! Infrastructure layer: flight persistence and execution, the job API,
//! metadata DAOs, cloud adapters, config and the built-in flights.

pub mod activity_log;
pub mod cloud;
pub mod config;
pub mod dao;
pub mod executor;
pub mod flight_store;
pub mod flights;
pub mod jobs;


pub use activity_log::ActivityLogHook;
pub use config::{ConfigError, ServiceConfig};
pub use executor::{ExecutorConfig, ExecutorError, FlightExecutor, FlightOutcome};
pub use flight_store::{FlightStore, FlightStoreError, InMemoryFlightStore, PostgresFlightStore};
pub use flights::{FlightServices, register_flights};
pub use jobs::{JobConfig, JobError, JobService, NewJob};
