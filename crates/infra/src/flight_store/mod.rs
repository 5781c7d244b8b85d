//! Durable flight record storage.
//!
//! The executor writes a record before acknowledging a submission and after
//! every step outcome; recovery reads back whatever is not finished.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryFlightStore;
pub use postgres::PostgresFlightStore;
pub use r#trait::{FlightStore, FlightStoreError};
