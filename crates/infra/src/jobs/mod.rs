//! Async job API on top of the flight executor.
//!
//! ## Design
//!
//! - A job is a flight plus caller metadata (description, requester,
//!   operation type, target workspace) stored in the flight's input map
//! - The job id is the flight id and doubles as the idempotency key
//! - Callers poll with `retrieve_async_job_result` or block with
//!   `Job::submit_and_wait`

pub mod keys;
pub mod service;
pub mod types;

pub use service::{Job, JobService};
pub use types::{AsyncJobResult, ErrorReport, JobConfig, JobError, JobReport, JobStatus, NewJob};
