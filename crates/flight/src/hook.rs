//! Completion hooks.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::FlightRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    /// A code path the hook does not handle; needs a code change.
    #[error("unhandled case in hook: {0}")]
    Unhandled(String),

    #[error("hook failed: {0}")]
    Failed(String),
}

/// Observer invoked when a flight reaches a terminal state.
///
/// Hooks may be invoked again for the same flight if the process stops before
/// their completion is recorded, so their side effects must be idempotent.
#[async_trait]
pub trait FlightHook: Send + Sync {
    fn name(&self) -> &str;

    async fn end_flight(&self, record: &FlightRecord) -> Result<(), HookError>;
}
