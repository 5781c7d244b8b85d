//! `wsm-core`: workspace manager domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the workspace and controlled-resource model, and the capability
//! table used to dispatch per-resource-type behavior.

pub mod error;
pub mod id;
pub mod operation;
pub mod resource;
pub mod workspace;

pub use error::{DomainError, DomainResult};
pub use id::{ResourceId, UserId, WorkspaceId};
pub use operation::OperationType;
pub use resource::{
    CloningInstructions, ControlledResource, ResourceAttributes, ResourceCapabilities, ResourceCapabilityTable,
    ResourceType,
};
pub use workspace::{CloudContext, CloudPlatform, Workspace, WorkspaceStage};
