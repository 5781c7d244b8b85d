//! Well-known input-map keys set by the job service.
//!
//! Flights and hooks read these; they are part of the persisted record format
//! and must not be renamed.

/// Human-readable job description.
pub const DESCRIPTION: &str = "description";
/// Caller's request payload.
pub const REQUEST: &str = "request";
/// Working-map key holding the job result.
pub const RESPONSE: &str = wsm_flight::RESPONSE_KEY;
/// [`wsm_auth::AuthenticatedUserRequest`] of the submitter.
pub const AUTH_USER_INFO: &str = "auth_user_info";
/// [`wsm_core::OperationType`] recorded in the activity log.
pub const OPERATION_TYPE: &str = "operation_type";
pub const WORKSPACE_ID: &str = "workspace_id";
/// Serialized [`wsm_core::ControlledResource`] for resource flights.
pub const RESOURCE: &str = "resource";
/// [`wsm_core::CloningInstructions`] for a resource clone.
pub const CLONING_INSTRUCTIONS: &str = "cloning_instructions";
/// Workspace receiving a cloned resource.
pub const DESTINATION_WORKSPACE_ID: &str = "destination_workspace_id";
/// Id of the cloned resource; fixed by the caller so a resubmit reuses it.
pub const DESTINATION_RESOURCE_ID: &str = "destination_resource_id";
/// Optional name of the cloned resource; defaults to the source name.
pub const DESTINATION_RESOURCE_NAME: &str = "destination_resource_name";
/// Optional cloud object name of the clone; defaults to the source's.
pub const DESTINATION_CLOUD_NAME: &str = "destination_cloud_name";
