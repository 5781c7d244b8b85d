//! `wsm-auth`: identity and authorization boundary.
//!
//! The IAM service is an external collaborator. This crate defines the caller
//! identity carried through flights and the capability surface steps use to
//! check access and manage IAM resources. It is intentionally decoupled from
//! HTTP and storage.

pub mod authorize;
pub mod permissions;
pub mod user;

pub use authorize::{AuthorizationService, AuthzError, InMemoryAuthorizationService, IamResource};
pub use permissions::IamAction;
pub use user::AuthenticatedUserRequest;
