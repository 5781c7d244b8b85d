//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

/// The identity of the caller a job runs on behalf of.
///
/// This is an opaque token object as far as the flight engine is concerned:
/// it is stored in a flight's input map and handed to the steps that need to
/// act as the caller. Nothing outside the IAM boundary interprets it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUserRequest {
    pub email: String,
    pub subject_id: Option<String>,
    pub token: String,
}

impl AuthenticatedUserRequest {
    pub fn new(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            subject_id: None,
            token: token.into(),
        }
    }

    pub fn with_subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }
}

// Tokens must never reach logs.
impl core::fmt::Debug for AuthenticatedUserRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthenticatedUserRequest")
            .field("email", &self.email)
            .field("subject_id", &self.subject_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
