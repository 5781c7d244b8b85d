//! Workspace and cloud-context model.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{UserId, WorkspaceId};

/// Cloud platform hosting a workspace's cloud context or a controlled resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudPlatform {
    Gcp,
    Azure,
}

impl CloudPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudPlatform::Gcp => "GCP",
            CloudPlatform::Azure => "AZURE",
        }
    }
}

impl core::fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudPlatform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GCP" => Ok(CloudPlatform::Gcp),
            "AZURE" => Ok(CloudPlatform::Azure),
            other => Err(DomainError::validation(format!(
                "unknown cloud platform '{other}'"
            ))),
        }
    }
}

/// Workspace stage: who owns the workspace's authorization resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStage {
    /// Authorization resource is created and owned by the workspace manager.
    #[default]
    McWorkspace,
    /// Authorization resource pre-exists and is owned by another system.
    RawlsWorkspace,
}

/// A workspace: the unit of ownership for cloud contexts and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub user_facing_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub stage: WorkspaceStage,
    pub created_by: Option<UserId>,
}

const MAX_DISPLAY_NAME_LEN: usize = 1024;

impl Workspace {
    pub fn new(id: WorkspaceId, user_facing_id: impl Into<String>) -> Self {
        Self {
            id,
            user_facing_id: user_facing_id.into(),
            display_name: None,
            description: None,
            stage: WorkspaceStage::default(),
            created_by: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_stage(mut self, stage: WorkspaceStage) -> Self {
        self.stage = stage;
        self
    }

    /// Validate user-supplied fields.
    ///
    /// User-facing ids are 3-63 characters of lowercase letters, digits, `-` and
    /// `_`, starting with a letter or digit.
    pub fn validate(&self) -> DomainResult<()> {
        validate_user_facing_id(&self.user_facing_id)?;
        if let Some(name) = &self.display_name {
            if name.len() > MAX_DISPLAY_NAME_LEN {
                return Err(DomainError::validation(format!(
                    "display name exceeds {MAX_DISPLAY_NAME_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

fn validate_user_facing_id(id: &str) -> DomainResult<()> {
    let len_ok = (3..=63).contains(&id.len());
    let first_ok = id
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let chars_ok = id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if len_ok && first_ok && chars_ok {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "invalid user-facing workspace id '{id}'"
        )))
    }
}

/// A workspace's binding to a cloud platform (a GCP project or an Azure
/// managed resource group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudContext {
    pub platform: CloudPlatform,
    /// Project id (GCP) or managed resource group id (Azure).
    pub cloud_id: String,
    /// Flight that created the context; undo only removes contexts it owns.
    pub creating_flight_id: String,
}
