//! Controlled resources and the per-type capability table.
//!
//! A resource is a plain struct carrying a tagged union of type-specific
//! attributes. Behavior that differs per type (validation, cloud platform, wire
//! rendering, IAM resource type) lives in a [`ResourceCapabilityTable`] built
//! once at startup and passed to whoever needs it.

use std::collections::HashMap;

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{ResourceId, WorkspaceId};
use crate::workspace::CloudPlatform;

/// Discriminant of [`ResourceAttributes`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    GcsBucket,
    BigQueryDataset,
    AiNotebookInstance,
    AzureStorageContainer,
    AzureDisk,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::GcsBucket,
        ResourceType::BigQueryDataset,
        ResourceType::AiNotebookInstance,
        ResourceType::AzureStorageContainer,
        ResourceType::AzureDisk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::GcsBucket => "GCS_BUCKET",
            ResourceType::BigQueryDataset => "BIG_QUERY_DATASET",
            ResourceType::AiNotebookInstance => "AI_NOTEBOOK_INSTANCE",
            ResourceType::AzureStorageContainer => "AZURE_STORAGE_CONTAINER",
            ResourceType::AzureDisk => "AZURE_DISK",
        }
    }
}

impl core::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::UnsupportedResourceType(s.to_string()))
    }
}

/// Type-specific attributes of a controlled resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resource_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceAttributes {
    GcsBucket {
        bucket_name: String,
        location: Option<String>,
    },
    BigQueryDataset {
        dataset_id: String,
        location: Option<String>,
    },
    AiNotebookInstance {
        instance_id: String,
        location: String,
    },
    AzureStorageContainer {
        container_name: String,
    },
    AzureDisk {
        disk_name: String,
        size_gb: u32,
    },
}

impl ResourceAttributes {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceAttributes::GcsBucket { .. } => ResourceType::GcsBucket,
            ResourceAttributes::BigQueryDataset { .. } => ResourceType::BigQueryDataset,
            ResourceAttributes::AiNotebookInstance { .. } => ResourceType::AiNotebookInstance,
            ResourceAttributes::AzureStorageContainer { .. } => {
                ResourceType::AzureStorageContainer
            }
            ResourceAttributes::AzureDisk { .. } => ResourceType::AzureDisk,
        }
    }

    /// Name of the underlying cloud object.
    pub fn cloud_name(&self) -> &str {
        match self {
            ResourceAttributes::GcsBucket { bucket_name, .. } => bucket_name,
            ResourceAttributes::BigQueryDataset { dataset_id, .. } => dataset_id,
            ResourceAttributes::AiNotebookInstance { instance_id, .. } => instance_id,
            ResourceAttributes::AzureStorageContainer { container_name } => container_name,
            ResourceAttributes::AzureDisk { disk_name, .. } => disk_name,
        }
    }

    /// Same attributes naming a different cloud object.
    pub fn with_cloud_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            ResourceAttributes::GcsBucket { bucket_name, .. } => *bucket_name = name,
            ResourceAttributes::BigQueryDataset { dataset_id, .. } => *dataset_id = name,
            ResourceAttributes::AiNotebookInstance { instance_id, .. } => *instance_id = name,
            ResourceAttributes::AzureStorageContainer { container_name } => {
                *container_name = name
            }
            ResourceAttributes::AzureDisk { disk_name, .. } => *disk_name = name,
        }
        self
    }
}

/// A resource whose cloud lifecycle is managed by the workspace manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlledResource {
    pub workspace_id: WorkspaceId,
    pub resource_id: ResourceId,
    pub name: String,
    pub description: Option<String>,
    pub attributes: ResourceAttributes,
}

impl ControlledResource {
    pub fn resource_type(&self) -> ResourceType {
        self.attributes.resource_type()
    }
}

/// How much of a resource a clone copies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloningInstructions {
    /// Skip the resource.
    CopyNothing,
    /// New empty resource with the same definition.
    CopyDefinition,
    /// New resource plus a copy of its data.
    CopyResource,
    /// Referenced resource pointing at the source.
    CopyReference,
}

impl CloningInstructions {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloningInstructions::CopyNothing => "COPY_NOTHING",
            CloningInstructions::CopyDefinition => "COPY_DEFINITION",
            CloningInstructions::CopyResource => "COPY_RESOURCE",
            CloningInstructions::CopyReference => "COPY_REFERENCE",
        }
    }
}

impl core::fmt::Display for CloningInstructions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior attached to one resource type.
#[derive(Debug, Clone, Copy)]
pub struct ResourceCapabilities {
    pub cloud_platform: CloudPlatform,
    /// IAM resource type used when creating/deleting the resource's policy.
    pub iam_resource_type: &'static str,
    pub validate: fn(&ResourceAttributes) -> DomainResult<()>,
    pub to_wire: fn(&ControlledResource, CloudPlatform) -> JsonValue,
}

/// Immutable lookup table from resource type to its capabilities.
#[derive(Debug, Clone)]
pub struct ResourceCapabilityTable {
    entries: HashMap<ResourceType, ResourceCapabilities>,
}

impl ResourceCapabilityTable {
    /// Table covering every built-in resource type.
    pub fn standard() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ResourceType::GcsBucket,
            ResourceCapabilities {
                cloud_platform: CloudPlatform::Gcp,
                iam_resource_type: "controlled-user-shared-bucket",
                validate: validate_bucket,
                to_wire: wire_format,
            },
        );
        entries.insert(
            ResourceType::BigQueryDataset,
            ResourceCapabilities {
                cloud_platform: CloudPlatform::Gcp,
                iam_resource_type: "controlled-user-shared-dataset",
                validate: validate_dataset,
                to_wire: wire_format,
            },
        );
        entries.insert(
            ResourceType::AiNotebookInstance,
            ResourceCapabilities {
                cloud_platform: CloudPlatform::Gcp,
                iam_resource_type: "controlled-user-private-notebook",
                validate: validate_notebook,
                to_wire: wire_format,
            },
        );
        entries.insert(
            ResourceType::AzureStorageContainer,
            ResourceCapabilities {
                cloud_platform: CloudPlatform::Azure,
                iam_resource_type: "controlled-user-shared-container",
                validate: validate_container,
                to_wire: wire_format,
            },
        );
        entries.insert(
            ResourceType::AzureDisk,
            ResourceCapabilities {
                cloud_platform: CloudPlatform::Azure,
                iam_resource_type: "controlled-user-private-disk",
                validate: validate_disk,
                to_wire: wire_format,
            },
        );
        Self { entries }
    }

    /// Table restricted to the given resource types.
    pub fn only(types: &[ResourceType]) -> Self {
        let mut table = Self::standard();
        table.entries.retain(|t, _| types.contains(t));
        table
    }

    pub fn get(&self, resource_type: ResourceType) -> DomainResult<&ResourceCapabilities> {
        self.entries
            .get(&resource_type)
            .ok_or_else(|| DomainError::UnsupportedResourceType(resource_type.to_string()))
    }

    pub fn cloud_platform(&self, resource: &ControlledResource) -> DomainResult<CloudPlatform> {
        Ok(self.get(resource.resource_type())?.cloud_platform)
    }

    pub fn validate(&self, resource: &ControlledResource) -> DomainResult<()> {
        if resource.name.trim().is_empty() {
            return Err(DomainError::validation("resource name must not be empty"));
        }
        let caps = self.get(resource.resource_type())?;
        (caps.validate)(&resource.attributes)
    }

    pub fn to_wire(&self, resource: &ControlledResource) -> DomainResult<JsonValue> {
        let caps = self.get(resource.resource_type())?;
        Ok((caps.to_wire)(resource, caps.cloud_platform))
    }

    /// Two-phase decode of a serialized resource.
    ///
    /// The `attributes.resource_type` discriminant is read and checked against
    /// the table before the typed payload is decoded.
    pub fn decode(&self, value: JsonValue) -> DomainResult<ControlledResource> {
        let tag = value
            .get("attributes")
            .and_then(|a| a.get("resource_type"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| DomainError::validation("missing attributes.resource_type"))?;
        let resource_type: ResourceType = tag.parse()?;
        self.get(resource_type)?;

        serde_json::from_value(value)
            .map_err(|e| DomainError::validation(format!("malformed {resource_type}: {e}")))
    }
}

fn wire_format(resource: &ControlledResource, platform: CloudPlatform) -> JsonValue {
    serde_json::json!({
        "workspace_id": resource.workspace_id,
        "resource_id": resource.resource_id,
        "name": resource.name,
        "description": resource.description,
        "resource_type": resource.resource_type(),
        "cloud_platform": platform,
        "attributes": resource.attributes,
    })
}

fn check_name(kind: &str, name: &str, min: usize, max: usize, allowed: fn(char) -> bool) -> DomainResult<()> {
    if (min..=max).contains(&name.len()) && name.chars().all(allowed) {
        Ok(())
    } else {
        Err(DomainError::validation(format!("invalid {kind} name '{name}'")))
    }
}

fn validate_bucket(attrs: &ResourceAttributes) -> DomainResult<()> {
    match attrs {
        ResourceAttributes::GcsBucket { bucket_name, .. } => {
            check_name("bucket", bucket_name, 3, 63, |c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')
            })
        }
        other => Err(mismatch(ResourceType::GcsBucket, other)),
    }
}

fn validate_dataset(attrs: &ResourceAttributes) -> DomainResult<()> {
    match attrs {
        ResourceAttributes::BigQueryDataset { dataset_id, .. } => {
            check_name("dataset", dataset_id, 1, 1024, |c| {
                c.is_ascii_alphanumeric() || c == '_'
            })
        }
        other => Err(mismatch(ResourceType::BigQueryDataset, other)),
    }
}

fn validate_notebook(attrs: &ResourceAttributes) -> DomainResult<()> {
    match attrs {
        ResourceAttributes::AiNotebookInstance { instance_id, .. } => {
            if !instance_id.starts_with(|c: char| c.is_ascii_lowercase()) {
                return Err(DomainError::validation(format!(
                    "notebook instance id '{instance_id}' must start with a lowercase letter"
                )));
            }
            check_name("notebook instance", instance_id, 1, 63, |c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
            })
        }
        other => Err(mismatch(ResourceType::AiNotebookInstance, other)),
    }
}

fn validate_container(attrs: &ResourceAttributes) -> DomainResult<()> {
    match attrs {
        ResourceAttributes::AzureStorageContainer { container_name } => {
            check_name("storage container", container_name, 3, 63, |c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
            })
        }
        other => Err(mismatch(ResourceType::AzureStorageContainer, other)),
    }
}

fn validate_disk(attrs: &ResourceAttributes) -> DomainResult<()> {
    match attrs {
        ResourceAttributes::AzureDisk { disk_name, size_gb } => {
            if *size_gb == 0 {
                return Err(DomainError::validation("disk size must be positive"));
            }
            check_name("disk", disk_name, 1, 80, |c| {
                c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
            })
        }
        other => Err(mismatch(ResourceType::AzureDisk, other)),
    }
}

fn mismatch(expected: ResourceType, found: &ResourceAttributes) -> DomainError {
    DomainError::validation(format!(
        "expected {expected} attributes, found {}",
        found.resource_type()
    ))
}
