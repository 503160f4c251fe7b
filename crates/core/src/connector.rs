//! Connector entity, container spec, and administrative DTOs.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;
use crate::ids;
use crate::status::ConnectorStatus;
use crate::types::{Timestamp, Version};

/// Maximum connector name length.
pub const MAX_NAME_LEN: usize = 128;

/// Maximum connector description length.
pub const MAX_DESCRIPTION_LEN: usize = 1000;

const DEFAULT_CPU: f64 = 1.0;
const DEFAULT_MEMORY_MIB: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u32 = 3600;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid connector name regex"));

/// Compute resources requested for each job container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// vCPUs, e.g. `0.5` or `2.0`.
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    /// Memory in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU,
            memory_mib: DEFAULT_MEMORY_MIB,
        }
    }
}

/// What the execution backend runs for every job of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image reference.
    pub image_uri: String,
    /// Identity the backend uses to pull and launch the container.
    pub execution_role: String,
    /// Identity the running container assumes, if different.
    #[serde(default)]
    pub job_role: Option<String>,
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
    /// Attempt timeout enforced by the backend. `0` means no timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
}

fn default_cpu() -> f64 {
    DEFAULT_CPU
}

fn default_memory_mib() -> u32 {
    DEFAULT_MEMORY_MIB
}

fn default_timeout_secs() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

impl ContainerSpec {
    /// Returns an empty `Vec` if valid; otherwise a list of human-readable errors.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.image_uri.trim().is_empty() {
            errors.push("container_spec.image_uri must not be empty".to_string());
        }
        if self.execution_role.trim().is_empty() {
            errors.push("container_spec.execution_role must not be empty".to_string());
        }
        if !(self.resource_requirements.cpu > 0.0) {
            errors.push("container_spec.resource_requirements.cpu must be positive".to_string());
        }
        if self.resource_requirements.memory_mib == 0 {
            errors.push("container_spec.resource_requirements.memory_mib must be positive".to_string());
        }

        errors
    }
}

/// A logical, long-lived integration target with mutually exclusive job
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_id: String,
    pub name: String,
    pub description: Option<String>,
    pub container_spec: ContainerSpec,
    pub status: ConnectorStatus,
    /// The job holding the connector while `IN_USE`.
    pub active_job_id: Option<String>,
    pub version: Version,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for `POST /api/v1/connectors`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConnector {
    pub name: String,
    pub description: Option<String>,
    pub container_spec: ContainerSpec,
}

/// DTO for `PUT /api/v1/connectors/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorUpdate {
    pub name: Option<String>,
    /// `Some(None)` (an explicit JSON `null`) clears the description.
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub container_spec: Option<ContainerSpec>,
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn validate_name(name: &str, errors: &mut Vec<String>) {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        errors.push(format!("name must be 1-{MAX_NAME_LEN} characters"));
    } else if !NAME_RE.is_match(name) {
        errors.push("name may only contain letters, digits and '-'".to_string());
    }
}

fn validate_description(description: Option<&str>, errors: &mut Vec<String>) {
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        errors.push(format!("description must be at most {MAX_DESCRIPTION_LEN} characters"));
    }
}

fn into_result(errors: Vec<String>) -> Result<(), CoreError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation(errors.join("; ")))
    }
}

impl NewConnector {
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut errors = Vec::new();
        validate_name(&self.name, &mut errors);
        validate_description(self.description.as_deref(), &mut errors);
        errors.extend(self.container_spec.validate());
        into_result(errors)
    }
}

impl ConnectorUpdate {
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            validate_name(name, &mut errors);
        }
        validate_description(self.description.clone().flatten().as_deref(), &mut errors);
        if let Some(spec) = &self.container_spec {
            errors.extend(spec.validate());
        }
        into_result(errors)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.container_spec.is_none()
    }
}

impl Connector {
    /// Build an unsaved, `AVAILABLE` connector with a fresh id.
    pub fn new(input: NewConnector, now: Timestamp) -> Self {
        Self {
            connector_id: ids::new_connector_id(),
            name: input.name,
            description: input.description,
            container_spec: input.container_spec,
            status: ConnectorStatus::Available,
            active_job_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ConnectorStatus::Available
    }

    /// `AVAILABLE -> IN_USE` on behalf of `job_id`.
    pub fn acquire(&self, job_id: &str, now: Timestamp) -> Result<Connector, CoreError> {
        if !self.is_available() {
            return Err(CoreError::Conflict(format!(
                "Connector '{}' is in state '{}' and is not AVAILABLE",
                self.connector_id, self.status
            )));
        }

        let mut next = self.clone();
        next.status = ConnectorStatus::InUse;
        next.active_job_id = Some(job_id.to_string());
        next.updated_at = now;
        Ok(next)
    }

    /// `IN_USE -> AVAILABLE`, only if `job_id` is the job holding it.
    ///
    /// Returns `None` when there is nothing to release.
    pub fn release(&self, job_id: &str, now: Timestamp) -> Option<Connector> {
        if self.status != ConnectorStatus::InUse || self.active_job_id.as_deref() != Some(job_id) {
            return None;
        }

        let mut next = self.clone();
        next.status = ConnectorStatus::Available;
        next.active_job_id = None;
        next.updated_at = now;
        Some(next)
    }

    pub fn apply_update(&self, update: &ConnectorUpdate, now: Timestamp) -> Connector {
        let mut next = self.clone();
        if let Some(name) = &update.name {
            next.name = name.clone();
        }
        if let Some(description) = &update.description {
            next.description = description.clone();
        }
        if let Some(spec) = &update.container_spec {
            next.container_spec = spec.clone();
        }
        next.updated_at = now;
        next
    }
}
