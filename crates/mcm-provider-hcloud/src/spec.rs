//! Provider spec carried in the machine class, and its validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::MachineClass;

/// User-declared machine template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub zone: String,
    #[serde(rename = "serverType", default)]
    pub server_type: String,
    #[serde(rename = "imageName", default)]
    pub image_name: String,
    #[serde(rename = "sshFingerprint", default)]
    pub ssh_fingerprint: String,

    #[serde(rename = "placementGroupID", default, skip_serializing_if = "Option::is_none")]
    pub placement_group_id: Option<String>,
    #[serde(rename = "floatingPoolName", default, skip_serializing_if = "Option::is_none")]
    pub floating_pool_name: Option<String>,
    #[serde(rename = "networkName", default, skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

impl ProviderSpec {
    pub fn placement_group_id(&self) -> Option<&str> {
        non_empty(&self.placement_group_id)
    }

    pub fn floating_pool_name(&self) -> Option<&str> {
        non_empty(&self.floating_pool_name)
    }

    pub fn network_name(&self) -> Option<&str> {
        non_empty(&self.network_name)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A mandatory field that was missing or empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is required field", self.field)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("provider spec of machine class {class:?} could not be decoded: {source}")]
    Decode {
        class: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("provider spec of machine class {class:?} is invalid: {}", join(.errors))]
    Invalid {
        class: String,
        errors: Vec<ValidationError>,
    },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Check every mandatory field, reporting all that are missing.
pub fn validate(spec: &ProviderSpec) -> Vec<ValidationError> {
    [
        ("cluster", &spec.cluster),
        ("zone", &spec.zone),
        ("serverType", &spec.server_type),
        ("imageName", &spec.image_name),
        ("sshFingerprint", &spec.ssh_fingerprint),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| ValidationError { field })
    .collect()
}

/// Decode and validate the provider spec of a machine class.
pub fn decode(class: &MachineClass) -> Result<ProviderSpec, SpecError> {
    let spec: ProviderSpec =
        serde_json::from_value(class.provider_spec.clone()).map_err(|source| SpecError::Decode {
            class: class.name.clone(),
            source,
        })?;

    let errors = validate(&spec);
    if !errors.is_empty() {
        return Err(SpecError::Invalid {
            class: class.name.clone(),
            errors,
        });
    }

    Ok(spec)
}
