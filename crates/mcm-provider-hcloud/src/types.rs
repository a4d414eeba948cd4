use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Secret key carrying the Hetzner Cloud API token.
pub const TOKEN_KEY: &str = "token";
/// Secret key carrying the cloud-init user data for new servers.
pub const USER_DATA_KEY: &str = "userData";

/// The machine object handed over by the machine controller manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl Machine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_id: None,
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Provider ID, treating an empty string as unset.
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Machine template; `provider_spec` is the raw, not yet validated blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineClass {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider_spec: serde_json::Value,
}

impl MachineClass {
    pub fn new(name: impl Into<String>, provider_spec: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            provider_spec,
        }
    }
}

/// Credentials and user data. Values are base64 in their JSON form, like
/// Kubernetes secret data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default, with = "base64_map")]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn token(&self) -> Option<String> {
        self.data
            .get(TOKEN_KEY)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
    }

    pub fn user_data(&self) -> Option<&[u8]> {
        self.data.get(USER_DATA_KEY).map(Vec::as_slice)
    }
}

mod base64_map {
    use std::collections::BTreeMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        data: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = data
            .iter()
            .map(|(key, value)| (key.as_str(), STANDARD.encode(value)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(key, value)| match STANDARD.decode(value.as_bytes()) {
                Ok(bytes) => Ok((key, bytes)),
                Err(e) => Err(serde::de::Error::custom(format!(
                    "secret key {key} is not valid base64: {e}"
                ))),
            })
            .collect()
    }
}

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineRequest {
    pub machine: Machine,
    pub machine_class: MachineClass,
    pub secret: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMachineRequest {
    pub machine: Machine,
    pub machine_class: MachineClass,
    pub secret: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineStatusRequest {
    pub machine: Machine,
    pub machine_class: MachineClass,
    pub secret: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesRequest {
    pub machine_class: MachineClass,
    pub secret: Secret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumeIdsRequest {
    #[serde(default)]
    pub pv_specs: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeMachineRequest {
    pub machine: Machine,
    pub machine_class: MachineClass,
    pub secret: Secret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateMachineClassForMigrationRequest {
    #[serde(default)]
    pub provider_specific_machine_class: serde_json::Value,
    #[serde(default)]
    pub machine_class: Option<MachineClass>,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineResponse {
    pub provider_id: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMachineResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMachineStatusResponse {
    pub provider_id: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMachinesResponse {
    /// Provider ID to node name.
    pub machine_list: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVolumeIdsResponse {
    pub volume_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeMachineResponse {
    pub provider_id: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateMachineClassForMigrationResponse {}
