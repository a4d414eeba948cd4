//! Hetzner Cloud resources as the driver sees them.
//!
//! Only the fields the lifecycle handlers read are kept. Unknown enum values
//! fall back to `Unknown` instead of failing the whole response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("hcloud {operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("hcloud {operation} returned {status}: {body}")]
    Api {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
}

impl CloudError {
    /// HTTP status reported by the API, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Request { .. } => None,
            Self::Api { status, .. } => Some(*status),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

// ── Servers ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub status: ServerStatus,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub public_net: PublicNet,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    #[serde(default)]
    pub datacenter: Option<DatacenterRef>,
    #[serde(default)]
    pub placement_group: Option<PlacementGroup>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Off => "off",
            Self::Deleting => "deleting",
            Self::Migrating => "migrating",
            Self::Rebuilding => "rebuilding",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicNet {
    #[serde(default)]
    pub ipv4: Option<Ipv4>,
    #[serde(default)]
    pub floating_ips: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ipv4 {
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateNet {
    pub network: i64,
    #[serde(default)]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatacenterRef {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CreateServerRequest {
    pub name: String,
    pub server_type: String,
    /// Image ID or name.
    pub image: String,
    pub datacenter: Option<String>,
    /// Already base64 encoded.
    pub user_data: Option<String>,
    pub labels: HashMap<String, String>,
    pub ssh_keys: Vec<i64>,
    pub networks: Vec<i64>,
    pub placement_group: Option<i64>,
    pub start_after_create: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServerResponse {
    pub server: Server,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub next_actions: Vec<Action>,
}

/// Filters for listing servers. Unset fields are left out of the query.
#[derive(Debug, Clone, Default)]
pub struct ListServersParams {
    pub name: Option<String>,
    pub label_selector: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListServersResponse {
    pub servers: Vec<Server>,
    #[serde(default)]
    pub meta: Option<Meta>,
}

impl ListServersResponse {
    /// Page number to request next, if the listing continues.
    pub fn next_page(&self) -> Option<i64> {
        self.meta.as_ref().and_then(|m| m.pagination.next_page)
    }
}

// ── Pagination ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
    #[serde(default)]
    pub previous_page: Option<i64>,
    #[serde(default)]
    pub next_page: Option<i64>,
    #[serde(default)]
    pub last_page: Option<i64>,
    #[serde(default)]
    pub total_entries: Option<i64>,
}

// ── Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: i64,
    pub command: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<ActionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}

// ── Images, SSH keys, networks, placement groups ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub deprecated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: i64,
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub ip_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub servers: Vec<i64>,
}

// ── Floating IPs ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(rename = "type")]
    pub kind: FloatingIpType,
    #[serde(default)]
    pub server: Option<i64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatingIpType {
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone)]
pub struct CreateFloatingIpRequest {
    pub name: String,
    pub kind: FloatingIpType,
    pub server: Option<i64>,
    pub home_location: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFloatingIpResponse {
    pub floating_ip: FloatingIp,
    #[serde(default)]
    pub action: Option<Action>,
}
