use async_trait::async_trait;

use crate::cloud::{
    Action, CloudResult, CreateFloatingIpRequest, CreateFloatingIpResponse, CreateServerRequest,
    CreateServerResponse, FloatingIp, Image, ListServersParams, ListServersResponse, Network,
    PlacementGroup, Server, SshKey,
};

/// The Hetzner Cloud calls the lifecycle handlers rely on.
///
/// Implemented by [`crate::hetzner::HetznerCloud`]; tests substitute an in-memory backend
/// through [`crate::ClientRegistry::set`].
#[async_trait]
pub trait CloudApi: Send + Sync + 'static {
    async fn get_server(&self, id: i64) -> CloudResult<Option<Server>>;

    async fn get_server_by_name(&self, name: &str) -> CloudResult<Option<Server>>;

    async fn list_servers(&self, params: &ListServersParams) -> CloudResult<ListServersResponse>;

    /// Create a server. Does not wait for its actions.
    async fn create_server(&self, req: &CreateServerRequest) -> CloudResult<CreateServerResponse>;

    /// Delete a server; deleting an absent server succeeds.
    async fn delete_server(&self, id: i64) -> CloudResult<()>;

    async fn power_on_server(&self, id: i64) -> CloudResult<Action>;

    async fn add_server_to_placement_group(&self, id: i64, placement_group: i64) -> CloudResult<Action>;

    /// Actions still executing against a server.
    async fn running_server_actions(&self, id: i64) -> CloudResult<Vec<Action>>;

    async fn list_images(&self, name: &str, include_deprecated: bool) -> CloudResult<Vec<Image>>;

    async fn get_ssh_key_by_fingerprint(&self, fingerprint: &str) -> CloudResult<Option<SshKey>>;

    async fn get_network_by_name(&self, name: &str) -> CloudResult<Option<Network>>;

    async fn get_placement_group(&self, id: i64) -> CloudResult<Option<PlacementGroup>>;

    async fn get_floating_ip(&self, id: i64) -> CloudResult<Option<FloatingIp>>;

    async fn get_floating_ip_by_name(&self, name: &str) -> CloudResult<Option<FloatingIp>>;

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> CloudResult<CreateFloatingIpResponse>;

    async fn assign_floating_ip(&self, id: i64, server: i64) -> CloudResult<Action>;

    /// Delete a floating IP; deleting an absent floating IP succeeds.
    async fn delete_floating_ip(&self, id: i64) -> CloudResult<()>;

    /// Actions still executing against a floating IP.
    async fn running_floating_ip_actions(&self, id: i64) -> CloudResult<Vec<Action>>;
}
