use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::CloudApi;
use crate::cloud::{ListServersParams, Server};
use crate::create::{self, CreatePlan};
use crate::error::{Result, Status};
use crate::registry::ClientRegistry;
use crate::rollback::{self, RollbackIntent};
use crate::spec::{self, ProviderSpec};
use crate::types::*;
use crate::waiter::ActionWaiter;
use crate::{Driver, labels, provider_id};

/// Servers requested per page when listing.
pub const LIST_PAGE_SIZE: i64 = 50;

/// [`Driver`] backed by the Hetzner Cloud API.
pub struct HcloudDriver {
    registry: ClientRegistry,
    waiter: ActionWaiter,
}

impl HcloudDriver {
    pub fn new(registry: ClientRegistry, waiter: ActionWaiter) -> Self {
        Self { registry, waiter }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn waiter(&self) -> &ActionWaiter {
        &self.waiter
    }

    fn client(&self, secret: &Secret) -> Result<Arc<dyn CloudApi>> {
        match secret.token() {
            Some(token) if !token.trim().is_empty() => Ok(self.registry.get(&token)),
            _ => Err(Status::invalid_argument(format!(
                "Secret does not contain {TOKEN_KEY}"
            ))),
        }
    }
}

fn decode_spec(class: &MachineClass) -> Result<ProviderSpec> {
    spec::decode(class).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Find the machine's server by provider ID, or by name when it has none.
async fn find_server(client: &dyn CloudApi, machine: &Machine) -> Result<Option<Server>> {
    match machine.provider_id() {
        Some(raw) => {
            let id = provider_id::decode(raw).map_err(|e| Status::invalid_argument(e.to_string()))?;
            client.get_server(id.server_id).await.map_err(|e| {
                Status::unavailable(format!("Looking up server {} failed: {e}", id.server_id))
            })
        }
        None => client
            .get_server_by_name(&machine.name)
            .await
            .map_err(|e| Status::unavailable(format!("Looking up server {} failed: {e}", machine.name))),
    }
}

#[async_trait]
impl Driver for HcloudDriver {
    async fn create_machine(&self, req: &CreateMachineRequest) -> Result<CreateMachineResponse> {
        let machine = req.machine.name.as_str();
        if let Some(existing) = req.machine.provider_id() {
            return Err(Status::invalid_argument(format!(
                "Machine {machine} already has provider ID {existing}"
            )));
        }
        let spec = decode_spec(&req.machine_class)?;
        let user_data = req
            .secret
            .user_data()
            .ok_or_else(|| Status::internal(format!("Secret does not contain {USER_DATA_KEY}")))?;
        let client = self.client(&req.secret)?;

        tracing::info!(machine, zone = %spec.zone, server_type = %spec.server_type, "creating machine");

        let plan = CreatePlan {
            machine,
            spec: &spec,
            user_data,
        };
        let mut intent = RollbackIntent::default();
        match create::provision(client.as_ref(), &self.waiter, &plan, &mut intent).await {
            Ok(server) => {
                let provider_id = provider_id::encode(&spec.zone, server.id);
                tracing::info!(machine, %provider_id, "machine created");
                Ok(CreateMachineResponse {
                    provider_id,
                    node_name: server.name,
                })
            }
            Err(status) => {
                tracing::warn!(machine, code = %status.code, error = %status.message, "create failed, rolling back");
                rollback::roll_back(client.as_ref(), &spec, machine, &intent).await;
                Err(status)
            }
        }
    }

    async fn delete_machine(&self, req: &DeleteMachineRequest) -> Result<DeleteMachineResponse> {
        let machine = req.machine.name.as_str();
        let spec = decode_spec(&req.machine_class)?;
        let client = self.client(&req.secret)?;

        let Some(server) = find_server(client.as_ref(), &req.machine).await? else {
            tracing::info!(machine, "server already gone");
            return Ok(DeleteMachineResponse {});
        };

        client
            .delete_server(server.id)
            .await
            .map_err(|e| Status::unavailable(format!("Deleting server {machine} failed: {e}")))?;
        tracing::info!(machine, server_id = server.id, "server deleted");

        if let Some(pool) = spec.floating_pool_name() {
            let name = labels::floating_ip_name(pool, machine);
            let floating_ip = client
                .get_floating_ip_by_name(&name)
                .await
                .map_err(|e| Status::unavailable(format!("Looking up floating IP {name} failed: {e}")))?;
            if let Some(ip) = floating_ip {
                client
                    .delete_floating_ip(ip.id)
                    .await
                    .map_err(|e| Status::unavailable(format!("Deleting floating IP {name} failed: {e}")))?;
                tracing::info!(machine, floating_ip_id = ip.id, "floating IP deleted");
            }
        }

        Ok(DeleteMachineResponse {})
    }

    async fn get_machine_status(&self, req: &GetMachineStatusRequest) -> Result<GetMachineStatusResponse> {
        let machine = req.machine.name.as_str();
        let spec = decode_spec(&req.machine_class)?;
        let client = self.client(&req.secret)?;

        let server = find_server(client.as_ref(), &req.machine)
            .await?
            .ok_or_else(|| Status::not_found(format!("Server {machine} not found")))?;

        Ok(GetMachineStatusResponse {
            provider_id: provider_id::encode(&spec.zone, server.id),
            node_name: server.name,
        })
    }

    async fn list_machines(&self, req: &ListMachinesRequest) -> Result<ListMachinesResponse> {
        let spec = decode_spec(&req.machine_class)?;
        let client = self.client(&req.secret)?;

        let mut params = ListServersParams {
            label_selector: Some(labels::node_selector(&spec)),
            page: Some(1),
            per_page: Some(LIST_PAGE_SIZE),
            ..Default::default()
        };
        let mut machine_list = BTreeMap::new();

        loop {
            let page = client
                .list_servers(&params)
                .await
                .map_err(|e| Status::unavailable(format!("Listing servers failed: {e}")))?;
            for server in &page.servers {
                machine_list.insert(provider_id::encode(&spec.zone, server.id), server.name.clone());
            }

            let current = params.page.unwrap_or(1);
            match page.next_page() {
                Some(next) if next > current => params.page = Some(next),
                _ => break,
            }
        }

        tracing::debug!(cluster = %spec.cluster, zone = %spec.zone, count = machine_list.len(), "listed machines");
        Ok(ListMachinesResponse { machine_list })
    }

    async fn get_volume_ids(&self, _req: &GetVolumeIdsRequest) -> Result<GetVolumeIdsResponse> {
        Err(Status::unimplemented("GetVolumeIDs is not supported by the hcloud provider"))
    }

    async fn initialize_machine(&self, _req: &InitializeMachineRequest) -> Result<InitializeMachineResponse> {
        Err(Status::unimplemented("InitializeMachine is not supported by the hcloud provider"))
    }

    async fn generate_machine_class_for_migration(
        &self,
        _req: &GenerateMachineClassForMigrationRequest,
    ) -> Result<GenerateMachineClassForMigrationResponse> {
        Err(Status::unimplemented(
            "GenerateMachineClassForMigration is not supported by the hcloud provider",
        ))
    }
}
