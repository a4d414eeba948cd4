//! The create workflow: resolve dependencies, create the server, attach
//! placement group and floating IP, power on, verify.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::api::CloudApi;
use crate::cloud::{
    CloudError, CreateFloatingIpRequest, CreateServerRequest, FloatingIpType, Image, Network,
    Server, ServerStatus, SshKey,
};
use crate::error::{Result, Status};
use crate::labels;
use crate::rollback::RollbackIntent;
use crate::spec::ProviderSpec;
use crate::waiter::ActionWaiter;

/// Everything a create needs once the request has passed its preconditions.
pub(crate) struct CreatePlan<'a> {
    pub machine: &'a str,
    pub spec: &'a ProviderSpec,
    pub user_data: &'a [u8],
}

/// Run the remote part of a create, recording every resource it brings
/// into existence in `intent`.
///
/// Returns the running server. The caller rolls back on error.
pub(crate) async fn provision(
    client: &dyn CloudApi,
    waiter: &ActionWaiter,
    plan: &CreatePlan<'_>,
    intent: &mut RollbackIntent,
) -> Result<Server> {
    let CreatePlan { machine, spec, .. } = *plan;

    check_name_collision(client, plan, intent).await?;

    let image = resolve_image(client, &spec.image_name).await?;
    let ssh_key = resolve_ssh_key(client, &spec.ssh_fingerprint).await?;
    let network = match spec.network_name() {
        Some(name) => Some(resolve_network(client, name).await?),
        None => None,
    };

    let request = CreateServerRequest {
        name: machine.to_string(),
        server_type: spec.server_type.clone(),
        image: image.id.to_string(),
        datacenter: Some(spec.zone.clone()),
        user_data: Some(STANDARD.encode(plan.user_data)),
        labels: labels::server_labels(spec),
        ssh_keys: vec![ssh_key.id],
        networks: network.iter().map(|n| n.id).collect(),
        placement_group: None,
        start_after_create: false,
    };
    let created = client
        .create_server(&request)
        .await
        .map_err(|e| Status::unavailable(format!("Creating server {machine} failed: {e}")))?;
    intent.server_id = Some(created.server.id);
    tracing::info!(machine, server_id = created.server.id, "server created");

    let mut server = waiter
        .wait_for_server(client, created.server.id)
        .await
        .map_err(|e| Status::unknown(format!("Server {machine} did not finish creating: {e}")))?;

    if let Some(placement_group) = spec.placement_group_id() {
        server = attach_placement_group(client, waiter, &server, placement_group).await?;
    }

    if let Some(pool) = spec.floating_pool_name() {
        server = attach_floating_ip(client, waiter, plan, &server, pool, intent).await?;
    }

    if !matches!(server.status, ServerStatus::Starting | ServerStatus::Running) {
        client
            .power_on_server(server.id)
            .await
            .map_err(|e| Status::unavailable(format!("Powering on server {machine} failed: {e}")))?;
        tracing::info!(machine, server_id = server.id, "powering on server");
    }

    // A server already starting still needs its boot action to finish.
    let server = waiter
        .wait_for_server(client, server.id)
        .await
        .map_err(|e| Status::unknown(format!("Server {machine} did not finish powering on: {e}")))?;
    tracing::info!(machine, server_id = server.id, status = %server.status, "server powered on");

    if server.status != ServerStatus::Running {
        return Err(Status::unknown(format!(
            "Server was not started for some reason: {machine} is {}",
            server.status
        )));
    }

    verify(spec, &server)?;
    Ok(server)
}

/// A server already holding the name is either a leftover of an earlier
/// attempt for this spec, queued for rollback, or someone else's.
async fn check_name_collision(
    client: &dyn CloudApi,
    plan: &CreatePlan<'_>,
    intent: &mut RollbackIntent,
) -> Result<()> {
    let machine = plan.machine;
    let existing = client
        .get_server_by_name(machine)
        .await
        .map_err(|e| Status::unavailable(format!("Looking up server {machine} failed: {e}")))?;

    let Some(existing) = existing else {
        return Ok(());
    };

    if !labels::is_owned_by(&existing.labels, plan.spec) {
        return Err(Status::already_exists(format!(
            "Server {machine} already exists and is not managed by cluster {}",
            plan.spec.cluster
        )));
    }

    tracing::warn!(machine, server_id = existing.id, "found leftover server from an earlier attempt");
    intent.server_id = Some(existing.id);

    if let Some(pool) = plan.spec.floating_pool_name() {
        let name = labels::floating_ip_name(pool, machine);
        let expected = labels::floating_ip_labels(plan.spec, pool);
        match client.get_floating_ip_by_name(&name).await {
            Ok(Some(ip)) if expected.iter().all(|(k, v)| ip.labels.get(k) == Some(v)) => {
                intent.floating_ip_id = Some(ip.id);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(machine, error = %e, "looking up leftover floating IP failed"),
        }
    }

    Err(Status::aborted(format!(
        "Server {machine} is left over from an earlier attempt and will be removed, retry later"
    )))
}

async fn resolve_image(client: &dyn CloudApi, name: &str) -> Result<Image> {
    let lookup_failed = |e: CloudError| Status::unavailable(format!("Looking up image {name} failed: {e}"));

    let exact = client.list_images(name, false).await.map_err(lookup_failed)?;
    if let Some(image) = exact.into_iter().find(|i| i.name.as_deref() == Some(name)) {
        return Ok(image);
    }

    let any = client.list_images(name, true).await.map_err(lookup_failed)?;
    let image = any
        .into_iter()
        .next()
        .ok_or_else(|| Status::invalid_argument(format!("Image {name} not found")))?;
    if image.deprecated.is_some() {
        tracing::warn!(image = name, image_id = image.id, "using deprecated image");
    }
    Ok(image)
}

async fn resolve_ssh_key(client: &dyn CloudApi, fingerprint: &str) -> Result<SshKey> {
    client
        .get_ssh_key_by_fingerprint(fingerprint)
        .await
        .map_err(|e| Status::unavailable(format!("Looking up SSH key with fingerprint {fingerprint} failed: {e}")))?
        .ok_or_else(|| Status::invalid_argument(format!("SSH key with fingerprint {fingerprint} not found")))
}

async fn resolve_network(client: &dyn CloudApi, name: &str) -> Result<Network> {
    client
        .get_network_by_name(name)
        .await
        .map_err(|e| Status::unavailable(format!("Looking up network {name} failed: {e}")))?
        .ok_or_else(|| Status::invalid_argument(format!("Network {name} not found")))
}

async fn attach_placement_group(
    client: &dyn CloudApi,
    waiter: &ActionWaiter,
    server: &Server,
    placement_group: &str,
) -> Result<Server> {
    let machine = server.name.as_str();
    let id: i64 = placement_group.parse().map_err(|_| {
        Status::invalid_argument(format!("Placement group ID {placement_group} is not a number"))
    })?;

    let group = client
        .get_placement_group(id)
        .await
        .map_err(|e| Status::unavailable(format!("Looking up placement group {id} failed: {e}")))?
        .ok_or_else(|| Status::invalid_argument(format!("Placement group {id} not found")))?;

    client
        .add_server_to_placement_group(server.id, group.id)
        .await
        .map_err(|e| {
            Status::unavailable(format!("Adding server {machine} to placement group {id} failed: {e}"))
        })?;
    tracing::info!(machine, server_id = server.id, placement_group = id, "added to placement group");

    waiter
        .wait_for_server(client, server.id)
        .await
        .map_err(|e| Status::unknown(format!("Server {machine} did not join placement group {id}: {e}")))
}

/// Attach the pool's floating IP for this machine, creating it when absent.
///
/// Only a floating IP created here is recorded for rollback.
async fn attach_floating_ip(
    client: &dyn CloudApi,
    waiter: &ActionWaiter,
    plan: &CreatePlan<'_>,
    server: &Server,
    pool: &str,
    intent: &mut RollbackIntent,
) -> Result<Server> {
    let machine = plan.machine;
    let name = labels::floating_ip_name(pool, machine);

    let existing = client
        .get_floating_ip_by_name(&name)
        .await
        .map_err(|e| Status::internal(format!("Looking up floating IP {name} failed: {e}")))?;

    let floating_ip_id = match existing {
        Some(ip) => {
            match ip.server {
                None => {
                    client
                        .assign_floating_ip(ip.id, server.id)
                        .await
                        .map_err(|e| Status::internal(format!("Assigning floating IP {name} failed: {e}")))?;
                    tracing::info!(machine, floating_ip_id = ip.id, "assigned existing floating IP");
                }
                Some(owner) if owner != server.id => {
                    return Err(Status::internal(format!(
                        "Floating IP {name} is assigned to server {owner}, not to {machine}"
                    )));
                }
                Some(_) => {}
            }
            ip.id
        }
        None => {
            let created = client
                .create_floating_ip(&CreateFloatingIpRequest {
                    name: name.clone(),
                    kind: FloatingIpType::Ipv4,
                    server: Some(server.id),
                    home_location: None,
                    labels: labels::floating_ip_labels(plan.spec, pool),
                })
                .await
                .map_err(|e| Status::internal(format!("Creating floating IP {name} failed: {e}")))?;
            intent.floating_ip_id = Some(created.floating_ip.id);
            tracing::info!(machine, floating_ip_id = created.floating_ip.id, "floating IP created");
            created.floating_ip.id
        }
    };

    waiter
        .wait_for_floating_ip(client, floating_ip_id)
        .await
        .map_err(|e| Status::internal(format!("Floating IP {name} did not settle: {e}")))?;

    waiter
        .wait_for_server(client, server.id)
        .await
        .map_err(|e| Status::unknown(format!("Server {machine} did not settle after floating IP assignment: {e}")))
}

/// Post-conditions of a finished create.
fn verify(spec: &ProviderSpec, server: &Server) -> Result<()> {
    let mut mismatches = Vec::new();

    let floating_ips = server.public_net.floating_ips.len();
    if spec.floating_pool_name().is_some() && floating_ips != 1 {
        mismatches.push(format!("expected 1 floating IP, found {floating_ips}"));
    }

    let networks = server.private_net.len();
    if spec.network_name().is_some() && networks != 1 {
        mismatches.push(format!("expected 1 private network, found {networks}"));
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(Status::internal(format!(
            "Server state does not match expectation: {}",
            mismatches.join("; ")
        )))
    }
}
