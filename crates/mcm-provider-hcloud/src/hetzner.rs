//! [`CloudApi`] backed by the `hcloud` crate.
//!
//! Responses are read back into the types in [`crate::cloud`], which follow
//! the same JSON field names as the SDK models.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::{
    floating_ips_api, images_api, networks_api, placement_groups_api, servers_api, ssh_keys_api,
};
use hcloud::models;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::CloudApi;
use crate::cloud::*;

const USER_AGENT: &str = concat!("machine-controller-manager-provider-hcloud/", env!("CARGO_PKG_VERSION"));

/// Page size used when collecting the actions of a resource.
const ACTIONS_PER_PAGE: i64 = 50;

/// Hetzner Cloud client for one API token.
pub struct HetznerCloud {
    config: Configuration,
}

impl fmt::Debug for HetznerCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HetznerCloud")
            .field("base_path", &self.config.get_default_base_path())
            .finish_non_exhaustive()
    }
}

impl HetznerCloud {
    /// Client for `token`, talking to `endpoint` instead of the public API
    /// when given.
    pub fn new(token: &str, endpoint: Option<&str>) -> Self {
        let mut config = Configuration::new();
        config.bearer_access_token = Some(token.to_string());
        config.user_agent = Some(USER_AGENT.to_string());
        if let Some(endpoint) = endpoint {
            config.base_path_mapping.insert(
                "https://api.hetzner.cloud/v1".to_string(),
                endpoint.trim_end_matches('/').to_string(),
            );
        }
        Self { config }
    }

    pub fn base_path(&self) -> &str {
        self.config.get_default_base_path()
    }
}

// ── Response envelopes ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ServerEnvelope {
    #[serde(default)]
    server: Option<Server>,
}

#[derive(Deserialize)]
struct ActionEnvelope {
    action: Action,
}

#[derive(Deserialize)]
struct ActionList {
    actions: Vec<Action>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct SshKeyList {
    ssh_keys: Vec<SshKey>,
}

#[derive(Deserialize)]
struct NetworkList {
    networks: Vec<Network>,
}

#[derive(Deserialize)]
struct PlacementGroupEnvelope {
    #[serde(default)]
    placement_group: Option<PlacementGroup>,
}

#[derive(Deserialize)]
struct FloatingIpEnvelope {
    #[serde(default)]
    floating_ip: Option<FloatingIp>,
}

#[derive(Deserialize)]
struct FloatingIpList {
    floating_ips: Vec<FloatingIp>,
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_error<E: fmt::Debug>(operation: &'static str, err: hcloud::apis::Error<E>) -> CloudError {
    match err {
        hcloud::apis::Error::ResponseError(resp) => CloudError::Api {
            operation,
            status: StatusCode::from_u16(resp.status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body: resp.content,
        },
        other => CloudError::Request {
            operation,
            message: other.to_string(),
        },
    }
}

/// Read an SDK model back as one of the driver's types.
fn convert<M: Serialize, T: DeserializeOwned>(operation: &'static str, model: &M) -> CloudResult<T> {
    serde_json::to_value(model)
        .and_then(serde_json::from_value)
        .map_err(|e| CloudError::Request {
            operation,
            message: format!("unexpected response: {e}"),
        })
}

/// Build an SDK request model from its JSON form.
fn request_body<T: DeserializeOwned>(operation: &'static str, body: serde_json::Value) -> CloudResult<T> {
    serde_json::from_value(body).map_err(|e| CloudError::Request {
        operation,
        message: format!("invalid request: {e}"),
    })
}

fn found<T>(result: CloudResult<T>) -> CloudResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn gone_is_ok(result: CloudResult<()>) -> CloudResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Walk every page of a resource's actions and keep the running ones.
async fn running_actions<F, Fut, R, E>(operation: &'static str, mut fetch: F) -> CloudResult<Vec<Action>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<R, hcloud::apis::Error<E>>>,
    R: Serialize,
    E: fmt::Debug,
{
    let mut running = Vec::new();
    let mut page = 1;
    loop {
        let resp = fetch(page).await.map_err(|e| api_error(operation, e))?;
        let list: ActionList = convert(operation, &resp)?;
        running.extend(list.actions.into_iter().filter(|a| a.status == ActionStatus::Running));

        match list.meta.and_then(|m| m.pagination.next_page) {
            Some(next) if next > page => page = next,
            _ => return Ok(running),
        }
    }
}

#[async_trait]
impl CloudApi for HetznerCloud {
    async fn get_server(&self, id: i64) -> CloudResult<Option<Server>> {
        const OP: &str = "get server";
        let resp = servers_api::get_server(&self.config, servers_api::GetServerParams { id })
            .await
            .map_err(|e| api_error(OP, e));
        match found(resp)? {
            Some(resp) => Ok(convert::<_, ServerEnvelope>(OP, &resp)?.server),
            None => Ok(None),
        }
    }

    async fn get_server_by_name(&self, name: &str) -> CloudResult<Option<Server>> {
        let params = ListServersParams {
            name: Some(name.to_string()),
            ..Default::default()
        };
        Ok(self.list_servers(&params).await?.servers.into_iter().next())
    }

    async fn list_servers(&self, params: &ListServersParams) -> CloudResult<ListServersResponse> {
        const OP: &str = "list servers";
        let resp = servers_api::list_servers(
            &self.config,
            servers_api::ListServersParams {
                name: params.name.clone(),
                label_selector: params.label_selector.clone(),
                page: params.page,
                per_page: params.per_page,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        convert(OP, &resp)
    }

    async fn create_server(&self, req: &CreateServerRequest) -> CloudResult<CreateServerResponse> {
        const OP: &str = "create server";
        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: req.name.clone(),
                    server_type: req.server_type.clone(),
                    image: req.image.clone(),
                    location: None,
                    user_data: req.user_data.clone(),
                    networks: (!req.networks.is_empty()).then(|| req.networks.clone()),
                    firewalls: None,
                    ssh_keys: Some(req.ssh_keys.iter().map(i64::to_string).collect()),
                    volumes: None,
                    start_after_create: Some(req.start_after_create),
                    automount: None,
                    datacenter: req.datacenter.clone(),
                    labels: Some(req.labels.clone()),
                    placement_group: req.placement_group,
                    public_net: None,
                },
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        convert(OP, &resp)
    }

    async fn delete_server(&self, id: i64) -> CloudResult<()> {
        let resp = servers_api::delete_server(&self.config, servers_api::DeleteServerParams { id })
            .await
            .map(|_| ())
            .map_err(|e| api_error("delete server", e));
        gone_is_ok(resp)
    }

    async fn power_on_server(&self, id: i64) -> CloudResult<Action> {
        const OP: &str = "power on server";
        let resp = servers_api::power_on_server(&self.config, servers_api::PowerOnServerParams { id })
            .await
            .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, ActionEnvelope>(OP, &resp)?.action)
    }

    async fn add_server_to_placement_group(&self, id: i64, placement_group: i64) -> CloudResult<Action> {
        const OP: &str = "add server to placement group";
        let resp = servers_api::add_server_to_placement_group(
            &self.config,
            servers_api::AddServerToPlacementGroupParams {
                id,
                add_server_to_placement_group_request: request_body(
                    OP,
                    json!({ "placement_group": placement_group }),
                )?,
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, ActionEnvelope>(OP, &resp)?.action)
    }

    async fn running_server_actions(&self, id: i64) -> CloudResult<Vec<Action>> {
        running_actions("list server actions", move |page| {
            servers_api::list_actions_for_server(
                &self.config,
                servers_api::ListActionsForServerParams {
                    id,
                    page: Some(page),
                    per_page: Some(ACTIONS_PER_PAGE),
                    ..Default::default()
                },
            )
        })
        .await
    }

    async fn list_images(&self, name: &str, include_deprecated: bool) -> CloudResult<Vec<Image>> {
        const OP: &str = "list images";
        let resp = images_api::list_images(
            &self.config,
            images_api::ListImagesParams {
                name: Some(name.to_string()),
                include_deprecated: Some(include_deprecated),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, ImageList>(OP, &resp)?.images)
    }

    async fn get_ssh_key_by_fingerprint(&self, fingerprint: &str) -> CloudResult<Option<SshKey>> {
        const OP: &str = "list ssh keys";
        let resp = ssh_keys_api::list_ssh_keys(
            &self.config,
            ssh_keys_api::ListSshKeysParams {
                fingerprint: Some(fingerprint.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, SshKeyList>(OP, &resp)?.ssh_keys.into_iter().next())
    }

    async fn get_network_by_name(&self, name: &str) -> CloudResult<Option<Network>> {
        const OP: &str = "list networks";
        let resp = networks_api::list_networks(
            &self.config,
            networks_api::ListNetworksParams {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, NetworkList>(OP, &resp)?.networks.into_iter().next())
    }

    async fn get_placement_group(&self, id: i64) -> CloudResult<Option<PlacementGroup>> {
        const OP: &str = "get placement group";
        let resp = placement_groups_api::get_placementgroup(
            &self.config,
            placement_groups_api::GetPlacementgroupParams { id },
        )
        .await
        .map_err(|e| api_error(OP, e));
        match found(resp)? {
            Some(resp) => Ok(convert::<_, PlacementGroupEnvelope>(OP, &resp)?.placement_group),
            None => Ok(None),
        }
    }

    async fn get_floating_ip(&self, id: i64) -> CloudResult<Option<FloatingIp>> {
        const OP: &str = "get floating ip";
        let resp = floating_ips_api::get_floating_ip(&self.config, floating_ips_api::GetFloatingIpParams { id })
            .await
            .map_err(|e| api_error(OP, e));
        match found(resp)? {
            Some(resp) => Ok(convert::<_, FloatingIpEnvelope>(OP, &resp)?.floating_ip),
            None => Ok(None),
        }
    }

    async fn get_floating_ip_by_name(&self, name: &str) -> CloudResult<Option<FloatingIp>> {
        const OP: &str = "list floating ips";
        let resp = floating_ips_api::list_floating_ips(
            &self.config,
            floating_ips_api::ListFloatingIpsParams {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, FloatingIpList>(OP, &resp)?.floating_ips.into_iter().next())
    }

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> CloudResult<CreateFloatingIpResponse> {
        const OP: &str = "create floating ip";
        let body = json!({
            "name": req.name,
            "type": req.kind,
            "server": req.server,
            "home_location": req.home_location,
            "labels": req.labels,
        });
        let resp = floating_ips_api::create_floating_ip(
            &self.config,
            floating_ips_api::CreateFloatingIpParams {
                create_floating_ip_request: request_body(OP, body)?,
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        convert(OP, &resp)
    }

    async fn assign_floating_ip(&self, id: i64, server: i64) -> CloudResult<Action> {
        const OP: &str = "assign floating ip";
        let resp = floating_ips_api::assign_floating_ip_to_server(
            &self.config,
            floating_ips_api::AssignFloatingIpToServerParams {
                id,
                assign_floating_ip_to_server_request: request_body(OP, json!({ "server": server }))?,
            },
        )
        .await
        .map_err(|e| api_error(OP, e))?;
        Ok(convert::<_, ActionEnvelope>(OP, &resp)?.action)
    }

    async fn delete_floating_ip(&self, id: i64) -> CloudResult<()> {
        let resp = floating_ips_api::delete_floating_ip(&self.config, floating_ips_api::DeleteFloatingIpParams { id })
            .await
            .map(|_| ())
            .map_err(|e| api_error("delete floating ip", e));
        gone_is_ok(resp)
    }

    async fn running_floating_ip_actions(&self, id: i64) -> CloudResult<Vec<Action>> {
        running_actions("list floating ip actions", move |page| {
            floating_ips_api::list_actions_for_floating_ip(
                &self.config,
                floating_ips_api::ListActionsForFloatingIpParams {
                    id,
                    page: Some(page),
                    per_page: Some(ACTIONS_PER_PAGE),
                    ..Default::default()
                },
            )
        })
        .await
    }
}
