//! In-memory Hetzner Cloud used by the driver tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::api::CloudApi;
use crate::cloud::{
    Action, ActionStatus, CloudError, CloudResult, CreateFloatingIpRequest, CreateFloatingIpResponse,
    CreateServerRequest, CreateServerResponse, DatacenterRef, FloatingIp, FloatingIpType, Image,
    ListServersParams, ListServersResponse, Meta, Network, Pagination, PlacementGroup, PrivateNet,
    PublicNet, Server, ServerStatus, SshKey, StatusCode,
};

pub(crate) const IMAGE_NAME: &str = "ubuntu-20.04";
pub(crate) const SSH_FINGERPRINT: &str = "00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff";
pub(crate) const NETWORK_NAME: &str = "private";
pub(crate) const PLACEMENT_GROUP_ID: i64 = 7;

pub(crate) fn running_action(id: i64, command: &str) -> Action {
    Action {
        id,
        command: command.to_string(),
        status: ActionStatus::Running,
        progress: 0,
        started: None,
        finished: None,
        error: None,
    }
}

fn api_error(operation: &'static str, status: StatusCode) -> CloudError {
    CloudError::Api {
        operation,
        status,
        body: format!("injected failure for {operation}"),
    }
}

struct State {
    next_id: i64,
    servers: BTreeMap<i64, Server>,
    images: Vec<Image>,
    ssh_keys: Vec<SshKey>,
    networks: Vec<Network>,
    placement_groups: Vec<PlacementGroup>,
    floating_ips: BTreeMap<i64, FloatingIp>,
    pending_server_actions: HashMap<i64, usize>,
    pending_floating_ip_actions: HashMap<i64, usize>,
    created_server_actions: usize,
    failures: HashMap<&'static str, StatusCode>,
    status_after_power_on: ServerStatus,
    boot_refetches: usize,
    booting: HashMap<i64, usize>,
    attach_networks: bool,
    created: Vec<CreateServerRequest>,
    calls: Vec<&'static str>,
}

/// Records every call, keeps resources in maps, and fails on request.
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    /// Empty account; new resources are numbered from 42.
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 42,
                servers: BTreeMap::new(),
                images: Vec::new(),
                ssh_keys: Vec::new(),
                networks: Vec::new(),
                placement_groups: Vec::new(),
                floating_ips: BTreeMap::new(),
                pending_server_actions: HashMap::new(),
                pending_floating_ip_actions: HashMap::new(),
                created_server_actions: 0,
                failures: HashMap::new(),
                status_after_power_on: ServerStatus::Running,
                boot_refetches: 0,
                booting: HashMap::new(),
                attach_networks: true,
                created: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Account holding the image, SSH key, network and placement group the
    /// test specs refer to.
    pub(crate) fn seeded() -> Self {
        let fake = Self::new();
        {
            let mut state = fake.lock();
            state.images.push(Image {
                id: 1,
                name: Some(IMAGE_NAME.into()),
                description: Some("Ubuntu 20.04".into()),
                kind: Some("system".into()),
                deprecated: None,
            });
            state.ssh_keys.push(SshKey {
                id: 2,
                name: "admin".into(),
                fingerprint: SSH_FINGERPRINT.into(),
                labels: HashMap::new(),
            });
            state.networks.push(Network {
                id: 3,
                name: NETWORK_NAME.into(),
                ip_range: Some("10.0.0.0/16".into()),
            });
            state.placement_groups.push(PlacementGroup {
                id: PLACEMENT_GROUP_ID,
                name: "spread".into(),
                kind: Some("spread".into()),
                servers: Vec::new(),
            });
        }
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call and return the injected failure for it, if any.
    fn enter(&self, method: &'static str) -> CloudResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(method);
        if let Some(status) = state.failures.get(method).copied() {
            return Err(api_error(method, status));
        }
        Ok(state)
    }

    // ── Fixtures ────────────────────────────────────────────────────

    pub(crate) fn insert_server(&self, name: &str, labels: HashMap<String, String>) -> i64 {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.servers.insert(
            id,
            Server {
                id,
                name: name.to_string(),
                status: ServerStatus::Running,
                labels,
                public_net: PublicNet::default(),
                private_net: Vec::new(),
                datacenter: None,
                placement_group: None,
                created: None,
            },
        );
        id
    }

    pub(crate) fn insert_floating_ip(&self, name: &str, labels: HashMap<String, String>) -> i64 {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.floating_ips.insert(
            id,
            FloatingIp {
                id,
                name: name.to_string(),
                ip: Some("192.0.2.10".into()),
                kind: FloatingIpType::Ipv4,
                server: None,
                labels,
            },
        );
        id
    }

    pub(crate) fn insert_deprecated_image(&self, name: &str) -> i64 {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.images.push(Image {
            id,
            name: Some(name.to_string()),
            description: None,
            kind: Some("system".into()),
            deprecated: Some(deprecation_date()),
        });
        id
    }

    /// The next `count` action polls for server `id` report a running action.
    pub(crate) fn set_pending_actions(&self, id: i64, count: usize) {
        self.lock().pending_server_actions.insert(id, count);
    }

    /// Servers created from now on report `count` running actions.
    pub(crate) fn set_created_server_actions(&self, count: usize) {
        self.lock().created_server_actions = count;
    }

    pub(crate) fn fail(&self, method: &'static str, status: StatusCode) {
        self.lock().failures.insert(method, status);
    }

    pub(crate) fn set_status_after_power_on(&self, status: ServerStatus) {
        self.lock().status_after_power_on = status;
    }

    /// Servers created from now on come up already `starting` and report
    /// `running` once they have been fetched `refetches` times.
    pub(crate) fn set_boot_refetches(&self, refetches: usize) {
        self.lock().boot_refetches = refetches;
    }

    /// Create servers without attaching the requested networks.
    pub(crate) fn drop_networks(&self) {
        self.lock().attach_networks = false;
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub(crate) fn calls_named(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == method).count()
    }

    pub(crate) fn server(&self, id: i64) -> Option<Server> {
        self.lock().servers.get(&id).cloned()
    }

    pub(crate) fn server_count(&self) -> usize {
        self.lock().servers.len()
    }

    pub(crate) fn floating_ip(&self, id: i64) -> Option<FloatingIp> {
        self.lock().floating_ips.get(&id).cloned()
    }

    pub(crate) fn floating_ip_count(&self) -> usize {
        self.lock().floating_ips.len()
    }

    pub(crate) fn created_requests(&self) -> Vec<CreateServerRequest> {
        self.lock().created.clone()
    }
}

fn deprecation_date() -> chrono::DateTime<chrono::Utc> {
    "2023-01-01T00:00:00Z".parse().unwrap()
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn attach_floating_ip(&mut self, floating_ip: i64, server: i64) -> CloudResult<()> {
        let target = self
            .servers
            .get_mut(&server)
            .ok_or_else(|| api_error("assign_floating_ip", StatusCode::NOT_FOUND))?;
        target.public_net.floating_ips.push(floating_ip);
        if let Some(ip) = self.floating_ips.get_mut(&floating_ip) {
            ip.server = Some(server);
        }
        Ok(())
    }
}

fn take_pending(pending: &mut HashMap<i64, usize>, id: i64) -> Vec<Action> {
    match pending.get_mut(&id) {
        Some(count) if *count > 0 => {
            *count -= 1;
            vec![running_action(id, "pending")]
        }
        _ => Vec::new(),
    }
}

/// `k=v,k2=v2` selectors only; that is all the driver sends.
fn matches_selector(labels: &HashMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn get_server(&self, id: i64) -> CloudResult<Option<Server>> {
        let mut state = self.enter("get_server")?;
        match state.booting.get(&id).copied() {
            Some(0) => {
                state.booting.remove(&id);
                if let Some(server) = state.servers.get_mut(&id) {
                    server.status = ServerStatus::Running;
                }
            }
            Some(left) => {
                state.booting.insert(id, left - 1);
            }
            None => {}
        }
        Ok(state.servers.get(&id).cloned())
    }

    async fn get_server_by_name(&self, name: &str) -> CloudResult<Option<Server>> {
        let state = self.enter("get_server_by_name")?;
        Ok(state.servers.values().find(|s| s.name == name).cloned())
    }

    async fn list_servers(&self, params: &ListServersParams) -> CloudResult<ListServersResponse> {
        let state = self.enter("list_servers")?;
        let matching: Vec<Server> = state
            .servers
            .values()
            .filter(|s| params.name.as_deref().is_none_or(|name| s.name == name))
            .filter(|s| {
                params
                    .label_selector
                    .as_deref()
                    .is_none_or(|selector| matches_selector(&s.labels, selector))
            })
            .cloned()
            .collect();

        let per_page = params.per_page.unwrap_or(25).max(1);
        let page = params.page.unwrap_or(1).max(1);
        let total = matching.len() as i64;
        let last_page = ((total + per_page - 1) / per_page).max(1);
        let servers = matching
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .collect();

        Ok(ListServersResponse {
            servers,
            meta: Some(Meta {
                pagination: Pagination {
                    page,
                    per_page,
                    previous_page: (page > 1).then(|| page - 1),
                    next_page: (page < last_page).then(|| page + 1),
                    last_page: Some(last_page),
                    total_entries: Some(total),
                },
            }),
        })
    }

    async fn create_server(&self, req: &CreateServerRequest) -> CloudResult<CreateServerResponse> {
        let mut state = self.enter("create_server")?;
        if state.servers.values().any(|s| s.name == req.name) {
            return Err(api_error("create_server", StatusCode::CONFLICT));
        }

        let id = state.allocate_id();
        let private_net = if state.attach_networks {
            req.networks
                .iter()
                .map(|network| PrivateNet {
                    network: *network,
                    ip: Some("10.0.0.2".into()),
                })
                .collect()
        } else {
            Vec::new()
        };
        let server = Server {
            id,
            name: req.name.clone(),
            status: if req.start_after_create {
                ServerStatus::Running
            } else if state.boot_refetches > 0 {
                ServerStatus::Starting
            } else {
                ServerStatus::Off
            },
            labels: req.labels.clone(),
            public_net: PublicNet::default(),
            private_net,
            datacenter: req.datacenter.clone().map(|name| DatacenterRef { name }),
            placement_group: None,
            created: None,
        };

        if server.status == ServerStatus::Starting {
            let refetches = state.boot_refetches;
            state.booting.insert(id, refetches);
        }
        state.servers.insert(id, server.clone());
        let pending = state.created_server_actions;
        state.pending_server_actions.insert(id, pending);
        state.created.push(req.clone());

        Ok(CreateServerResponse {
            server,
            action: Some(running_action(id, "create_server")),
            next_actions: Vec::new(),
        })
    }

    async fn delete_server(&self, id: i64) -> CloudResult<()> {
        let mut state = self.enter("delete_server")?;
        state.servers.remove(&id);
        for ip in state.floating_ips.values_mut() {
            if ip.server == Some(id) {
                ip.server = None;
            }
        }
        Ok(())
    }

    async fn power_on_server(&self, id: i64) -> CloudResult<Action> {
        let mut state = self.enter("power_on_server")?;
        let status = state.status_after_power_on;
        let server = state
            .servers
            .get_mut(&id)
            .ok_or_else(|| api_error("power_on_server", StatusCode::NOT_FOUND))?;
        server.status = status;
        Ok(running_action(id, "start_server"))
    }

    async fn add_server_to_placement_group(&self, id: i64, placement_group: i64) -> CloudResult<Action> {
        let mut state = self.enter("add_server_to_placement_group")?;
        let group = state
            .placement_groups
            .iter_mut()
            .find(|g| g.id == placement_group)
            .ok_or_else(|| api_error("add_server_to_placement_group", StatusCode::NOT_FOUND))?;
        group.servers.push(id);
        let group = group.clone();
        let server = state
            .servers
            .get_mut(&id)
            .ok_or_else(|| api_error("add_server_to_placement_group", StatusCode::NOT_FOUND))?;
        server.placement_group = Some(group);
        Ok(running_action(id, "add_to_placement_group"))
    }

    async fn running_server_actions(&self, id: i64) -> CloudResult<Vec<Action>> {
        let mut state = self.enter("running_server_actions")?;
        Ok(take_pending(&mut state.pending_server_actions, id))
    }

    async fn list_images(&self, name: &str, include_deprecated: bool) -> CloudResult<Vec<Image>> {
        let state = self.enter("list_images")?;
        Ok(state
            .images
            .iter()
            .filter(|i| i.name.as_deref() == Some(name))
            .filter(|i| include_deprecated || i.deprecated.is_none())
            .cloned()
            .collect())
    }

    async fn get_ssh_key_by_fingerprint(&self, fingerprint: &str) -> CloudResult<Option<SshKey>> {
        let state = self.enter("get_ssh_key_by_fingerprint")?;
        Ok(state.ssh_keys.iter().find(|k| k.fingerprint == fingerprint).cloned())
    }

    async fn get_network_by_name(&self, name: &str) -> CloudResult<Option<Network>> {
        let state = self.enter("get_network_by_name")?;
        Ok(state.networks.iter().find(|n| n.name == name).cloned())
    }

    async fn get_placement_group(&self, id: i64) -> CloudResult<Option<PlacementGroup>> {
        let state = self.enter("get_placement_group")?;
        Ok(state.placement_groups.iter().find(|g| g.id == id).cloned())
    }

    async fn get_floating_ip(&self, id: i64) -> CloudResult<Option<FloatingIp>> {
        Ok(self.enter("get_floating_ip")?.floating_ips.get(&id).cloned())
    }

    async fn get_floating_ip_by_name(&self, name: &str) -> CloudResult<Option<FloatingIp>> {
        let state = self.enter("get_floating_ip_by_name")?;
        Ok(state.floating_ips.values().find(|ip| ip.name == name).cloned())
    }

    async fn create_floating_ip(&self, req: &CreateFloatingIpRequest) -> CloudResult<CreateFloatingIpResponse> {
        let mut state = self.enter("create_floating_ip")?;
        let id = state.allocate_id();
        state.floating_ips.insert(
            id,
            FloatingIp {
                id,
                name: req.name.clone(),
                ip: Some("192.0.2.1".into()),
                kind: req.kind,
                server: None,
                labels: req.labels.clone(),
            },
        );
        if let Some(server) = req.server {
            state.attach_floating_ip(id, server)?;
        }

        let floating_ip = state.floating_ips.get(&id).cloned().ok_or_else(|| {
            api_error("create_floating_ip", StatusCode::INTERNAL_SERVER_ERROR)
        })?;
        Ok(CreateFloatingIpResponse {
            floating_ip,
            action: Some(running_action(id, "assign_floating_ip")),
        })
    }

    async fn assign_floating_ip(&self, id: i64, server: i64) -> CloudResult<Action> {
        let mut state = self.enter("assign_floating_ip")?;
        if !state.floating_ips.contains_key(&id) {
            return Err(api_error("assign_floating_ip", StatusCode::NOT_FOUND));
        }
        state.attach_floating_ip(id, server)?;
        Ok(running_action(id, "assign_floating_ip"))
    }

    async fn delete_floating_ip(&self, id: i64) -> CloudResult<()> {
        let mut state = self.enter("delete_floating_ip")?;
        state.floating_ips.remove(&id);
        for server in state.servers.values_mut() {
            server.public_net.floating_ips.retain(|ip| *ip != id);
        }
        Ok(())
    }

    async fn running_floating_ip_actions(&self, id: i64) -> CloudResult<Vec<Action>> {
        let mut state = self.enter("running_floating_ip_actions")?;
        Ok(take_pending(&mut state.pending_floating_ip_actions, id))
    }
}
