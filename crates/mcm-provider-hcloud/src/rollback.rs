//! Cleanup after a failed create.

use crate::api::CloudApi;
use crate::labels;
use crate::spec::ProviderSpec;

/// Resources a create attempt brought into existence so far.
///
/// Filled in step by step while the create runs; on failure it names
/// exactly what may be removed again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackIntent {
    pub server_id: Option<i64>,
    pub floating_ip_id: Option<i64>,
}

impl RollbackIntent {
    pub fn is_empty(&self) -> bool {
        self.server_id.is_none() && self.floating_ip_id.is_none()
    }
}

/// Best-effort removal of what `intent` recorded.
///
/// Without a recorded server ID the server is looked up by name and only
/// removed when it carries the ownership labels of `spec`. Failures are
/// logged and swallowed; the caller reports the error that triggered the
/// rollback.
pub async fn roll_back(client: &dyn CloudApi, spec: &ProviderSpec, machine: &str, intent: &RollbackIntent) {
    let server_id = match intent.server_id {
        Some(id) => Some(id),
        None => owned_server_by_name(client, spec, machine).await,
    };

    if let Some(id) = server_id {
        match client.delete_server(id).await {
            Ok(()) => tracing::info!(machine, server_id = id, "rolled back server"),
            Err(e) => tracing::warn!(machine, server_id = id, error = %e, "failed to roll back server"),
        }
    }

    if let Some(id) = intent.floating_ip_id {
        match client.delete_floating_ip(id).await {
            Ok(()) => tracing::info!(machine, floating_ip_id = id, "rolled back floating IP"),
            Err(e) => tracing::warn!(machine, floating_ip_id = id, error = %e, "failed to roll back floating IP"),
        }
    }
}

async fn owned_server_by_name(client: &dyn CloudApi, spec: &ProviderSpec, machine: &str) -> Option<i64> {
    match client.get_server_by_name(machine).await {
        Ok(Some(server)) if labels::is_owned_by(&server.labels, spec) => Some(server.id),
        Ok(Some(server)) => {
            tracing::info!(machine, server_id = server.id, "leaving foreign server untouched");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(machine, error = %e, "rollback lookup by name failed");
            None
        }
    }
}
