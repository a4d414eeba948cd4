use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::api::CloudApi;
use crate::hetzner::HetznerCloud;

/// Environment variable the host reads the API base URL override from.
pub const ENDPOINT_ENV: &str = "HCLOUD_ENDPOINT";

/// One API client per credential, shared by every request that presents it.
///
/// Clients are built lazily on first use. [`ClientRegistry::set`] replaces or
/// drops an entry, which is how tests inject an in-memory backend.
#[derive(Default)]
pub struct ClientRegistry {
    endpoint: Option<String>,
    clients: RwLock<HashMap<String, Arc<dyn CloudApi>>>,
}

impl ClientRegistry {
    /// Registry whose clients talk to `endpoint`, or to the public API when `None`.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint: endpoint.filter(|e| !e.is_empty()),
            clients: RwLock::default(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Client for `token`, constructing and caching one on first use.
    pub fn get(&self, token: &str) -> Arc<dyn CloudApi> {
        let token = sanitize(token);

        let cached = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token.as_str())
            .cloned();
        if let Some(client) = cached {
            return client;
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(token.clone())
            .or_insert_with(|| {
                tracing::debug!("constructing hcloud client");
                Arc::new(HetznerCloud::new(&token, self.endpoint.as_deref()))
            })
            .clone()
    }

    /// Replace the client cached for `token`; `None` drops the entry.
    pub fn set(&self, token: &str, client: Option<Arc<dyn CloudApi>>) {
        let token = sanitize(token);
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        match client {
            Some(client) => {
                clients.insert(token, client);
            }
            None => {
                clients.remove(&token);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Strip newlines picked up when the token was pasted into the secret.
fn sanitize(token: &str) -> String {
    if token.contains('\n') {
        tracing::warn!("hcloud token contains newline characters, stripping them");
        token.replace('\n', "")
    } else {
        token.to_string()
    }
}
