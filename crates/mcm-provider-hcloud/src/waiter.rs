//! Polling for asynchronous Hetzner Cloud actions.
//!
//! Mutations such as server creation or floating IP assignment return
//! before the provider has finished them. Dependent steps wait here until
//! the resource reports no running actions.

use std::future::Future;
use std::time::Duration;

use crate::api::CloudApi;
use crate::cloud::{Action, CloudError, CloudResult, FloatingIp, Server};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("{resource} still has running actions after {retries} retries")]
    RetriesExhausted { resource: String, retries: u32 },

    #[error("polling actions of {resource} failed: {source}")]
    Transport {
        resource: String,
        #[source]
        source: CloudError,
    },

    #[error("{resource} disappeared while waiting for its actions")]
    Gone { resource: String },
}

/// Polls until no action is pending: one initial poll plus at most
/// `max_retries` more, sleeping `interval` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionWaiter {
    interval: Duration,
    max_retries: u32,
}

impl Default for ActionWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_MAX_RETRIES)
    }
}

impl ActionWaiter {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Call `poll` until it reports no running actions.
    ///
    /// A failed poll aborts immediately; only "still pending" is retried.
    pub async fn wait<F, Fut>(&self, resource: &str, mut poll: F) -> Result<(), WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<Vec<Action>>>,
    {
        let mut retries = 0;
        loop {
            let pending = poll().await.map_err(|source| WaitError::Transport {
                resource: resource.to_string(),
                source,
            })?;

            if pending.is_empty() {
                tracing::debug!(resource, retries, "no running actions left");
                return Ok(());
            }

            if retries >= self.max_retries {
                tracing::warn!(resource, retries, pending = pending.len(), "giving up waiting for actions");
                return Err(WaitError::RetriesExhausted {
                    resource: resource.to_string(),
                    retries,
                });
            }

            retries += 1;
            tracing::debug!(
                resource,
                retry = retries,
                pending = pending.len(),
                "actions still running, waiting"
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Wait for the server's actions, then fetch its current state.
    pub async fn wait_for_server(&self, client: &dyn CloudApi, id: i64) -> Result<Server, WaitError> {
        let resource = format!("server {id}");
        self.wait(&resource, || client.running_server_actions(id)).await?;

        client
            .get_server(id)
            .await
            .map_err(|source| WaitError::Transport {
                resource: resource.clone(),
                source,
            })?
            .ok_or(WaitError::Gone { resource })
    }

    /// Wait for the floating IP's actions, then fetch its current state.
    pub async fn wait_for_floating_ip(&self, client: &dyn CloudApi, id: i64) -> Result<FloatingIp, WaitError> {
        let resource = format!("floating IP {id}");
        self.wait(&resource, || client.running_floating_ip_actions(id)).await?;

        client
            .get_floating_ip(id)
            .await
            .map_err(|source| WaitError::Transport {
                resource: resource.clone(),
                source,
            })?
            .ok_or(WaitError::Gone { resource })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::cloud::{ActionStatus, StatusCode};
    use crate::testing::{FakeCloud, running_action};

    fn pending() -> Vec<Action> {
        vec![running_action(1, "create_server")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries_without_extra_poll() {
        let waiter = ActionWaiter::default();
        let start = Instant::now();
        let mut polls = 0;

        let err = waiter
            .wait("server 1", || {
                polls += 1;
                async { Ok::<_, CloudError>(pending()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::RetriesExhausted { retries: 5, .. }), "{err}");
        assert_eq!(polls, 6);
        assert!(start.elapsed() >= Duration::from_secs(25));
        assert!(start.elapsed() < Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_actions_drain() {
        let waiter = ActionWaiter::default();
        let start = Instant::now();
        let mut polls = 0;

        waiter
            .wait("server 1", || {
                polls += 1;
                let actions = if polls <= 2 { pending() } else { Vec::new() };
                async move { Ok::<_, CloudError>(actions) }
            })
            .await
            .unwrap();

        assert_eq!(polls, 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_aborts_immediately() {
        let waiter = ActionWaiter::default();
        let start = Instant::now();
        let mut polls = 0;

        let err = waiter
            .wait("server 1", || {
                polls += 1;
                async {
                    Err::<Vec<Action>, _>(CloudError::Api {
                        operation: "list server actions",
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        body: "maintenance".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Transport { .. }), "{err}");
        assert_eq!(polls, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_budget() {
        let waiter = ActionWaiter::new(Duration::from_millis(100), 0);
        let mut polls = 0;
        let err = waiter
            .wait("floating IP 7", || {
                polls += 1;
                async { Ok::<_, CloudError>(pending()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::RetriesExhausted { retries: 0, .. }));
        assert_eq!(polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_refetches_state() {
        let fake = Arc::new(FakeCloud::new());
        let id = fake.insert_server("machine-1", Default::default());
        fake.set_pending_actions(id, 2);

        let server = ActionWaiter::default().wait_for_server(fake.as_ref(), id).await.unwrap();
        assert_eq!(server.id, id);
        assert_eq!(fake.calls_named("running_server_actions"), 3);
        assert_eq!(fake.calls_named("get_server"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_server_reports_vanished_server() {
        let fake = FakeCloud::new();
        let err = ActionWaiter::default().wait_for_server(&fake, 99).await.unwrap_err();
        assert!(matches!(err, WaitError::Gone { .. }), "{err}");
    }

    #[test]
    fn test_running_action_fixture_is_running() {
        assert_eq!(running_action(3, "start_server").status, ActionStatus::Running);
    }
}
