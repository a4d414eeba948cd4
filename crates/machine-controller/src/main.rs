mod auth;
mod config;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use mcm_provider_hcloud::{ActionWaiter, ClientRegistry, HcloudDriver};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    // Driver
    let registry = ClientRegistry::new(config.hcloud_endpoint.clone());
    let waiter = ActionWaiter::new(config.action_poll_interval, config.action_poll_retries);
    let driver = HcloudDriver::new(registry, waiter);
    tracing::info!(
        endpoint = ?config.hcloud_endpoint,
        poll_interval_secs = config.action_poll_interval.as_secs(),
        poll_retries = config.action_poll_retries,
        auth = config.api_key.is_some(),
        "hcloud driver ready"
    );

    let state = AppState {
        driver: Arc::new(driver),
        config: config.clone(),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting machine controller driver");

    axum::serve(listener, app).await.expect("server error");
}
