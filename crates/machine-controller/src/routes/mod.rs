pub mod classes;
pub mod machines;
pub mod volumes;

use std::future::Future;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use mcm_provider_hcloud::Status;

use crate::auth::auth_middleware;
use crate::error::ApiError;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let authed = Router::new()
        // Machine lifecycle
        .route("/v1/machines/create", post(machines::create_machine))
        .route("/v1/machines/delete", post(machines::delete_machine))
        .route("/v1/machines/status", post(machines::get_machine_status))
        .route("/v1/machines/list", post(machines::list_machines))
        .route("/v1/machines/initialize", post(machines::initialize_machine))
        // Volumes
        .route("/v1/volumes/ids", post(volumes::get_volume_ids))
        // Machine classes
        .route(
            "/v1/machine-classes/migrate",
            post(classes::generate_machine_class_for_migration),
        )
        // Auth middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(authed)
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Run a driver call under the configured request deadline. Dropping the
/// call on expiry also stops any action polling it was doing.
async fn with_deadline<T>(
    state: &AppState,
    operation: &'static str,
    call: impl Future<Output = mcm_provider_hcloud::Result<T>>,
) -> Result<Json<T>, ApiError> {
    let timeout = state.config.request_timeout;
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(resp)) => Ok(Json(resp)),
        Ok(Err(status)) => {
            tracing::info!(operation, code = %status.code, error = %status.message, "driver call failed");
            Err(status.into())
        }
        Err(_) => {
            tracing::warn!(operation, timeout_secs = timeout.as_secs(), "driver call timed out");
            Err(Status::unavailable(format!(
                "{operation} did not finish within {}s",
                timeout.as_secs()
            ))
            .into())
        }
    }
}
