use axum::Json;
use axum::extract::State;
use mcm_provider_hcloud::{GetVolumeIdsRequest, GetVolumeIdsResponse};

use super::with_deadline;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_volume_ids(
    State(state): State<AppState>,
    Json(req): Json<GetVolumeIdsRequest>,
) -> Result<Json<GetVolumeIdsResponse>, ApiError> {
    with_deadline(&state, "GetVolumeIDs", state.driver.get_volume_ids(&req)).await
}
