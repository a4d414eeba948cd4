use axum::Json;
use axum::extract::State;
use mcm_provider_hcloud::{
    GenerateMachineClassForMigrationRequest, GenerateMachineClassForMigrationResponse,
};

use super::with_deadline;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn generate_machine_class_for_migration(
    State(state): State<AppState>,
    Json(req): Json<GenerateMachineClassForMigrationRequest>,
) -> Result<Json<GenerateMachineClassForMigrationResponse>, ApiError> {
    with_deadline(
        &state,
        "GenerateMachineClassForMigration",
        state.driver.generate_machine_class_for_migration(&req),
    )
    .await
}
