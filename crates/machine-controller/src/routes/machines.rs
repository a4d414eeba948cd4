use axum::Json;
use axum::extract::State;
use mcm_provider_hcloud::{
    CreateMachineRequest, CreateMachineResponse, DeleteMachineRequest, DeleteMachineResponse,
    GetMachineStatusRequest, GetMachineStatusResponse, InitializeMachineRequest,
    InitializeMachineResponse, ListMachinesRequest, ListMachinesResponse,
};

use super::with_deadline;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn create_machine(
    State(state): State<AppState>,
    Json(req): Json<CreateMachineRequest>,
) -> Result<Json<CreateMachineResponse>, ApiError> {
    tracing::info!(machine = %req.machine.name, class = %req.machine_class.name, "create machine requested");
    with_deadline(&state, "CreateMachine", state.driver.create_machine(&req)).await
}

pub async fn delete_machine(
    State(state): State<AppState>,
    Json(req): Json<DeleteMachineRequest>,
) -> Result<Json<DeleteMachineResponse>, ApiError> {
    tracing::info!(machine = %req.machine.name, provider_id = ?req.machine.provider_id(), "delete machine requested");
    with_deadline(&state, "DeleteMachine", state.driver.delete_machine(&req)).await
}

pub async fn get_machine_status(
    State(state): State<AppState>,
    Json(req): Json<GetMachineStatusRequest>,
) -> Result<Json<GetMachineStatusResponse>, ApiError> {
    tracing::debug!(machine = %req.machine.name, "machine status requested");
    with_deadline(&state, "GetMachineStatus", state.driver.get_machine_status(&req)).await
}

pub async fn list_machines(
    State(state): State<AppState>,
    Json(req): Json<ListMachinesRequest>,
) -> Result<Json<ListMachinesResponse>, ApiError> {
    tracing::debug!(class = %req.machine_class.name, "machine list requested");
    with_deadline(&state, "ListMachines", state.driver.list_machines(&req)).await
}

pub async fn initialize_machine(
    State(state): State<AppState>,
    Json(req): Json<InitializeMachineRequest>,
) -> Result<Json<InitializeMachineResponse>, ApiError> {
    with_deadline(&state, "InitializeMachine", state.driver.initialize_machine(&req)).await
}
