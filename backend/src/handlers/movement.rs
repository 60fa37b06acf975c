//! Movement proposal HTTP handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

use crate::middleware::auth::TRAYS_WRITE;
use crate::middleware::{check_permission, CurrentOperator};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteMovementInput {
    pub tray_id: String,
}

/// Proposals from the last scheduler cycle
pub async fn list_movements(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
) -> impl IntoResponse {
    let snapshot = state.movement_service().current(operator.farm_id).await;
    (StatusCode::OK, Json(snapshot)).into_response()
}

/// Re-evaluate now and replace the snapshot
pub async fn evaluate_movements(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.movement_service().evaluate_farm(operator.farm_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn execute_movement(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Json(input): Json<ExecuteMovementInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.movement_service().execute(&operator, &input.tray_id).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}
