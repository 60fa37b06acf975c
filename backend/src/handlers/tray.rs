//! Tray lifecycle HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::TrayStatus;

use crate::middleware::auth::TRAYS_WRITE;
use crate::middleware::{check_permission, CurrentOperator};
use crate::services::tray::{
    CreateTrayInput, DiscardInput, HarvestInput, MoveTrayInput, SplitTrayInput, UpdateTrayInput,
};
use crate::store::TrayFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TrayListQuery {
    pub status: Option<TrayStatus>,
    pub system_id: Option<Uuid>,
}

/// List trays for the operator's farm
pub async fn list_trays(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Query(query): Query<TrayListQuery>,
) -> impl IntoResponse {
    let filter = TrayFilter {
        status: query.status,
        system_id: query.system_id,
    };

    match state.trays().list(operator.farm_id, &filter).await {
        Ok(trays) => (StatusCode::OK, Json(serde_json::json!({ "trays": trays }))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
) -> impl IntoResponse {
    match state.trays().get(operator.farm_id, &tray_id).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Location history, oldest first
pub async fn get_tray_history(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
) -> impl IntoResponse {
    match state.trays().history(operator.farm_id, &tray_id).await {
        Ok(history) => (
            StatusCode::OK,
            Json(serde_json::json!({ "tray_id": tray_id, "history": history })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Seed a new tray
pub async fn create_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Json(input): Json<CreateTrayInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().create(&operator, input).await {
        Ok(tray) => (StatusCode::CREATED, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
    Json(input): Json<UpdateTrayInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().update(&operator, &tray_id, input).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn move_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
    Json(input): Json<MoveTrayInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().move_tray(&operator, &tray_id, input).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Split a tray into children at new locations
pub async fn split_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
    Json(input): Json<SplitTrayInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().split(&operator, &tray_id, input).await {
        Ok(result) => (StatusCode::CREATED, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn mark_tray_ready(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().mark_ready(&operator, &tray_id).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn harvest_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
    Json(input): Json<HarvestInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().harvest(&operator, &tray_id, input).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn discard_tray(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(tray_id): Path<String>,
    Json(input): Json<DiscardInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, TRAYS_WRITE) {
        return e.into_response();
    }

    match state.trays().discard(&operator, &tray_id, input).await {
        Ok(tray) => (StatusCode::OK, Json(tray)).into_response(),
        Err(e) => e.into_response(),
    }
}
