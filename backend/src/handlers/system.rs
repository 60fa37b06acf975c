//! Growing system HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use shared::SystemType;

use crate::middleware::auth::SYSTEMS_WRITE;
use crate::middleware::{check_permission, CurrentOperator};
use crate::services::system::{CandidateQuery, CreateSystemInput, UpdateSystemInput};
use crate::store::SystemFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SystemListQuery {
    pub system_type: Option<SystemType>,
}

/// List growing systems for the operator's farm
pub async fn list_systems(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Query(query): Query<SystemListQuery>,
) -> impl IntoResponse {
    let filter = SystemFilter {
        system_type: query.system_type,
    };

    match state.systems().list(operator.farm_id, &filter).await {
        Ok(systems) => (StatusCode::OK, Json(serde_json::json!({ "systems": systems }))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_system(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(system_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.systems().get(operator.farm_id, system_id).await {
        Ok(system) => (StatusCode::OK, Json(system)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Provision a new growing system
pub async fn create_system(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Json(input): Json<CreateSystemInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, SYSTEMS_WRITE) {
        return e.into_response();
    }

    match state.systems().create(operator.farm_id, input).await {
        Ok(system) => (StatusCode::CREATED, Json(system)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_system(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(system_id): Path<Uuid>,
    Json(input): Json<UpdateSystemInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, SYSTEMS_WRITE) {
        return e.into_response();
    }

    match state.systems().update(operator.farm_id, system_id, input).await {
        Ok(system) => (StatusCode::OK, Json(system)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_system(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Path(system_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&operator, SYSTEMS_WRITE) {
        return e.into_response();
    }

    match state.systems().delete(operator.farm_id, system_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Candidate placements for a quantity of plants
pub async fn find_candidates(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
    Json(query): Json<CandidateQuery>,
) -> impl IntoResponse {
    match state.systems().candidates(operator.farm_id, query).await {
        Ok(candidates) => {
            (StatusCode::OK, Json(serde_json::json!({ "candidates": candidates }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}
