//! Route definitions for the Farm Operations Platform

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - growing systems
        .nest("/systems", system_routes(state.clone()))
        // Protected routes - tray lifecycle
        .nest("/trays", tray_routes(state.clone()))
        // Protected routes - scheduled movements
        .nest("/movements", movement_routes(state.clone()))
        // Protected routes - event stream
        .nest("/events", event_routes(state))
}

/// Growing system routes (protected)
fn system_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_systems).post(handlers::create_system))
        .route("/candidates", post(handlers::find_candidates))
        .route(
            "/:system_id",
            get(handlers::get_system)
                .patch(handlers::update_system)
                .delete(handlers::delete_system),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Tray routes (protected). Trays are never deleted.
fn tray_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_trays).post(handlers::create_tray))
        .route(
            "/:tray_id",
            get(handlers::get_tray).patch(handlers::update_tray),
        )
        .route("/:tray_id/history", get(handlers::get_tray_history))
        .route("/:tray_id/move", post(handlers::move_tray))
        .route("/:tray_id/split", post(handlers::split_tray))
        .route("/:tray_id/ready", post(handlers::mark_tray_ready))
        .route("/:tray_id/harvest", post(handlers::harvest_tray))
        .route("/:tray_id/discard", post(handlers::discard_tray))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Movement routes (protected)
fn movement_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_movements))
        .route("/evaluate", post(handlers::evaluate_movements))
        .route("/execute", post(handlers::execute_movement))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Event stream routes (protected)
fn event_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::stream_events))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
