//! Error handling for the Farm Operations server
//!
//! Every failure leaves the server as `{ "error": { code, message, field?, system_id? } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{DomainError, GrowingSystem};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient permissions: requires {0}")]
    InsufficientPermissions(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Lifecycle errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Capacity error: {message}")]
    Capacity { system_id: Uuid, message: String },

    #[error("Allocation mismatch: {0}")]
    AllocationMismatch(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<Uuid>,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            system_id: None,
        }
    }
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn conflict(resource: &str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            resource: resource.to_string(),
            message: message.into(),
        }
    }

    /// Map a domain error, naming the system in capacity messages
    pub fn from_domain(err: DomainError, systems: &[GrowingSystem]) -> Self {
        match err {
            DomainError::Capacity { system_id, reason } => {
                let message = match systems.iter().find(|s| s.id == system_id) {
                    Some(system) => format!("{} in system {}", reason, system.name),
                    None => reason.to_string(),
                };
                AppError::Capacity { system_id, message }
            }
            other => AppError::from(other),
        }
    }

    fn status_and_detail(&self) -> (StatusCode, ErrorDetail) {
        match self {
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("TOKEN_EXPIRED", "Token has expired"),
            ),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("INVALID_TOKEN", "Invalid token"),
            ),
            AppError::InsufficientPermissions(permission) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new(
                    "INSUFFICIENT_PERMISSIONS",
                    format!("Permission denied: requires {}", permission),
                ),
            ),
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("UNAUTHORIZED", message.clone()),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail {
                    field: Some(field.clone()),
                    ..ErrorDetail::new("VALIDATION_ERROR", message.clone())
                },
            ),
            AppError::Conflict { resource, message } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    field: Some(resource.clone()),
                    ..ErrorDetail::new("CONFLICT", message.clone())
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::InvalidStateTransition(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("INVALID_STATE_TRANSITION", message.clone()),
            ),
            AppError::Capacity { system_id, message } => (
                StatusCode::CONFLICT,
                ErrorDetail {
                    system_id: Some(*system_id),
                    ..ErrorDetail::new("CAPACITY_ERROR", message.clone())
                },
            ),
            AppError::AllocationMismatch(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("ALLOCATION_MISMATCH", message.clone()),
            ),
            AppError::Configuration(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(
                    "CONFIGURATION_ERROR",
                    format!("Configuration error: {}", message),
                ),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", message.clone()),
            ),
            AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", "An internal server error occurred"),
            ),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Capacity { system_id, reason } => AppError::Capacity {
                system_id,
                message: reason.to_string(),
            },
            DomainError::NotOccupied { .. } => AppError::conflict("spot", err.to_string()),
            DomainError::InvalidQuantity { .. } => AppError::validation("quantity", err.to_string()),
            DomainError::AllocationMismatch { .. } => AppError::AllocationMismatch(err.to_string()),
            DomainError::InvalidTransition { .. } => {
                AppError::InvalidStateTransition(err.to_string())
            }
            DomainError::UnknownSystem(id) => AppError::NotFound(format!("Growing system {}", id)),
            DomainError::Validation { field, message } => AppError::Validation { field, message },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let first = errors.field_errors().into_iter().next().map(|(field, errs)| {
            let message = errs
                .first()
                .and_then(|e| e.message.as_ref())
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{} is invalid", field));
            (field.to_string(), message)
        });
        match first {
            Some((field, message)) => AppError::Validation { field, message },
            None => AppError::validation("request", errors.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = self.status_and_detail();

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{CapacityShortfall, TrayStatus};

    #[test]
    fn test_capacity_errors_carry_system_and_actionable_message() {
        let system_id = Uuid::new_v4();
        let err = AppError::from(DomainError::Capacity {
            system_id,
            reason: CapacityShortfall::InsufficientSpots {
                requested: 18,
                available: 2,
                crop_type: Some("Basil".to_string()),
            },
        });
        let (status, detail) = err.status_and_detail();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(detail.code, "CAPACITY_ERROR");
        assert_eq!(detail.system_id, Some(system_id));
        assert!(detail.message.starts_with("no available spots for 18 plants of type Basil"));
    }

    #[test]
    fn test_domain_error_status_mapping() {
        let cases = [
            (
                DomainError::InvalidQuantity { requested: 0 },
                StatusCode::BAD_REQUEST,
            ),
            (
                DomainError::AllocationMismatch {
                    expected: 10,
                    allocated: 9,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DomainError::InvalidTransition {
                    tray_id: "K071725-MG-ARUG-1".to_string(),
                    status: TrayStatus::Split,
                    action: "moved",
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DomainError::UnknownSystem(Uuid::nil()),
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::NotOccupied {
                    system_id: Uuid::nil(),
                    spot_id: "1".to_string(),
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_and_detail().0, expected);
        }
    }
}
