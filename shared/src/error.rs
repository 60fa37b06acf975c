//! Domain errors raised by the ledger, allocator and lifecycle engine
//!
//! Every variant is a local validation failure detected before any state is
//! mutated. Callers surface them; nothing in this crate swallows them.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::TrayStatus;

/// Why a reservation could not be satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapacityShortfall {
    /// Spot id does not exist in the system
    UnknownSpot { spot_id: String },
    /// Spot is already held by another tray
    SpotOccupied { spot_id: String, tray_id: String },
    /// Same spot named twice in one request
    DuplicateSpot { spot_id: String },
    /// Channel already holds a different crop
    ChannelConflict {
        section: String,
        occupied_by: String,
        requested: String,
    },
    /// Not enough free spots for the requested quantity
    InsufficientSpots {
        requested: u32,
        available: u32,
        crop_type: Option<String>,
    },
}

impl std::fmt::Display for CapacityShortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityShortfall::UnknownSpot { spot_id } => write!(f, "spot {} does not exist", spot_id),
            CapacityShortfall::SpotOccupied { spot_id, tray_id } => {
                write!(f, "spot {} is already occupied by tray {}", spot_id, tray_id)
            }
            CapacityShortfall::DuplicateSpot { spot_id } => {
                write!(f, "spot {} was requested more than once", spot_id)
            }
            CapacityShortfall::ChannelConflict {
                section,
                occupied_by,
                requested,
            } => write!(
                f,
                "channel {} already holds {}, cannot place {}",
                section, occupied_by, requested
            ),
            CapacityShortfall::InsufficientSpots {
                requested,
                available,
                crop_type: Some(crop),
            } => write!(
                f,
                "no available spots for {} plants of type {} ({} free)",
                requested, crop, available
            ),
            CapacityShortfall::InsufficientSpots {
                requested,
                available,
                crop_type: None,
            } => write!(f, "no available spots for {} units ({} free)", requested, available),
        }
    }
}

/// Errors raised by domain operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("capacity error in system {system_id}: {reason}")]
    Capacity {
        system_id: Uuid,
        reason: CapacityShortfall,
    },

    #[error("spot {spot_id} in system {system_id} is not occupied")]
    NotOccupied { system_id: Uuid, spot_id: String },

    #[error("quantity must be positive, got {requested}")]
    InvalidQuantity { requested: i64 },

    #[error("split allocates {allocated} plants but the tray holds {expected}")]
    AllocationMismatch { expected: u32, allocated: u32 },

    #[error("tray {tray_id} is {status} and cannot be {action}")]
    InvalidTransition {
        tray_id: String,
        status: TrayStatus,
        action: &'static str,
    },

    #[error("growing system {0} not found")]
    UnknownSystem(Uuid),

    #[error("{field}: {message}")]
    Validation { field: String, message: String },
}

impl DomainError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        DomainError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// System id carried by capacity-related errors
    pub fn system_id(&self) -> Option<Uuid> {
        match self {
            DomainError::Capacity { system_id, .. }
            | DomainError::NotOccupied { system_id, .. }
            | DomainError::UnknownSystem(system_id) => Some(*system_id),
            _ => None,
        }
    }
}

/// Crop missing from the growth-duration table.
///
/// Recoverable: callers fall back to [`crate::models::DEFAULT_GROWTH_DAYS`]
/// and flag the estimate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no growth duration recorded for crop '{crop}'")]
pub struct UnknownCropDuration {
    pub crop: String,
}

pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_spots_message_is_actionable() {
        let reason = CapacityShortfall::InsufficientSpots {
            requested: 18,
            available: 4,
            crop_type: Some("Basil".to_string()),
        };
        assert_eq!(
            reason.to_string(),
            "no available spots for 18 plants of type Basil (4 free)"
        );
    }

    #[test]
    fn test_system_id_is_exposed_for_capacity_errors() {
        let id = Uuid::new_v4();
        let err = DomainError::Capacity {
            system_id: id,
            reason: CapacityShortfall::UnknownSpot {
                spot_id: "A-1".to_string(),
            },
        };
        assert_eq!(err.system_id(), Some(id));
        assert_eq!(DomainError::InvalidQuantity { requested: 0 }.system_id(), None);
    }
}
