//! Tray movement proposals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Tray;
use crate::types::SystemType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Automatic,
    Manual,
    Split,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One child of a split movement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitDetail {
    pub child_tray_id: String,
    pub system_id: Uuid,
    pub plant_count: u32,
}

/// A proposed or executed relocation. Derived on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrayMovement {
    pub tray_id: String,
    pub from_system_id: Uuid,
    pub from_system_type: SystemType,
    /// `None` while no destination has capacity
    pub to_system_id: Option<Uuid>,
    pub to_system_type: SystemType,
    pub to_spot_ids: Vec<String>,
    pub kind: MovementKind,
    pub status: MovementStatus,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub split: Vec<SplitDetail>,
    pub proposed_at: DateTime<Utc>,
}

impl TrayMovement {
    /// Completed record of a split, one detail per child
    pub fn split_record(parent: &Tray, children: &[Tray], at: DateTime<Utc>) -> Option<Self> {
        let first = children.first()?;
        Some(Self {
            tray_id: parent.id.clone(),
            from_system_id: parent.current_location.system_id,
            from_system_type: parent.current_location.system_type,
            to_system_id: Some(first.current_location.system_id),
            to_system_type: first.current_location.system_type,
            to_spot_ids: first.current_location.spot_ids.clone(),
            kind: MovementKind::Split,
            status: MovementStatus::Completed,
            reason: Some(format!("Split into {} trays", children.len())),
            split: children
                .iter()
                .map(|child| SplitDetail {
                    child_tray_id: child.id.clone(),
                    system_id: child.current_location.system_id,
                    plant_count: child.plant_count,
                })
                .collect(),
            proposed_at: at,
        })
    }
}
