//! Tray models and status machine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CropCategory, SystemType};

/// Lifecycle status of a tray
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrayStatus {
    Seeded,
    Germinating,
    Growing,
    Ready,
    Harvested,
    Split,
    Discarded,
}

impl TrayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrayStatus::Seeded => "seeded",
            TrayStatus::Germinating => "germinating",
            TrayStatus::Growing => "growing",
            TrayStatus::Ready => "ready",
            TrayStatus::Harvested => "harvested",
            TrayStatus::Split => "split",
            TrayStatus::Discarded => "discarded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "seeded" => Some(TrayStatus::Seeded),
            "germinating" => Some(TrayStatus::Germinating),
            "growing" => Some(TrayStatus::Growing),
            "ready" => Some(TrayStatus::Ready),
            "harvested" => Some(TrayStatus::Harvested),
            "split" => Some(TrayStatus::Split),
            "discarded" => Some(TrayStatus::Discarded),
            _ => None,
        }
    }

    /// Terminal trays are audit records and accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrayStatus::Harvested | TrayStatus::Split | TrayStatus::Discarded
        )
    }

    /// Position along the growth cycle; terminal states share the last rank
    pub fn stage_rank(&self) -> u8 {
        match self {
            TrayStatus::Seeded => 0,
            TrayStatus::Germinating => 1,
            TrayStatus::Growing => 2,
            TrayStatus::Ready => 3,
            TrayStatus::Harvested | TrayStatus::Split | TrayStatus::Discarded => 4,
        }
    }
}

impl std::fmt::Display for TrayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status a tray takes on when placed in a system of the given type
pub fn status_for_placement(system_type: SystemType, category: CropCategory) -> TrayStatus {
    match (system_type, category) {
        (SystemType::Nursery, _) => TrayStatus::Seeded,
        (SystemType::Blackout, _) => TrayStatus::Germinating,
        // Leafy greens propagate on ebb-and-flow tables before transplanting
        (SystemType::EbbFlow, CropCategory::LeafyGreens) => TrayStatus::Seeded,
        (SystemType::EbbFlow, CropCategory::Microgreens) => TrayStatus::Growing,
        (SystemType::MicrogreenRack, _)
        | (SystemType::Tower, _)
        | (SystemType::NftChannelGroup, _) => TrayStatus::Growing,
    }
}

/// Where a tray sits right now
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrayLocation {
    pub system_id: Uuid,
    pub system_type: SystemType,
    pub spot_ids: Vec<String>,
    pub moved_at: DateTime<Utc>,
}

/// Append-only record of one relocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationHistoryEntry {
    #[serde(flatten)]
    pub location: TrayLocation,
    pub moved_by: String,
    pub reason: Option<String>,
}

/// Seed variety sub-allocation within a tray
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarietyAllocation {
    pub seed_id: String,
    pub seed_name: Option<String>,
    pub quantity: u32,
}

/// Physical unit of planted crop tracked through its growth cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tray {
    /// `{locationCode}{MMDDYY}-{typeCode}-{cropCode}-{instance}`
    pub id: String,
    pub farm_id: Uuid,
    pub crop_type: String,
    pub category: CropCategory,
    pub planted_date: NaiveDate,
    pub expected_harvest: NaiveDate,
    /// Set when the crop was missing from the growth table
    pub harvest_estimated: bool,
    pub status: TrayStatus,
    /// Always mirrors the last history entry
    pub current_location: TrayLocation,
    pub location_history: Vec<LocationHistoryEntry>,
    pub parent_tray_id: Option<String>,
    pub child_tray_ids: Vec<String>,
    pub plant_count: u32,
    pub varieties: Vec<VarietyAllocation>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Tray {
    /// Append a history entry and mirror it as the current location
    pub fn record_location(&mut self, entry: LocationHistoryEntry) {
        self.current_location = entry.location.clone();
        self.updated_at = entry.location.moved_at;
        self.location_history.push(entry);
    }

    /// Append a line to the free-text notes
    pub fn append_note(&mut self, note: &str) {
        match self.notes.as_mut() {
            Some(existing) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(note);
            }
            _ => self.notes = Some(note.to_string()),
        }
    }

    pub fn variety_total(&self) -> u32 {
        self.varieties.iter().map(|v| v.quantity).sum()
    }

    /// Time spent in the current system
    pub fn age_in_stage(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.current_location.moved_at
    }

    pub fn days_to_harvest(&self, today: NaiveDate) -> i64 {
        (self.expected_harvest - today).num_days()
    }

    /// Whether `current_location` equals the last history entry
    pub fn location_is_consistent(&self) -> bool {
        self.location_history
            .last()
            .is_some_and(|last| last.location == self.current_location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TrayStatus::Harvested.is_terminal());
        assert!(TrayStatus::Split.is_terminal());
        assert!(TrayStatus::Discarded.is_terminal());
        assert!(!TrayStatus::Ready.is_terminal());
        assert!(!TrayStatus::Seeded.is_terminal());
    }

    #[test]
    fn test_stage_rank_is_monotonic_along_the_cycle() {
        let cycle = [
            TrayStatus::Seeded,
            TrayStatus::Germinating,
            TrayStatus::Growing,
            TrayStatus::Ready,
            TrayStatus::Harvested,
        ];
        for pair in cycle.windows(2) {
            assert!(pair[0].stage_rank() < pair[1].stage_rank());
        }
    }

    #[test]
    fn test_placement_table() {
        use CropCategory::*;
        assert_eq!(
            status_for_placement(SystemType::Blackout, Microgreens),
            TrayStatus::Germinating
        );
        assert_eq!(
            status_for_placement(SystemType::Nursery, LeafyGreens),
            TrayStatus::Seeded
        );
        assert_eq!(
            status_for_placement(SystemType::MicrogreenRack, Microgreens),
            TrayStatus::Growing
        );
        assert_eq!(
            status_for_placement(SystemType::EbbFlow, LeafyGreens),
            TrayStatus::Seeded
        );
        assert_eq!(
            status_for_placement(SystemType::NftChannelGroup, LeafyGreens),
            TrayStatus::Growing
        );
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for s in [
            TrayStatus::Seeded,
            TrayStatus::Germinating,
            TrayStatus::Growing,
            TrayStatus::Ready,
            TrayStatus::Harvested,
            TrayStatus::Split,
            TrayStatus::Discarded,
        ] {
            assert_eq!(TrayStatus::from_str(s.as_str()), Some(s));
        }
    }
}
