//! Growing system and spot models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::types::{CropCategory, SystemType};

/// A named sub-section of a system (e.g. an NFT channel)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub spot_count: u32,
    /// Free-form label such as "slot" or "tray position"
    pub spot_kind: String,
}

/// What currently sits in a spot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpotOccupant {
    pub tray_id: String,
    pub plant_type: String,
    pub planted_date: NaiveDate,
}

/// One placement slot within a growing system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Spot {
    /// Unique within the parent system
    pub id: String,
    pub section: Option<String>,
    pub occupant: Option<SpotOccupant>,
}

impl Spot {
    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    pub fn plant_type(&self) -> Option<&str> {
        self.occupant.as_ref().map(|o| o.plant_type.as_str())
    }

    pub fn tray_id(&self) -> Option<&str> {
        self.occupant.as_ref().map(|o| o.tray_id.as_str())
    }
}

/// A physical growing installation with finite placement capacity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrowingSystem {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub name: String,
    pub system_type: SystemType,
    pub crop_category: CropCategory,
    pub location: String,
    pub capacity: u32,
    pub sections: Vec<Section>,
    /// Occupied spots within a section must share one crop
    pub same_per_channel: bool,
    /// Projection of `spots`; recomputed on every mutation and load
    pub occupancy: u32,
    pub spots: Vec<Spot>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for provisioning a growing system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGrowingSystem {
    pub name: String,
    pub system_type: SystemType,
    pub crop_category: CropCategory,
    pub location: String,
    pub capacity: u32,
    #[serde(default)]
    pub sections: Vec<Section>,
    pub same_per_channel: Option<bool>,
}

impl GrowingSystem {
    /// Build a system and its empty spots.
    ///
    /// Sectioned systems get `"{section}-{n}"` spot ids and must account for
    /// the whole capacity; unsectioned systems get `"1".."capacity"`.
    pub fn provision(
        farm_id: Uuid,
        input: NewGrowingSystem,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::validation("name", "System name cannot be empty"));
        }
        if input.capacity == 0 {
            return Err(DomainError::validation("capacity", "Capacity must be at least 1"));
        }
        if input.system_type == SystemType::NftChannelGroup && input.sections.is_empty() {
            return Err(DomainError::validation(
                "sections",
                "NFT channel groups must declare their channels",
            ));
        }

        let mut names = HashSet::new();
        for section in &input.sections {
            if section.name.trim().is_empty() {
                return Err(DomainError::validation("sections", "Section name cannot be empty"));
            }
            if !names.insert(section.name.as_str()) {
                return Err(DomainError::validation(
                    "sections",
                    format!("Section {} is declared twice", section.name),
                ));
            }
            if section.spot_count == 0 {
                return Err(DomainError::validation(
                    "sections",
                    format!("Section {} has no spots", section.name),
                ));
            }
        }

        let spots: Vec<Spot> = if input.sections.is_empty() {
            (1..=input.capacity)
                .map(|n| Spot {
                    id: n.to_string(),
                    section: None,
                    occupant: None,
                })
                .collect()
        } else {
            let declared: u32 = input.sections.iter().map(|s| s.spot_count).sum();
            if declared != input.capacity {
                return Err(DomainError::validation(
                    "sections",
                    format!(
                        "Sections declare {} spots but capacity is {}",
                        declared, input.capacity
                    ),
                ));
            }
            input
                .sections
                .iter()
                .flat_map(|section| {
                    (1..=section.spot_count).map(move |n| Spot {
                        id: format!("{}-{}", section.name, n),
                        section: Some(section.name.clone()),
                        occupant: None,
                    })
                })
                .collect()
        };

        let same_per_channel = input
            .same_per_channel
            .unwrap_or_else(|| input.system_type.default_same_per_channel());

        Ok(Self {
            id: Uuid::new_v4(),
            farm_id,
            name: input.name.trim().to_string(),
            system_type: input.system_type,
            crop_category: input.crop_category,
            location: input.location,
            capacity: input.capacity,
            sections: input.sections,
            same_per_channel,
            occupancy: 0,
            spots,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Recompute the cached occupancy from spot state
    pub fn recompute_occupancy(&mut self) {
        self.occupancy = self.spots.iter().filter(|s| s.is_occupied()).count() as u32;
    }

    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.occupancy)
    }

    pub fn spot(&self, spot_id: &str) -> Option<&Spot> {
        self.spots.iter().find(|s| s.id == spot_id)
    }

    /// Whether the channel homogeneity rule applies
    pub fn is_channel_constrained(&self) -> bool {
        self.same_per_channel && !self.sections.is_empty()
    }

    pub fn section_spots<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a Spot> + 'a {
        self.spots
            .iter()
            .filter(move |s| s.section.as_deref() == Some(section))
    }

    /// Spot ids currently held by a tray, in spot order
    pub fn spots_held_by(&self, tray_id: &str) -> Vec<String> {
        self.spots
            .iter()
            .filter(|s| s.tray_id() == Some(tray_id))
            .map(|s| s.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nft_input() -> NewGrowingSystem {
        NewGrowingSystem {
            name: "NFT Bay 1".to_string(),
            system_type: SystemType::NftChannelGroup,
            crop_category: CropCategory::LeafyGreens,
            location: "K".to_string(),
            capacity: 36,
            sections: vec![
                Section {
                    name: "CH1".to_string(),
                    spot_count: 18,
                    spot_kind: "slot".to_string(),
                },
                Section {
                    name: "CH2".to_string(),
                    spot_count: 18,
                    spot_kind: "slot".to_string(),
                },
            ],
            same_per_channel: None,
        }
    }

    #[test]
    fn test_provision_sectioned_system_names_spots_per_channel() {
        let system = GrowingSystem::provision(Uuid::new_v4(), nft_input(), Utc::now()).unwrap();
        assert_eq!(system.spots.len(), 36);
        assert_eq!(system.spots[0].id, "CH1-1");
        assert_eq!(system.spots[18].id, "CH2-1");
        assert_eq!(system.section_spots("CH2").count(), 18);
        assert!(system.is_channel_constrained());
        assert_eq!(system.occupancy, 0);
    }

    #[test]
    fn test_provision_rejects_section_capacity_mismatch() {
        let mut input = nft_input();
        input.capacity = 40;
        assert!(GrowingSystem::provision(Uuid::new_v4(), input, Utc::now()).is_err());
    }

    #[test]
    fn test_provision_rejects_nft_without_channels() {
        let mut input = nft_input();
        input.sections.clear();
        assert!(GrowingSystem::provision(Uuid::new_v4(), input, Utc::now()).is_err());
    }

    #[test]
    fn test_provision_flat_system_numbers_spots() {
        let input = NewGrowingSystem {
            name: "Rack A".to_string(),
            system_type: SystemType::MicrogreenRack,
            crop_category: CropCategory::Microgreens,
            location: "K".to_string(),
            capacity: 3,
            sections: vec![],
            same_per_channel: None,
        };
        let system = GrowingSystem::provision(Uuid::new_v4(), input, Utc::now()).unwrap();
        let ids: Vec<&str> = system.spots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(!system.is_channel_constrained());
        assert_eq!(system.free_capacity(), 3);
    }

    #[test]
    fn test_provision_rejects_zero_capacity() {
        let input = NewGrowingSystem {
            name: "Empty".to_string(),
            system_type: SystemType::Nursery,
            crop_category: CropCategory::Microgreens,
            location: "K".to_string(),
            capacity: 0,
            sections: vec![],
            same_per_channel: None,
        };
        assert!(GrowingSystem::provision(Uuid::new_v4(), input, Utc::now()).is_err());
    }
}
