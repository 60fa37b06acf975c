//! Capacity ledger
//!
//! Single source of truth for whether a system can accept more units and for
//! keeping `occupancy` consistent with spot state. All operations are pure:
//! they return a new [`GrowingSystem`] and leave the input untouched, so a
//! caller can stage several of them and commit only when every step succeeds.

use chrono::NaiveDate;
use std::collections::HashSet;

use crate::error::{CapacityShortfall, DomainError, DomainResult};
use crate::models::{GrowingSystem, SpotOccupant};

/// True iff `capacity - occupancy >= quantity`
pub fn can_accept(system: &GrowingSystem, quantity: u32) -> bool {
    system.free_capacity() >= quantity
}

/// Mark spots occupied by a tray.
///
/// Fails without side effects if any spot is unknown, already occupied,
/// repeated, or would break channel homogeneity.
pub fn reserve(
    system: &GrowingSystem,
    spot_ids: &[String],
    tray_id: &str,
    crop_type: &str,
    planted_date: NaiveDate,
) -> DomainResult<GrowingSystem> {
    if spot_ids.is_empty() {
        return Err(DomainError::InvalidQuantity { requested: 0 });
    }

    let capacity_error = |reason| DomainError::Capacity {
        system_id: system.id,
        reason,
    };

    let mut next = system.clone();
    let mut seen = HashSet::new();
    for spot_id in spot_ids {
        if !seen.insert(spot_id.as_str()) {
            return Err(capacity_error(CapacityShortfall::DuplicateSpot {
                spot_id: spot_id.clone(),
            }));
        }

        let index = next
            .spots
            .iter()
            .position(|s| &s.id == spot_id)
            .ok_or_else(|| {
                capacity_error(CapacityShortfall::UnknownSpot {
                    spot_id: spot_id.clone(),
                })
            })?;

        if let Some(occupant) = &next.spots[index].occupant {
            return Err(capacity_error(CapacityShortfall::SpotOccupied {
                spot_id: spot_id.clone(),
                tray_id: occupant.tray_id.clone(),
            }));
        }

        if next.is_channel_constrained() {
            if let Some(section) = next.spots[index].section.clone() {
                let conflicting = next
                    .section_spots(&section)
                    .filter_map(|s| s.plant_type())
                    .find(|plant| *plant != crop_type)
                    .map(str::to_string);
                if let Some(occupied_by) = conflicting {
                    return Err(capacity_error(CapacityShortfall::ChannelConflict {
                        section,
                        occupied_by,
                        requested: crop_type.to_string(),
                    }));
                }
            }
        }

        next.spots[index].occupant = Some(SpotOccupant {
            tray_id: tray_id.to_string(),
            plant_type: crop_type.to_string(),
            planted_date,
        });
    }

    next.recompute_occupancy();
    Ok(next)
}

/// Clear spots. Fails if a spot is unknown or already free.
pub fn release(system: &GrowingSystem, spot_ids: &[String]) -> DomainResult<GrowingSystem> {
    let mut next = system.clone();
    for spot_id in spot_ids {
        let spot = next
            .spots
            .iter_mut()
            .find(|s| &s.id == spot_id)
            .ok_or_else(|| DomainError::Capacity {
                system_id: system.id,
                reason: CapacityShortfall::UnknownSpot {
                    spot_id: spot_id.clone(),
                },
            })?;

        if spot.occupant.take().is_none() {
            return Err(DomainError::NotOccupied {
                system_id: system.id,
                spot_id: spot_id.clone(),
            });
        }
    }

    next.recompute_occupancy();
    Ok(next)
}

/// Free spot ids in spot-array order
pub fn free_spot_ids(system: &GrowingSystem) -> Vec<&str> {
    system
        .spots
        .iter()
        .filter(|s| !s.is_occupied())
        .map(|s| s.id.as_str())
        .collect()
}

/// Check the ledger invariants, returning a description of the first violation
pub fn check_invariants(system: &GrowingSystem) -> Result<(), String> {
    let occupied = system.spots.iter().filter(|s| s.is_occupied()).count() as u32;
    if system.occupancy != occupied {
        return Err(format!(
            "occupancy {} does not match {} occupied spots",
            system.occupancy, occupied
        ));
    }
    if system.occupancy > system.capacity {
        return Err(format!(
            "occupancy {} exceeds capacity {}",
            system.occupancy, system.capacity
        ));
    }
    if system.is_channel_constrained() {
        for section in &system.sections {
            let crops: HashSet<&str> = system
                .section_spots(&section.name)
                .filter_map(|s| s.plant_type())
                .collect();
            if crops.len() > 1 {
                return Err(format!("channel {} mixes crops {:?}", section.name, crops));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewGrowingSystem, Section};
    use crate::types::{CropCategory, SystemType};
    use chrono::Utc;
    use uuid::Uuid;

    fn planted() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn rack(capacity: u32) -> GrowingSystem {
        GrowingSystem::provision(
            Uuid::new_v4(),
            NewGrowingSystem {
                name: "Rack".to_string(),
                system_type: SystemType::MicrogreenRack,
                crop_category: CropCategory::Microgreens,
                location: "K".to_string(),
                capacity,
                sections: vec![],
                same_per_channel: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn nft() -> GrowingSystem {
        GrowingSystem::provision(
            Uuid::new_v4(),
            NewGrowingSystem {
                name: "NFT".to_string(),
                system_type: SystemType::NftChannelGroup,
                crop_category: CropCategory::LeafyGreens,
                location: "K".to_string(),
                capacity: 4,
                sections: vec![
                    Section {
                        name: "CH1".to_string(),
                        spot_count: 2,
                        spot_kind: "slot".to_string(),
                    },
                    Section {
                        name: "CH2".to_string(),
                        spot_count: 2,
                        spot_kind: "slot".to_string(),
                    },
                ],
                same_per_channel: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_reserve_stamps_spots_and_recomputes_occupancy() {
        let system = rack(3);
        let next = reserve(&system, &ids(&["1", "3"]), "T-1", "Kale", planted()).unwrap();
        assert_eq!(next.occupancy, 2);
        assert_eq!(next.spot("1").and_then(|s| s.tray_id()), Some("T-1"));
        assert_eq!(next.spot("3").and_then(|s| s.plant_type()), Some("Kale"));
        assert!(!next.spot("2").unwrap().is_occupied());
        assert_eq!(system.occupancy, 0, "input must be untouched");
        assert!(check_invariants(&next).is_ok());
    }

    #[test]
    fn test_reserve_rejects_occupied_spot() {
        let system = reserve(&rack(3), &ids(&["1"]), "T-1", "Kale", planted()).unwrap();
        let err = reserve(&system, &ids(&["2", "1"]), "T-2", "Kale", planted()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Capacity {
                reason: CapacityShortfall::SpotOccupied { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_reserve_rejects_unknown_and_duplicate_spots() {
        let system = rack(2);
        assert!(matches!(
            reserve(&system, &ids(&["9"]), "T", "Kale", planted()),
            Err(DomainError::Capacity {
                reason: CapacityShortfall::UnknownSpot { .. },
                ..
            })
        ));
        assert!(matches!(
            reserve(&system, &ids(&["1", "1"]), "T", "Kale", planted()),
            Err(DomainError::Capacity {
                reason: CapacityShortfall::DuplicateSpot { .. },
                ..
            })
        ));
        assert!(matches!(
            reserve(&system, &[], "T", "Kale", planted()),
            Err(DomainError::InvalidQuantity { requested: 0 })
        ));
    }

    #[test]
    fn test_reserve_enforces_channel_homogeneity() {
        let system = reserve(&nft(), &ids(&["CH1-1"]), "T-1", "Basil", planted()).unwrap();
        let err = reserve(&system, &ids(&["CH1-2"]), "T-2", "Kale", planted()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::Capacity {
                reason: CapacityShortfall::ChannelConflict { .. },
                ..
            }
        ));
        // Same crop in the same channel and another crop in an empty channel are fine
        let system = reserve(&system, &ids(&["CH1-2"]), "T-3", "Basil", planted()).unwrap();
        let system = reserve(&system, &ids(&["CH2-1"]), "T-4", "Kale", planted()).unwrap();
        assert!(check_invariants(&system).is_ok());
    }

    #[test]
    fn test_release_clears_spots() {
        let system = reserve(&rack(2), &ids(&["1", "2"]), "T-1", "Kale", planted()).unwrap();
        let next = release(&system, &ids(&["2"])).unwrap();
        assert_eq!(next.occupancy, 1);
        assert!(!next.spot("2").unwrap().is_occupied());
        assert!(can_accept(&next, 1));
        assert!(!can_accept(&next, 2));
    }

    #[test]
    fn test_release_of_free_spot_is_not_occupied_error() {
        let err = release(&rack(2), &ids(&["1"])).unwrap_err();
        assert!(matches!(err, DomainError::NotOccupied { .. }));
    }

    #[test]
    fn test_free_spot_ids_in_order() {
        let system = reserve(&rack(4), &ids(&["2"]), "T-1", "Kale", planted()).unwrap();
        assert_eq!(free_spot_ids(&system), vec!["1", "3", "4"]);
    }
}
