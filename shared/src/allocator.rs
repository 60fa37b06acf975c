//! Spot allocator
//!
//! Finds placement candidates that satisfy capacity, system type and channel
//! homogeneity. Pure query: always safe to re-run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::models::GrowingSystem;
use crate::types::SystemType;

/// A placement that would satisfy a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub system_id: Uuid,
    pub system_name: String,
    pub system_type: SystemType,
    /// Channel the spots were taken from, for channel-constrained systems
    pub section: Option<String>,
    pub spot_ids: Vec<String>,
    /// Free spots in the system (or channel) before this placement
    pub free_spots: u32,
}

/// Find candidates for `quantity_needed` spots of `system_type`.
///
/// Channel-constrained systems are evaluated per channel: a channel qualifies
/// when it has enough free spots and is either empty or already holds only
/// `crop_type`. Other systems qualify on total free spots. Spot ids are the
/// first free spots in spot order. Results are ordered by free headroom,
/// most first; ties keep the input order.
pub fn find_candidates<'a>(
    systems: impl IntoIterator<Item = &'a GrowingSystem>,
    system_type: SystemType,
    quantity_needed: i64,
    crop_type: Option<&str>,
) -> DomainResult<Vec<Candidate>> {
    if quantity_needed <= 0 {
        return Err(DomainError::InvalidQuantity {
            requested: quantity_needed,
        });
    }
    let needed = usize::try_from(quantity_needed).map_err(|_| DomainError::InvalidQuantity {
        requested: quantity_needed,
    })?;

    let mut candidates = Vec::new();
    for system in systems.into_iter().filter(|s| s.system_type == system_type) {
        if system.is_channel_constrained() {
            for section in &system.sections {
                if let Some(candidate) = channel_candidate(system, &section.name, needed, crop_type)
                {
                    candidates.push(candidate);
                }
            }
        } else {
            let free: Vec<&str> = system
                .spots
                .iter()
                .filter(|s| !s.is_occupied())
                .map(|s| s.id.as_str())
                .collect();
            if free.len() >= needed {
                candidates.push(Candidate {
                    system_id: system.id,
                    system_name: system.name.clone(),
                    system_type: system.system_type,
                    section: None,
                    spot_ids: free.iter().take(needed).map(|s| s.to_string()).collect(),
                    free_spots: free.len() as u32,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.free_spots.cmp(&a.free_spots));
    Ok(candidates)
}

fn channel_candidate(
    system: &GrowingSystem,
    section: &str,
    needed: usize,
    crop_type: Option<&str>,
) -> Option<Candidate> {
    let mut free = Vec::new();
    for spot in system.section_spots(section) {
        match spot.plant_type() {
            None => free.push(spot.id.as_str()),
            Some(planted) if Some(planted) == crop_type => {}
            // Channel holds another crop, or any crop when none was named
            Some(_) => return None,
        }
    }
    if free.len() < needed {
        return None;
    }
    Some(Candidate {
        system_id: system.id,
        system_name: system.name.clone(),
        system_type: system.system_type,
        section: Some(section.to_string()),
        spot_ids: free.iter().take(needed).map(|s| s.to_string()).collect(),
        free_spots: free.len() as u32,
    })
}

/// Best candidate, or a capacity error naming the request
pub fn first_candidate<'a>(
    systems: impl IntoIterator<Item = &'a GrowingSystem>,
    system_type: SystemType,
    quantity_needed: i64,
    crop_type: Option<&str>,
    system_id_for_error: Uuid,
) -> DomainResult<Candidate> {
    let systems: Vec<&GrowingSystem> = systems.into_iter().collect();
    let available = systems
        .iter()
        .filter(|s| s.system_type == system_type)
        .map(|s| s.free_capacity())
        .max()
        .unwrap_or(0);
    find_candidates(systems, system_type, quantity_needed, crop_type)?
        .into_iter()
        .next()
        .ok_or_else(|| DomainError::Capacity {
            system_id: system_id_for_error,
            reason: crate::error::CapacityShortfall::InsufficientSpots {
                requested: u32::try_from(quantity_needed).unwrap_or(u32::MAX),
                available,
                crop_type: crop_type.map(str::to_string),
            },
        })
}
