//! Movement scheduler
//!
//! Derives automatic stage-transition proposals from tray age and current
//! system. Evaluation never mutates the caller's state; proposals claim spots
//! only on a private working copy so two trays are not offered the same spot
//! within one cycle.
//!
//! Rules apply to microgreens only:
//! - nursery trays go to blackout immediately
//! - blackout trays go to a microgreen rack after [`BLACKOUT_MIN_DAYS`]
//!
//! A move is only proposed when it advances the tray's stage. A tray that was
//! put back into an earlier system by hand is left where the operator put it.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::allocator::{find_candidates, first_candidate};
use crate::error::{DomainError, DomainResult};
use crate::ledger;
use crate::lifecycle::Placement;
use crate::models::{
    status_for_placement, GrowingSystem, MovementKind, MovementStatus, Tray, TrayMovement,
};
use crate::types::{CropCategory, SystemType};

/// Minimum days in blackout before a rack move is proposed
pub const BLACKOUT_MIN_DAYS: i64 = 2;

/// Reason attached to nursery proposals with no blackout capacity yet
pub const AWAITING_CAPACITY: &str = "Awaiting blackout capacity";

/// Next stage for a tray sitting in `current`, with the age it must reach
fn next_stage(current: SystemType) -> Option<(SystemType, Duration)> {
    match current {
        SystemType::Nursery => Some((SystemType::Blackout, Duration::zero())),
        SystemType::Blackout => Some((SystemType::MicrogreenRack, Duration::days(BLACKOUT_MIN_DAYS))),
        _ => None,
    }
}

/// Compute the movement proposals due at `now`.
///
/// Trays are considered oldest placement first. Blackout trays with no rack
/// capacity get no proposal this cycle; nursery trays still get one, with no
/// destination, so operators see the backlog.
pub fn evaluate(trays: &[Tray], systems: &[GrowingSystem], now: DateTime<Utc>) -> Vec<TrayMovement> {
    let mut working: Vec<GrowingSystem> = systems.to_vec();

    let mut due: Vec<&Tray> = trays
        .iter()
        .filter(|t| t.category == CropCategory::Microgreens && !t.status.is_terminal())
        .collect();
    due.sort_by(|a, b| {
        a.current_location
            .moved_at
            .cmp(&b.current_location.moved_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut proposals = Vec::new();
    for tray in due {
        let from = &tray.current_location;
        let Some((target, min_age)) = next_stage(from.system_type) else {
            continue;
        };
        if tray.age_in_stage(now) < min_age {
            continue;
        }
        let reached = status_for_placement(target, tray.category);
        if reached.stage_rank() <= tray.status.stage_rank() {
            continue;
        }

        let needed = from.spot_ids.len().max(1) as i64;
        let candidate = find_candidates(working.iter(), target, needed, Some(&tray.crop_type))
            .ok()
            .and_then(|found| found.into_iter().next());

        let mut movement = TrayMovement {
            tray_id: tray.id.clone(),
            from_system_id: from.system_id,
            from_system_type: from.system_type,
            to_system_id: None,
            to_system_type: target,
            to_spot_ids: Vec::new(),
            kind: MovementKind::Automatic,
            status: MovementStatus::Pending,
            reason: None,
            split: Vec::new(),
            proposed_at: now,
        };

        match candidate {
            Some(candidate) => {
                let Some(index) = working.iter().position(|s| s.id == candidate.system_id) else {
                    continue;
                };
                match ledger::reserve(
                    &working[index],
                    &candidate.spot_ids,
                    &tray.id,
                    &tray.crop_type,
                    tray.planted_date,
                ) {
                    Ok(claimed) => working[index] = claimed,
                    Err(e) => {
                        debug!("Skipping claim for tray {}: {}", tray.id, e);
                        continue;
                    }
                }
                movement.to_system_id = Some(candidate.system_id);
                movement.to_spot_ids = candidate.spot_ids;
                movement.reason = Some(format!(
                    "Scheduled move to {}",
                    candidate.system_name
                ));
            }
            None if from.system_type == SystemType::Nursery => {
                movement.reason = Some(AWAITING_CAPACITY.to_string());
            }
            None => continue,
        }
        proposals.push(movement);
    }
    proposals
}

/// Resolve a proposal against current state before it is executed.
///
/// The proposed spots are used when still free; otherwise the allocator is
/// asked again. Fails if the tray has moved on since the proposal.
pub fn resolve_target(
    movement: &TrayMovement,
    tray: &Tray,
    systems: &[GrowingSystem],
) -> DomainResult<Placement> {
    if tray.status.is_terminal() {
        return Err(DomainError::InvalidTransition {
            tray_id: tray.id.clone(),
            status: tray.status,
            action: "moved",
        });
    }
    if tray.current_location.system_id != movement.from_system_id {
        return Err(DomainError::validation(
            "tray_id",
            format!("Tray {} has moved since the proposal was made", tray.id),
        ));
    }

    if let Some(system_id) = movement.to_system_id {
        let system = systems
            .iter()
            .find(|s| s.id == system_id)
            .ok_or(DomainError::UnknownSystem(system_id))?;
        let still_free = ledger::reserve(
            system,
            &movement.to_spot_ids,
            &tray.id,
            &tray.crop_type,
            tray.planted_date,
        )
        .is_ok();
        if still_free {
            return Ok(Placement {
                system_id,
                system_type: system.system_type,
                spot_ids: movement.to_spot_ids.clone(),
            });
        }
    }

    let needed = tray.current_location.spot_ids.len().max(1) as i64;
    let error_system = movement.to_system_id.unwrap_or(movement.from_system_id);
    let candidate = first_candidate(
        systems,
        movement.to_system_type,
        needed,
        Some(&tray.crop_type),
        error_system,
    )?;
    Ok(Placement {
        system_id: candidate.system_id,
        system_type: candidate.system_type,
        spot_ids: candidate.spot_ids,
    })
}
