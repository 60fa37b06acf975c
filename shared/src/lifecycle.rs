//! Tray lifecycle engine
//!
//! Owns the tray state machine (`seeded -> germinating -> growing -> ready ->
//! harvested | split | discarded`), location history and split bookkeeping.
//!
//! Every operation takes a snapshot of the systems involved and returns a
//! [`Transition`] holding the new tray and system records. Ledger steps are
//! staged on copies, so a failure at any step returns an error and leaves
//! nothing half-applied; the caller persists the transition as one unit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::ledger;
use crate::models::{
    child_tray_id, estimate_harvest, format_tray_id, status_for_placement, GrowingSystem,
    LocationHistoryEntry, Tray, TrayLocation, TrayStatus, VarietyAllocation,
};
use crate::types::{CropCategory, SystemType};
use crate::validation::{
    validate_crop_name, validate_location_code, validate_spot_ids, validate_varieties,
};

pub const INITIAL_SEEDING_REASON: &str = "Initial seeding";

/// Target system and spots for a placement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub system_id: Uuid,
    pub system_type: SystemType,
    pub spot_ids: Vec<String>,
}

/// Input for seeding a new tray
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTray {
    pub location_code: String,
    pub crop_type: String,
    pub category: CropCategory,
    pub plant_count: i64,
    pub planted_date: NaiveDate,
    #[serde(default)]
    pub varieties: Vec<VarietyAllocation>,
    pub notes: Option<String>,
    pub placement: Placement,
}

/// One child of a split
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitDestination {
    pub system_id: Uuid,
    pub system_type: SystemType,
    pub spot_ids: Vec<String>,
    pub plant_count: i64,
}

/// Records changed by one lifecycle operation, to be committed together
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transition {
    pub updated_trays: Vec<Tray>,
    pub created_trays: Vec<Tray>,
    pub systems: Vec<GrowingSystem>,
}

impl Transition {
    /// The tray the operation was about
    pub fn subject(&self) -> Option<&Tray> {
        self.updated_trays.first().or_else(|| self.created_trays.first())
    }
}

/// Staged copies of the systems an operation touches
struct Workset<'a> {
    base: &'a [GrowingSystem],
    staged: BTreeMap<Uuid, GrowingSystem>,
}

impl<'a> Workset<'a> {
    fn new(base: &'a [GrowingSystem]) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
        }
    }

    fn current(&self, system_id: Uuid) -> DomainResult<&GrowingSystem> {
        if let Some(staged) = self.staged.get(&system_id) {
            return Ok(staged);
        }
        self.base
            .iter()
            .find(|s| s.id == system_id)
            .ok_or(DomainError::UnknownSystem(system_id))
    }

    fn reserve(
        &mut self,
        system_id: Uuid,
        spot_ids: &[String],
        tray_id: &str,
        crop_type: &str,
        planted: NaiveDate,
    ) -> DomainResult<()> {
        let next = ledger::reserve(self.current(system_id)?, spot_ids, tray_id, crop_type, planted)?;
        self.staged.insert(system_id, next);
        Ok(())
    }

    /// Release spots, refusing any that the tray does not hold
    fn release_held(&mut self, tray: &Tray) -> DomainResult<()> {
        let location = &tray.current_location;
        if location.spot_ids.is_empty() {
            return Ok(());
        }
        let system = self.current(location.system_id)?;
        for spot_id in &location.spot_ids {
            let held = system
                .spot(spot_id)
                .and_then(|s| s.tray_id())
                .is_some_and(|holder| holder == tray.id);
            if !held {
                return Err(DomainError::NotOccupied {
                    system_id: system.id,
                    spot_id: spot_id.clone(),
                });
            }
        }
        let next = ledger::release(system, &location.spot_ids)?;
        self.staged.insert(location.system_id, next);
        Ok(())
    }

    fn finish(self, now: DateTime<Utc>) -> Vec<GrowingSystem> {
        self.staged
            .into_values()
            .map(|mut system| {
                system.updated_at = now;
                system
            })
            .collect()
    }
}

fn positive_count(value: i64) -> DomainResult<u32> {
    match u32::try_from(value) {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(DomainError::InvalidQuantity { requested: value }),
    }
}

fn ensure_active(tray: &Tray, action: &'static str) -> DomainResult<()> {
    if tray.status.is_terminal() {
        return Err(DomainError::InvalidTransition {
            tray_id: tray.id.clone(),
            status: tray.status,
            action,
        });
    }
    Ok(())
}

fn ensure_type(system: &GrowingSystem, expected: SystemType) -> DomainResult<()> {
    if system.system_type != expected {
        return Err(DomainError::validation(
            "system_type",
            format!(
                "System {} is a {} system, not {}",
                system.name,
                system.system_type.as_str(),
                expected.as_str()
            ),
        ));
    }
    Ok(())
}

/// Status never moves backwards
fn advance(current: TrayStatus, placed: TrayStatus) -> TrayStatus {
    if placed.stage_rank() > current.stage_rank() {
        placed
    } else {
        current
    }
}

/// History entry that leaves the tray at its system without holding spots
fn terminal_entry(tray: &Tray, actor: &str, reason: String, now: DateTime<Utc>) -> LocationHistoryEntry {
    LocationHistoryEntry {
        location: TrayLocation {
            system_id: tray.current_location.system_id,
            system_type: tray.current_location.system_type,
            spot_ids: Vec::new(),
            moved_at: now,
        },
        moved_by: actor.to_string(),
        reason: Some(reason),
    }
}

/// Seed a new tray into its first placement.
///
/// `instance` is the per-day discriminator; callers derive it with
/// [`crate::models::next_instance`] so the id does not collide.
pub fn create_tray(
    farm_id: Uuid,
    input: NewTray,
    instance: u32,
    creator: &str,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    let plant_count = positive_count(input.plant_count)?;
    validate_location_code(&input.location_code)
        .map_err(|m| DomainError::validation("location_code", m))?;
    validate_crop_name(&input.crop_type).map_err(|m| DomainError::validation("crop_type", m))?;
    validate_varieties(&input.varieties, plant_count)
        .map_err(|m| DomainError::validation("varieties", m))?;
    validate_spot_ids(&input.placement.spot_ids)
        .map_err(|m| DomainError::validation("spot_ids", m))?;

    let placement = input.placement;
    let mut work = Workset::new(systems);
    ensure_type(work.current(placement.system_id)?, placement.system_type)?;

    let crop_type = input.crop_type.trim().to_string();
    let id = format_tray_id(
        &input.location_code,
        input.planted_date,
        input.category,
        &crop_type,
        instance,
    );
    work.reserve(
        placement.system_id,
        &placement.spot_ids,
        &id,
        &crop_type,
        input.planted_date,
    )?;

    let estimate = estimate_harvest(&crop_type, input.planted_date);
    let location = TrayLocation {
        system_id: placement.system_id,
        system_type: placement.system_type,
        spot_ids: placement.spot_ids,
        moved_at: now,
    };

    let tray = Tray {
        id,
        farm_id,
        crop_type,
        category: input.category,
        planted_date: input.planted_date,
        expected_harvest: estimate.date,
        harvest_estimated: estimate.defaulted,
        status: TrayStatus::Seeded,
        current_location: location.clone(),
        location_history: vec![LocationHistoryEntry {
            location,
            moved_by: creator.to_string(),
            reason: Some(INITIAL_SEEDING_REASON.to_string()),
        }],
        parent_tray_id: None,
        child_tray_ids: Vec::new(),
        plant_count,
        varieties: input.varieties,
        notes: input.notes.filter(|n| !n.trim().is_empty()),
        created_by: creator.to_string(),
        created_at: now,
        updated_at: now,
        version: 1,
    };

    Ok(Transition {
        updated_trays: Vec::new(),
        created_trays: vec![tray],
        systems: work.finish(now),
    })
}

/// Relocate a tray. Release of the old spots and reservation of the new ones
/// succeed or fail together.
pub fn move_tray(
    tray: &Tray,
    destination: Placement,
    mover: &str,
    reason: Option<String>,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    ensure_active(tray, "moved")?;
    validate_spot_ids(&destination.spot_ids)
        .map_err(|m| DomainError::validation("spot_ids", m))?;

    let mut work = Workset::new(systems);
    ensure_type(work.current(destination.system_id)?, destination.system_type)?;
    work.release_held(tray)?;
    work.reserve(
        destination.system_id,
        &destination.spot_ids,
        &tray.id,
        &tray.crop_type,
        tray.planted_date,
    )?;

    let mut next = tray.clone();
    next.status = advance(
        tray.status,
        status_for_placement(destination.system_type, tray.category),
    );
    next.record_location(LocationHistoryEntry {
        location: TrayLocation {
            system_id: destination.system_id,
            system_type: destination.system_type,
            spot_ids: destination.spot_ids,
            moved_at: now,
        },
        moved_by: mover.to_string(),
        reason: reason.filter(|r| !r.trim().is_empty()),
    });

    Ok(Transition {
        updated_trays: vec![next],
        created_trays: Vec::new(),
        systems: work.finish(now),
    })
}

/// Divide a tray's plants across new child trays and retire the parent.
///
/// Destination plant counts must add up to the parent's plant count. All
/// child reservations are staged before anything is returned.
pub fn split_tray(
    parent: &Tray,
    destinations: Vec<SplitDestination>,
    splitter: &str,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    ensure_active(parent, "split")?;
    if destinations.is_empty() {
        return Err(DomainError::validation(
            "destinations",
            "At least one destination is required",
        ));
    }

    let counts = destinations
        .iter()
        .map(|d| positive_count(d.plant_count))
        .collect::<DomainResult<Vec<u32>>>()?;
    let allocated: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    if allocated != u64::from(parent.plant_count) {
        return Err(DomainError::AllocationMismatch {
            expected: parent.plant_count,
            allocated: u32::try_from(allocated).unwrap_or(u32::MAX),
        });
    }
    for destination in &destinations {
        validate_spot_ids(&destination.spot_ids)
            .map_err(|m| DomainError::validation("spot_ids", m))?;
    }

    let mut work = Workset::new(systems);
    work.release_held(parent)?;

    let shares = distribute_varieties(&parent.varieties, &counts);
    let mut children = Vec::with_capacity(destinations.len());
    for (index, ((destination, plant_count), varieties)) in destinations
        .into_iter()
        .zip(counts)
        .zip(shares)
        .enumerate()
    {
        ensure_type(work.current(destination.system_id)?, destination.system_type)?;
        let child_id = child_tray_id(&parent.id, index + 1);
        work.reserve(
            destination.system_id,
            &destination.spot_ids,
            &child_id,
            &parent.crop_type,
            parent.planted_date,
        )?;

        let location = TrayLocation {
            system_id: destination.system_id,
            system_type: destination.system_type,
            spot_ids: destination.spot_ids,
            moved_at: now,
        };
        children.push(Tray {
            id: child_id,
            farm_id: parent.farm_id,
            crop_type: parent.crop_type.clone(),
            category: parent.category,
            planted_date: parent.planted_date,
            expected_harvest: parent.expected_harvest,
            harvest_estimated: parent.harvest_estimated,
            status: advance(
                parent.status,
                status_for_placement(destination.system_type, parent.category),
            ),
            current_location: location.clone(),
            location_history: vec![LocationHistoryEntry {
                location,
                moved_by: splitter.to_string(),
                reason: Some(format!("Split from {}", parent.id)),
            }],
            parent_tray_id: Some(parent.id.clone()),
            child_tray_ids: Vec::new(),
            plant_count,
            varieties,
            notes: None,
            created_by: splitter.to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
        });
    }

    let summary = children
        .iter()
        .map(|c| format!("{} ({})", c.id, c.plant_count))
        .collect::<Vec<_>>()
        .join(", ");
    let mut retired = parent.clone();
    retired.status = TrayStatus::Split;
    retired.child_tray_ids = children.iter().map(|c| c.id.clone()).collect();
    retired.append_note(&format!(
        "Split into {} trays by {}: {}",
        children.len(),
        splitter,
        summary
    ));
    let entry = terminal_entry(
        parent,
        splitter,
        format!("Split into {} trays", children.len()),
        now,
    );
    retired.record_location(entry);

    Ok(Transition {
        updated_trays: vec![retired],
        created_trays: children,
        systems: work.finish(now),
    })
}

/// `growing -> ready`
pub fn mark_ready(tray: &Tray, actor: &str, now: DateTime<Utc>) -> DomainResult<Tray> {
    if tray.status != TrayStatus::Growing {
        return Err(DomainError::InvalidTransition {
            tray_id: tray.id.clone(),
            status: tray.status,
            action: "marked ready",
        });
    }
    let mut next = tray.clone();
    next.status = TrayStatus::Ready;
    next.append_note(&format!("Marked ready by {}", actor));
    next.updated_at = now;
    Ok(next)
}

/// `growing | ready -> harvested`, releasing the tray's spots
pub fn harvest_tray(
    tray: &Tray,
    harvester: &str,
    note: Option<String>,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    if !matches!(tray.status, TrayStatus::Growing | TrayStatus::Ready) {
        return Err(DomainError::InvalidTransition {
            tray_id: tray.id.clone(),
            status: tray.status,
            action: "harvested",
        });
    }
    retire(
        tray,
        TrayStatus::Harvested,
        harvester,
        "Harvested".to_string(),
        note,
        systems,
        now,
    )
}

/// Any non-terminal status `-> discarded`, releasing the tray's spots
pub fn discard_tray(
    tray: &Tray,
    actor: &str,
    reason: &str,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    ensure_active(tray, "discarded")?;
    if reason.trim().is_empty() {
        return Err(DomainError::validation("reason", "A discard reason is required"));
    }
    retire(
        tray,
        TrayStatus::Discarded,
        actor,
        format!("Discarded: {}", reason.trim()),
        None,
        systems,
        now,
    )
}

fn retire(
    tray: &Tray,
    status: TrayStatus,
    actor: &str,
    reason: String,
    note: Option<String>,
    systems: &[GrowingSystem],
    now: DateTime<Utc>,
) -> DomainResult<Transition> {
    let mut work = Workset::new(systems);
    work.release_held(tray)?;

    let mut next = tray.clone();
    next.status = status;
    next.append_note(&format!("{} by {}", reason, actor));
    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        next.append_note(note.trim());
    }
    next.record_location(terminal_entry(tray, actor, reason, now));

    Ok(Transition {
        updated_trays: vec![next],
        created_trays: Vec::new(),
        systems: work.finish(now),
    })
}

/// Replace notes and/or varieties
pub fn update_details(
    tray: &Tray,
    notes: Option<String>,
    varieties: Option<Vec<VarietyAllocation>>,
    now: DateTime<Utc>,
) -> DomainResult<Tray> {
    let mut next = tray.clone();
    if let Some(varieties) = varieties {
        ensure_active(tray, "re-allocated")?;
        validate_varieties(&varieties, tray.plant_count)
            .map_err(|m| DomainError::validation("varieties", m))?;
        next.varieties = varieties;
    }
    if let Some(notes) = notes {
        next.notes = Some(notes).filter(|n| !n.trim().is_empty());
    }
    next.updated_at = now;
    Ok(next)
}

/// Split `total` into `parts` counts, remainder to the first parts
pub fn even_split(total: u32, parts: usize) -> Vec<u32> {
    let Ok(n) = u32::try_from(parts) else {
        return Vec::new();
    };
    if n == 0 {
        return Vec::new();
    }
    let base = total / n;
    let remainder = (total % n) as usize;
    (0..parts)
        .map(|i| base + u32::from(i < remainder))
        .collect()
}

/// Distribute each variety across children in proportion to their plant
/// counts.
///
/// Each child first gets `floor(quantity * count / total)`; the remainder is
/// handed out one unit at a time from the first child onward, skipping any
/// child whose variety total already equals its plant count.
pub fn distribute_varieties(
    varieties: &[VarietyAllocation],
    child_counts: &[u32],
) -> Vec<Vec<VarietyAllocation>> {
    let children = child_counts.len();
    let mut out = vec![Vec::new(); children];
    let total: u64 = child_counts.iter().map(|&c| u64::from(c)).sum();
    if children == 0 || total == 0 {
        return out;
    }

    let mut filled = vec![0u32; children];
    for variety in varieties {
        let mut shares: Vec<u32> = child_counts
            .iter()
            .map(|&c| (u64::from(variety.quantity) * u64::from(c) / total) as u32)
            .collect();
        let mut remainder = variety.quantity - shares.iter().sum::<u32>();

        let mut index = 0;
        let mut idle = 0;
        while remainder > 0 && idle < children {
            if filled[index] + shares[index] < child_counts[index] {
                shares[index] += 1;
                remainder -= 1;
                idle = 0;
            } else {
                idle += 1;
            }
            index = (index + 1) % children;
        }
        // Only reachable when the parent's varieties already exceeded its plants
        shares[0] += remainder;

        for (i, share) in shares.into_iter().enumerate() {
            filled[i] += share;
            if share > 0 {
                out[i].push(VarietyAllocation {
                    seed_id: variety.seed_id.clone(),
                    seed_name: variety.seed_name.clone(),
                    quantity: share,
                });
            }
        }
    }
    out
}
