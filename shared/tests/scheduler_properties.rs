//! Movement scheduler properties
//!
//! - Proposals within one cycle never share a destination spot
//! - Every nursery microgreen tray gets exactly one proposal
//! - Evaluation leaves its inputs untouched

use chrono::{DateTime, NaiveDate, Utc};
use proptest::prelude::*;
use shared::lifecycle::{create_tray, NewTray, Placement};
use shared::scheduler::{evaluate, AWAITING_CAPACITY};
use shared::{CropCategory, GrowingSystem, NewGrowingSystem, SystemType, Tray};
use std::collections::HashSet;
use uuid::Uuid;

// ============================================================================
// Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    "2025-07-17T06:30:00Z".parse().unwrap()
}

fn system(name: &str, system_type: SystemType, capacity: u32) -> GrowingSystem {
    GrowingSystem::provision(
        Uuid::nil(),
        NewGrowingSystem {
            name: name.to_string(),
            system_type,
            crop_category: CropCategory::Microgreens,
            location: "K".to_string(),
            capacity,
            sections: vec![],
            same_per_channel: None,
        },
        now(),
    )
    .unwrap()
}

/// Fill the nursery with `count` trays, one per spot
fn fill_nursery(nursery: &mut GrowingSystem, count: u32) -> Vec<Tray> {
    (1..=count)
        .map(|n| {
            let input = NewTray {
                location_code: "K".to_string(),
                crop_type: "Pea Shoots".to_string(),
                category: CropCategory::Microgreens,
                plant_count: 12,
                planted_date: NaiveDate::from_ymd_opt(2025, 7, 17).unwrap(),
                varieties: vec![],
                notes: None,
                placement: Placement {
                    system_id: nursery.id,
                    system_type: SystemType::Nursery,
                    spot_ids: vec![n.to_string()],
                },
            };
            let transition =
                create_tray(Uuid::nil(), input, n, "ana", std::slice::from_ref(nursery), now()).unwrap();
            *nursery = transition.systems[0].clone();
            transition.created_trays[0].clone()
        })
        .collect()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_proposals_never_double_book(
        trays in 1u32..10,
        first_blackout in 1u32..5,
        second_blackout in 1u32..5,
    ) {
        let mut nursery = system("Nursery", SystemType::Nursery, trays);
        let seeded = fill_nursery(&mut nursery, trays);
        let systems = vec![
            nursery,
            system("Blackout A", SystemType::Blackout, first_blackout),
            system("Blackout B", SystemType::Blackout, second_blackout),
        ];
        let before = systems.clone();

        let proposals = evaluate(&seeded, &systems, now());
        prop_assert_eq!(proposals.len(), seeded.len());
        prop_assert_eq!(&systems, &before);

        let mut claimed = HashSet::new();
        for proposal in proposals.iter().filter(|p| p.to_system_id.is_some()) {
            for spot in &proposal.to_spot_ids {
                prop_assert!(claimed.insert((proposal.to_system_id, spot.clone())));
            }
        }

        let placed = proposals.iter().filter(|p| p.to_system_id.is_some()).count() as u32;
        prop_assert_eq!(placed, trays.min(first_blackout + second_blackout));
        for waiting in proposals.iter().filter(|p| p.to_system_id.is_none()) {
            prop_assert_eq!(waiting.reason.as_deref(), Some(AWAITING_CAPACITY));
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_oldest_placement_is_served_first() {
    let mut nursery = system("Nursery", SystemType::Nursery, 2);
    let mut seeded = fill_nursery(&mut nursery, 2);
    seeded[1].current_location.moved_at = now() - chrono::Duration::hours(3);
    let systems = vec![nursery, system("Blackout", SystemType::Blackout, 1)];

    let proposals = evaluate(&seeded, &systems, now());
    let placed = proposals.iter().find(|p| p.to_system_id.is_some()).unwrap();
    assert_eq!(placed.tray_id, seeded[1].id);
    assert_eq!(placed.reason.as_deref(), Some("Scheduled move to Blackout"));
}
