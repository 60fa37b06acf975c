//! Tray service
//!
//! Runs lifecycle operations against the store. Each operation locks the
//! tray and every system it touches, reads a fresh snapshot, lets the
//! lifecycle engine compute the transition and commits it in one call.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::lifecycle::{self, NewTray, Placement, SplitDestination};
use shared::{
    next_instance, tray_id_prefix, CropCategory, GrowingSystem, LocationHistoryEntry, Tray,
    TrayMovement, VarietyAllocation,
};

use crate::error::{AppError, AppResult};
use crate::middleware::Operator;
use crate::services::events::{EventBus, FarmEvent, FarmEventKind};
use crate::services::locks::{TransitionGuard, TransitionLocks};
use crate::store::{Commit, FarmStore, SystemFilter, TrayFilter};

// ============================================================================
// Inputs
// ============================================================================

/// Input for seeding a tray
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTrayInput {
    #[validate(length(min = 1, max = 4, message = "Location code must be 1-4 characters"))]
    pub location_code: String,
    #[validate(length(min = 1, max = 64, message = "Crop type must be 1-64 characters"))]
    pub crop_type: String,
    pub category: CropCategory,
    pub plant_count: i64,
    /// Defaults to today
    pub planted_date: Option<NaiveDate>,
    #[serde(default)]
    pub varieties: Vec<VarietyAllocation>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub placement: Placement,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoveTrayInput {
    #[serde(flatten)]
    pub destination: Placement,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SplitTrayInput {
    pub destinations: Vec<SplitDestination>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTrayInput {
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub varieties: Option<Vec<VarietyAllocation>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HarvestInput {
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DiscardInput {
    #[validate(length(min = 1, max = 500, message = "A discard reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SplitResult {
    pub parent: Tray,
    pub children: Vec<Tray>,
    pub movement: Option<TrayMovement>,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct TrayService {
    store: Arc<dyn FarmStore>,
    locks: TransitionLocks,
    events: EventBus,
}

impl TrayService {
    pub fn new(store: Arc<dyn FarmStore>, locks: TransitionLocks, events: EventBus) -> Self {
        Self {
            store,
            locks,
            events,
        }
    }

    pub async fn list(&self, farm_id: Uuid, filter: &TrayFilter) -> AppResult<Vec<Tray>> {
        self.store.list_trays(farm_id, filter).await
    }

    pub async fn get(&self, farm_id: Uuid, tray_id: &str) -> AppResult<Tray> {
        self.store
            .get_tray(farm_id, tray_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tray {}", tray_id)))
    }

    pub async fn history(&self, farm_id: Uuid, tray_id: &str) -> AppResult<Vec<LocationHistoryEntry>> {
        Ok(self.get(farm_id, tray_id).await?.location_history)
    }

    /// Lock a tray, its current system and `systems`, then re-read the tray.
    ///
    /// Fails with a conflict if the tray moved between the first read and
    /// acquiring the locks.
    async fn lock_tray(
        &self,
        farm_id: Uuid,
        tray_id: &str,
        systems: impl IntoIterator<Item = Uuid>,
    ) -> AppResult<(TransitionGuard, Tray)> {
        let seen = self.get(farm_id, tray_id).await?;
        let mut keys = vec![
            TransitionLocks::tray_key(farm_id, tray_id),
            TransitionLocks::system_key(seen.current_location.system_id),
        ];
        keys.extend(systems.into_iter().map(TransitionLocks::system_key));
        let guard = self.locks.acquire(keys).await;

        let tray = self.get(farm_id, tray_id).await?;
        if tray.current_location.system_id != seen.current_location.system_id {
            return Err(AppError::conflict(
                "tray",
                format!("Tray {} was moved by another operation, retry", tray_id),
            ));
        }
        Ok((guard, tray))
    }

    async fn snapshot(&self, farm_id: Uuid) -> AppResult<Vec<GrowingSystem>> {
        self.store.list_systems(farm_id, &SystemFilter::default()).await
    }

    async fn commit(&self, farm_id: Uuid, kind: FarmEventKind, transition: Commit) -> AppResult<Commit> {
        let committed = self.store.commit(farm_id, transition).await?;
        self.events
            .publish(FarmEvent::for_commit(farm_id, kind, &committed));
        Ok(committed)
    }

    fn first_updated(committed: Commit) -> AppResult<Tray> {
        committed
            .updated_trays
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Transition produced no tray".to_string()))
    }

    pub async fn create(&self, operator: &Operator, input: CreateTrayInput) -> AppResult<Tray> {
        input.validate()?;
        let farm_id = operator.farm_id;
        let planted_date = input
            .planted_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let crop_type = input.crop_type.trim().to_string();
        let prefix = tray_id_prefix(&input.location_code, planted_date, input.category, &crop_type);

        let _guard = self
            .locks
            .acquire([
                TransitionLocks::prefix_key(farm_id, &prefix),
                TransitionLocks::system_key(input.placement.system_id),
            ])
            .await;

        let systems = self.snapshot(farm_id).await?;
        let existing = self.store.tray_ids_with_prefix(farm_id, &prefix).await?;
        let instance = next_instance(&prefix, existing.iter().map(String::as_str));

        let transition = lifecycle::create_tray(
            farm_id,
            NewTray {
                location_code: input.location_code,
                crop_type,
                category: input.category,
                plant_count: input.plant_count,
                planted_date,
                varieties: input.varieties,
                notes: input.notes,
                placement: input.placement,
            },
            instance,
            &operator.display_name,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let committed = self.commit(farm_id, FarmEventKind::TrayCreated, transition).await?;
        let tray = committed
            .created_trays
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Seeding produced no tray".to_string()))?;

        info!(
            tray_id = %tray.id,
            system_id = %tray.current_location.system_id,
            farm_id = %farm_id,
            plant_count = tray.plant_count,
            "Tray seeded"
        );
        Ok(tray)
    }

    pub async fn move_tray(&self, operator: &Operator, tray_id: &str, input: MoveTrayInput) -> AppResult<Tray> {
        input.validate()?;
        let farm_id = operator.farm_id;
        let (_guard, tray) = self
            .lock_tray(farm_id, tray_id, [input.destination.system_id])
            .await?;
        let systems = self.snapshot(farm_id).await?;

        let from = tray.current_location.system_id;
        let transition = lifecycle::move_tray(
            &tray,
            input.destination,
            &operator.display_name,
            input.reason,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let moved = Self::first_updated(self.commit(farm_id, FarmEventKind::TrayMoved, transition).await?)?;
        info!(
            tray_id = %moved.id,
            from_system_id = %from,
            system_id = %moved.current_location.system_id,
            farm_id = %farm_id,
            status = moved.status.as_str(),
            "Tray moved"
        );
        Ok(moved)
    }

    pub async fn split(&self, operator: &Operator, tray_id: &str, input: SplitTrayInput) -> AppResult<SplitResult> {
        let farm_id = operator.farm_id;
        let targets: Vec<Uuid> = input.destinations.iter().map(|d| d.system_id).collect();
        let (_guard, parent) = self.lock_tray(farm_id, tray_id, targets).await?;
        let systems = self.snapshot(farm_id).await?;

        let transition = lifecycle::split_tray(
            &parent,
            input.destinations,
            &operator.display_name,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let committed = self.commit(farm_id, FarmEventKind::TraySplit, transition).await?;
        let children = committed.created_trays.clone();
        let parent = Self::first_updated(committed)?;
        let movement = TrayMovement::split_record(&parent, &children, parent.updated_at);

        info!(
            tray_id = %parent.id,
            farm_id = %farm_id,
            children = children.len(),
            "Tray split"
        );
        Ok(SplitResult {
            parent,
            children,
            movement,
        })
    }

    pub async fn mark_ready(&self, operator: &Operator, tray_id: &str) -> AppResult<Tray> {
        let farm_id = operator.farm_id;
        let (_guard, tray) = self.lock_tray(farm_id, tray_id, None).await?;
        let ready = lifecycle::mark_ready(&tray, &operator.display_name, Utc::now())?;

        let transition = Commit {
            updated_trays: vec![ready],
            ..Commit::default()
        };
        let ready = Self::first_updated(self.commit(farm_id, FarmEventKind::TrayReady, transition).await?)?;
        info!(tray_id = %ready.id, farm_id = %farm_id, "Tray ready for harvest");
        Ok(ready)
    }

    pub async fn harvest(&self, operator: &Operator, tray_id: &str, input: HarvestInput) -> AppResult<Tray> {
        input.validate()?;
        let farm_id = operator.farm_id;
        let (_guard, tray) = self.lock_tray(farm_id, tray_id, None).await?;
        let systems = self.snapshot(farm_id).await?;

        let transition = lifecycle::harvest_tray(
            &tray,
            &operator.display_name,
            input.note,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let harvested = Self::first_updated(
            self.commit(farm_id, FarmEventKind::TrayHarvested, transition).await?,
        )?;
        info!(tray_id = %harvested.id, farm_id = %farm_id, "Tray harvested");
        Ok(harvested)
    }

    pub async fn discard(&self, operator: &Operator, tray_id: &str, input: DiscardInput) -> AppResult<Tray> {
        input.validate()?;
        let farm_id = operator.farm_id;
        let (_guard, tray) = self.lock_tray(farm_id, tray_id, None).await?;
        let systems = self.snapshot(farm_id).await?;

        let transition = lifecycle::discard_tray(
            &tray,
            &operator.display_name,
            &input.reason,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let discarded = Self::first_updated(
            self.commit(farm_id, FarmEventKind::TrayDiscarded, transition).await?,
        )?;
        info!(
            tray_id = %discarded.id,
            farm_id = %farm_id,
            reason = %input.reason,
            "Tray discarded"
        );
        Ok(discarded)
    }

    pub async fn update(&self, operator: &Operator, tray_id: &str, input: UpdateTrayInput) -> AppResult<Tray> {
        input.validate()?;
        let farm_id = operator.farm_id;
        let (_guard, tray) = self.lock_tray(farm_id, tray_id, None).await?;
        let updated = lifecycle::update_details(&tray, input.notes, input.varieties, Utc::now())?;

        let transition = Commit {
            updated_trays: vec![updated],
            ..Commit::default()
        };
        Self::first_updated(self.commit(farm_id, FarmEventKind::TrayUpdated, transition).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::system::{CreateSystemInput, SystemService};
    use crate::store::MemoryStore;
    use shared::{SystemType, TrayStatus};

    struct Fixture {
        trays: TrayService,
        systems: SystemService,
        operator: Operator,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn FarmStore> = Arc::new(MemoryStore::new());
        let locks = TransitionLocks::new();
        let events = EventBus::new(64);
        Fixture {
            trays: TrayService::new(store.clone(), locks.clone(), events.clone()),
            systems: SystemService::new(store, locks, events),
            operator: Operator {
                user_id: "user-ana".to_string(),
                farm_id: Uuid::new_v4(),
                display_name: "Ana".to_string(),
                permissions: vec![],
            },
        }
    }

    async fn provision(f: &Fixture, system_type: SystemType, capacity: u32) -> GrowingSystem {
        f.systems
            .create(
                f.operator.farm_id,
                CreateSystemInput {
                    name: format!("{} A", system_type),
                    system_type,
                    crop_category: CropCategory::Microgreens,
                    location: "Room 1".to_string(),
                    capacity,
                    sections: vec![],
                    same_per_channel: None,
                },
            )
            .await
            .unwrap()
    }

    fn seed_input(system: &GrowingSystem, spot: &str) -> CreateTrayInput {
        CreateTrayInput {
            location_code: "K".to_string(),
            crop_type: "Arugula".to_string(),
            category: CropCategory::Microgreens,
            plant_count: 10,
            planted_date: Some(NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()),
            varieties: vec![],
            notes: None,
            placement: Placement {
                system_id: system.id,
                system_type: system.system_type,
                spot_ids: vec![spot.to_string()],
            },
        }
    }

    fn move_to(system: &GrowingSystem, spot: &str) -> MoveTrayInput {
        MoveTrayInput {
            destination: Placement {
                system_id: system.id,
                system_type: system.system_type,
                spot_ids: vec![spot.to_string()],
            },
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_instances_increase_per_day_and_crop() {
        let f = fixture();
        let nursery = provision(&f, SystemType::Nursery, 4).await;

        let first = f.trays.create(&f.operator, seed_input(&nursery, "1")).await.unwrap();
        let second = f.trays.create(&f.operator, seed_input(&nursery, "2")).await.unwrap();
        assert_eq!(first.id, "K071725-MG-ARUG-1");
        assert_eq!(second.id, "K071725-MG-ARUG-2");
        assert_eq!(first.created_by, "Ana");
    }

    #[tokio::test]
    async fn test_blocked_move_leaves_everything_unchanged() {
        let f = fixture();
        let nursery = provision(&f, SystemType::Nursery, 2).await;
        let rack = provision(&f, SystemType::MicrogreenRack, 1).await;

        let first = f.trays.create(&f.operator, seed_input(&nursery, "1")).await.unwrap();
        let second = f.trays.create(&f.operator, seed_input(&nursery, "2")).await.unwrap();
        f.trays.move_tray(&f.operator, &first.id, move_to(&rack, "1")).await.unwrap();

        let err = f
            .trays
            .move_tray(&f.operator, &second.id, move_to(&rack, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Capacity { system_id, .. } if system_id == rack.id));

        let after = f.trays.get(f.operator.farm_id, &second.id).await.unwrap();
        assert_eq!(after, second);
        let nursery_after = f.systems.get(f.operator.farm_id, nursery.id).await.unwrap();
        assert_eq!(nursery_after.spot("2").and_then(|s| s.tray_id()), Some(second.id.as_str()));
    }

    #[tokio::test]
    async fn test_split_failure_creates_nothing() {
        let f = fixture();
        let nursery = provision(&f, SystemType::Nursery, 1).await;
        let rack = provision(&f, SystemType::MicrogreenRack, 2).await;
        let parent = f.trays.create(&f.operator, seed_input(&nursery, "1")).await.unwrap();

        let destinations = vec![
            SplitDestination {
                system_id: rack.id,
                system_type: SystemType::MicrogreenRack,
                spot_ids: vec!["1".to_string()],
                plant_count: 5,
            },
            SplitDestination {
                system_id: rack.id,
                system_type: SystemType::MicrogreenRack,
                spot_ids: vec!["3".to_string()],
                plant_count: 5,
            },
        ];
        let err = f
            .trays
            .split(&f.operator, &parent.id, SplitTrayInput { destinations })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Capacity { .. }));

        let stored = f.trays.get(f.operator.farm_id, &parent.id).await.unwrap();
        assert_eq!(stored.status, TrayStatus::Seeded);
        let all = f
            .trays
            .list(f.operator.farm_id, &TrayFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        let rack_after = f.systems.get(f.operator.farm_id, rack.id).await.unwrap();
        assert_eq!(rack_after.occupancy, 0);
    }

    #[tokio::test]
    async fn test_split_then_harvest_children() {
        let f = fixture();
        let nursery = provision(&f, SystemType::Nursery, 1).await;
        let rack = provision(&f, SystemType::MicrogreenRack, 2).await;
        let parent = f.trays.create(&f.operator, seed_input(&nursery, "1")).await.unwrap();

        let destinations = (1..=2)
            .map(|n| SplitDestination {
                system_id: rack.id,
                system_type: SystemType::MicrogreenRack,
                spot_ids: vec![n.to_string()],
                plant_count: 5,
            })
            .collect();
        let result = f
            .trays
            .split(&f.operator, &parent.id, SplitTrayInput { destinations })
            .await
            .unwrap();
        assert_eq!(result.parent.status, TrayStatus::Split);
        assert_eq!(result.children.len(), 2);
        let movement = result.movement.clone().unwrap();
        assert_eq!(movement.kind, shared::MovementKind::Split);
        assert_eq!(movement.split.len(), 2);
        assert_eq!(movement.from_system_id, nursery.id);
        assert!(result.children.iter().all(|c| c.status == TrayStatus::Growing));

        let nursery_after = f.systems.get(f.operator.farm_id, nursery.id).await.unwrap();
        assert_eq!(nursery_after.occupancy, 0);

        let child = &result.children[0];
        let ready = f.trays.mark_ready(&f.operator, &child.id).await.unwrap();
        assert_eq!(ready.status, TrayStatus::Ready);
        let harvested = f
            .trays
            .harvest(&f.operator, &child.id, HarvestInput { note: None })
            .await
            .unwrap();
        assert_eq!(harvested.status, TrayStatus::Harvested);

        let rack_after = f.systems.get(f.operator.farm_id, rack.id).await.unwrap();
        assert_eq!(rack_after.occupancy, 1);

        let err = f
            .trays
            .discard(
                &f.operator,
                &parent.id,
                DiscardInput {
                    reason: "cleanup".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_concurrent_moves_into_last_spot() {
        let f = fixture();
        let nursery = provision(&f, SystemType::Nursery, 2).await;
        let rack = provision(&f, SystemType::MicrogreenRack, 1).await;
        let first = f.trays.create(&f.operator, seed_input(&nursery, "1")).await.unwrap();
        let second = f.trays.create(&f.operator, seed_input(&nursery, "2")).await.unwrap();

        let a = {
            let trays = f.trays.clone();
            let operator = f.operator.clone();
            let input = move_to(&rack, "1");
            tokio::spawn(async move { trays.move_tray(&operator, &first.id, input).await })
        };
        let b = {
            let trays = f.trays.clone();
            let operator = f.operator.clone();
            let input = move_to(&rack, "1");
            tokio::spawn(async move { trays.move_tray(&operator, &second.id, input).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let rack_after = f.systems.get(f.operator.farm_id, rack.id).await.unwrap();
        assert_eq!(rack_after.occupancy, 1);
        let nursery_after = f.systems.get(f.operator.farm_id, nursery.id).await.unwrap();
        assert_eq!(nursery_after.occupancy, 1);
    }
}
