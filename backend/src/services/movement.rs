//! Movement service and scheduler job
//!
//! A single background task evaluates every farm on a fixed interval and
//! keeps the latest proposals on a board. Reads serve the board; they never
//! trigger evaluation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::lifecycle;
use shared::scheduler::{evaluate, resolve_target};
use shared::{MovementStatus, Tray, TrayMovement};

use crate::error::{AppError, AppResult};
use crate::middleware::Operator;
use crate::services::events::{EventBus, FarmEvent, FarmEventKind};
use crate::services::locks::TransitionLocks;
use crate::store::{FarmStore, SystemFilter, TrayFilter};

/// Proposals from the last evaluation of one farm
#[derive(Debug, Clone, Default, Serialize)]
pub struct MovementSnapshot {
    pub evaluated_at: Option<DateTime<Utc>>,
    pub movements: Vec<TrayMovement>,
}

pub type MovementBoard = Arc<RwLock<HashMap<Uuid, MovementSnapshot>>>;

#[derive(Clone)]
pub struct MovementService {
    store: Arc<dyn FarmStore>,
    locks: TransitionLocks,
    events: EventBus,
    board: MovementBoard,
}

/// Proposals differ in something an operator would notice
fn proposals_changed(old: &[TrayMovement], new: &[TrayMovement]) -> bool {
    old.len() != new.len()
        || old.iter().zip(new).any(|(a, b)| {
            a.tray_id != b.tray_id || a.to_system_id != b.to_system_id || a.to_spot_ids != b.to_spot_ids
        })
}

impl MovementService {
    pub fn new(
        store: Arc<dyn FarmStore>,
        locks: TransitionLocks,
        events: EventBus,
        board: MovementBoard,
    ) -> Self {
        Self {
            store,
            locks,
            events,
            board,
        }
    }

    pub async fn current(&self, farm_id: Uuid) -> MovementSnapshot {
        self.board
            .read()
            .await
            .get(&farm_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluate one farm and replace its board entry
    pub async fn evaluate_farm(&self, farm_id: Uuid) -> AppResult<MovementSnapshot> {
        let systems = self.store.list_systems(farm_id, &SystemFilter::default()).await?;
        let trays = self.store.list_trays(farm_id, &TrayFilter::default()).await?;
        let now = Utc::now();
        let movements = evaluate(&trays, &systems, now);

        let snapshot = MovementSnapshot {
            evaluated_at: Some(now),
            movements,
        };
        let changed = {
            let mut board = self.board.write().await;
            let changed = board
                .get(&farm_id)
                .map_or(true, |old| proposals_changed(&old.movements, &snapshot.movements));
            board.insert(farm_id, snapshot.clone());
            changed
        };

        if changed {
            let mut event = FarmEvent::new(farm_id, FarmEventKind::MovementsEvaluated);
            for movement in &snapshot.movements {
                event = event.with_tray(&movement.tray_id);
            }
            self.events.publish(event);
        }
        debug!(
            farm_id = %farm_id,
            proposals = snapshot.movements.len(),
            "Movements evaluated"
        );
        Ok(snapshot)
    }

    /// Evaluate every farm. A failing farm is logged and skipped.
    pub async fn evaluate_all(&self) -> AppResult<usize> {
        let farms = self.store.list_farms().await?;
        let mut evaluated = 0;
        for farm_id in farms {
            match self.evaluate_farm(farm_id).await {
                Ok(_) => evaluated += 1,
                Err(e) => warn!(farm_id = %farm_id, "Movement evaluation failed: {}", e),
            }
        }
        Ok(evaluated)
    }

    /// Carry out the pending proposal for a tray.
    ///
    /// The proposed spots are re-checked under lock; if they were taken the
    /// allocator picks new ones of the same system type. A failed attempt
    /// stays on the board marked `failed` with the error as its reason.
    pub async fn execute(&self, operator: &Operator, tray_id: &str) -> AppResult<Tray> {
        let farm_id = operator.farm_id;
        let proposal = self
            .current(farm_id)
            .await
            .movements
            .into_iter()
            .find(|m| m.tray_id == tray_id)
            .ok_or_else(|| AppError::NotFound(format!("Pending movement for tray {}", tray_id)))?;

        let result = self.carry_out(operator, &proposal).await;

        let mut board = self.board.write().await;
        let Some(snapshot) = board.get_mut(&farm_id) else {
            return result;
        };
        match &result {
            Ok(_) => snapshot.movements.retain(|m| m.tray_id != tray_id),
            Err(e) => {
                if let Some(entry) = snapshot.movements.iter_mut().find(|m| m.tray_id == tray_id) {
                    entry.status = MovementStatus::Failed;
                    entry.reason = Some(e.to_string());
                }
            }
        }
        result
    }

    async fn carry_out(&self, operator: &Operator, proposal: &TrayMovement) -> AppResult<Tray> {
        let farm_id = operator.farm_id;
        let targets = self
            .store
            .list_systems(
                farm_id,
                &SystemFilter {
                    system_type: Some(proposal.to_system_type),
                },
            )
            .await?;
        let mut keys = vec![
            TransitionLocks::tray_key(farm_id, &proposal.tray_id),
            TransitionLocks::system_key(proposal.from_system_id),
        ];
        keys.extend(targets.iter().map(|s| TransitionLocks::system_key(s.id)));
        let _guard = self.locks.acquire(keys).await;

        let tray = self
            .store
            .get_tray(farm_id, &proposal.tray_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tray {}", proposal.tray_id)))?;
        let systems = self.store.list_systems(farm_id, &SystemFilter::default()).await?;

        let placement =
            resolve_target(proposal, &tray, &systems).map_err(|e| AppError::from_domain(e, &systems))?;
        let reason = systems
            .iter()
            .find(|s| s.id == placement.system_id)
            .map(|s| format!("Scheduled move to {}", s.name));
        let to_system = placement.system_id;

        let transition = lifecycle::move_tray(
            &tray,
            placement,
            &operator.display_name,
            reason,
            &systems,
            Utc::now(),
        )
        .map_err(|e| AppError::from_domain(e, &systems))?;

        let committed = self.store.commit(farm_id, transition).await?;
        self.events.publish(FarmEvent::for_commit(
            farm_id,
            FarmEventKind::TrayMoved,
            &committed,
        ));

        let moved = committed
            .updated_trays
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Transition produced no tray".to_string()))?;
        info!(
            tray_id = %moved.id,
            from_system_id = %proposal.from_system_id,
            system_id = %to_system,
            farm_id = %farm_id,
            "Scheduled movement executed"
        );
        Ok(moved)
    }
}

/// Start the periodic evaluation job
pub fn spawn_scheduler(service: MovementService, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Movement scheduler running every {}s", interval_secs.max(1));

        loop {
            interval.tick().await;
            match service.evaluate_all().await {
                Ok(farms) => debug!(farms, "Movement scheduler cycle complete"),
                Err(e) => warn!("Movement scheduler cycle failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::system::{CreateSystemInput, SystemService};
    use crate::services::tray::{CreateTrayInput, TrayService};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use shared::lifecycle::Placement;
    use shared::{CropCategory, GrowingSystem, SystemType, TrayStatus};

    struct Fixture {
        movements: MovementService,
        trays: TrayService,
        systems: SystemService,
        operator: Operator,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn FarmStore> = Arc::new(MemoryStore::new());
        let locks = TransitionLocks::new();
        let events = EventBus::new(64);
        Fixture {
            movements: MovementService::new(
                store.clone(),
                locks.clone(),
                events.clone(),
                MovementBoard::default(),
            ),
            trays: TrayService::new(store.clone(), locks.clone(), events.clone()),
            systems: SystemService::new(store, locks, events),
            operator: Operator {
                user_id: "user-ben".to_string(),
                farm_id: Uuid::new_v4(),
                display_name: "Ben".to_string(),
                permissions: vec![],
            },
        }
    }

    async fn provision(f: &Fixture, name: &str, system_type: SystemType, capacity: u32) -> GrowingSystem {
        f.systems
            .create(
                f.operator.farm_id,
                CreateSystemInput {
                    name: name.to_string(),
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

    async fn seed(f: &Fixture, nursery: &GrowingSystem, spot: &str) -> Tray {
        f.trays
            .create(
                &f.operator,
                CreateTrayInput {
                    location_code: "K".to_string(),
                    crop_type: "Radish".to_string(),
                    category: CropCategory::Microgreens,
                    plant_count: 20,
                    planted_date: Some(NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()),
                    varieties: vec![],
                    notes: None,
                    placement: Placement {
                        system_id: nursery.id,
                        system_type: SystemType::Nursery,
                        spot_ids: vec![spot.to_string()],
                    },
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_reads_do_not_evaluate() {
        let f = fixture();
        let nursery = provision(&f, "Nursery", SystemType::Nursery, 2).await;
        provision(&f, "Blackout", SystemType::Blackout, 2).await;
        seed(&f, &nursery, "1").await;

        let before = f.movements.current(f.operator.farm_id).await;
        assert!(before.evaluated_at.is_none());
        assert!(before.movements.is_empty());

        let snapshot = f.movements.evaluate_farm(f.operator.farm_id).await.unwrap();
        assert_eq!(snapshot.movements.len(), 1);
        assert_eq!(f.movements.current(f.operator.farm_id).await.movements.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_moves_tray_and_clears_proposal() {
        let f = fixture();
        let nursery = provision(&f, "Nursery", SystemType::Nursery, 2).await;
        let blackout = provision(&f, "Blackout", SystemType::Blackout, 2).await;
        let tray = seed(&f, &nursery, "1").await;

        assert_eq!(f.movements.evaluate_all().await.unwrap(), 1);
        let moved = f.movements.execute(&f.operator, &tray.id).await.unwrap();
        assert_eq!(moved.current_location.system_id, blackout.id);
        assert_eq!(moved.status, TrayStatus::Germinating);
        assert_eq!(moved.location_history.len(), 2);
        assert_eq!(
            moved.location_history[1].reason.as_deref(),
            Some("Scheduled move to Blackout")
        );
        assert!(f.movements.current(f.operator.farm_id).await.movements.is_empty());

        let err = f.movements.execute(&f.operator, &tray.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_reallocates_when_proposed_spot_was_taken() {
        let f = fixture();
        let nursery = provision(&f, "Nursery", SystemType::Nursery, 2).await;
        let blackout = provision(&f, "Blackout", SystemType::Blackout, 2).await;
        let first = seed(&f, &nursery, "1").await;
        let second = seed(&f, &nursery, "2").await;
        f.movements.evaluate_farm(f.operator.farm_id).await.unwrap();

        let proposed = f.movements.current(f.operator.farm_id).await.movements;
        let for_first = proposed.iter().find(|m| m.tray_id == first.id).unwrap();

        // The second tray is moved by hand into the first tray's proposed spot
        f.trays
            .move_tray(
                &f.operator,
                &second.id,
                crate::services::tray::MoveTrayInput {
                    destination: Placement {
                        system_id: blackout.id,
                        system_type: SystemType::Blackout,
                        spot_ids: for_first.to_spot_ids.clone(),
                    },
                    reason: None,
                },
            )
            .await
            .unwrap();

        let moved = f.movements.execute(&f.operator, &first.id).await.unwrap();
        assert_eq!(moved.current_location.system_id, blackout.id);
        assert_ne!(moved.current_location.spot_ids, for_first.to_spot_ids);
    }

    #[tokio::test]
    async fn test_failed_execution_stays_on_board() {
        let f = fixture();
        let nursery = provision(&f, "Nursery", SystemType::Nursery, 1).await;
        let blackout = provision(&f, "Blackout", SystemType::Blackout, 1).await;
        let tray = seed(&f, &nursery, "1").await;
        f.movements.evaluate_farm(f.operator.farm_id).await.unwrap();

        // Another tray fills the only blackout spot before execution
        let nursery_two = provision(&f, "Nursery 2", SystemType::Nursery, 1).await;
        let other = seed(&f, &nursery_two, "1").await;
        f.trays
            .move_tray(
                &f.operator,
                &other.id,
                crate::services::tray::MoveTrayInput {
                    destination: Placement {
                        system_id: blackout.id,
                        system_type: SystemType::Blackout,
                        spot_ids: vec!["1".to_string()],
                    },
                    reason: None,
                },
            )
            .await
            .unwrap();

        let err = f.movements.execute(&f.operator, &tray.id).await.unwrap_err();
        assert!(matches!(err, AppError::Capacity { .. }));

        let board = f.movements.current(f.operator.farm_id).await;
        let entry = board.movements.iter().find(|m| m.tray_id == tray.id).unwrap();
        assert_eq!(entry.status, shared::MovementStatus::Failed);
        assert!(entry.reason.is_some());
    }

    #[test]
    fn test_proposals_changed_ignores_timestamps() {
        let movement = TrayMovement {
            tray_id: "K071725-MG-RADI-1".to_string(),
            from_system_id: Uuid::nil(),
            from_system_type: SystemType::Nursery,
            to_system_id: None,
            to_system_type: SystemType::Blackout,
            to_spot_ids: vec![],
            kind: shared::MovementKind::Automatic,
            status: shared::MovementStatus::Pending,
            reason: None,
            split: vec![],
            proposed_at: Utc::now(),
        };
        let mut later = movement.clone();
        later.proposed_at = movement.proposed_at + chrono::Duration::seconds(60);
        assert!(!proposals_changed(&[movement.clone()], &[later.clone()]));

        later.to_system_id = Some(Uuid::new_v4());
        assert!(proposals_changed(&[movement], &[later]));
    }
}
