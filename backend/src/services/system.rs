//! Growing system service: provisioning and candidate lookup

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use shared::{find_candidates, Candidate, CropCategory, GrowingSystem, NewGrowingSystem, Section, SystemType};

use crate::error::{AppError, AppResult};
use crate::services::events::{EventBus, FarmEvent, FarmEventKind};
use crate::services::locks::TransitionLocks;
use crate::store::{FarmStore, SystemFilter};

/// Input for provisioning a system
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSystemInput {
    #[validate(length(min = 1, max = 100, message = "System name must be 1-100 characters"))]
    pub name: String,
    pub system_type: SystemType,
    pub crop_category: CropCategory,
    #[validate(length(min = 1, max = 64, message = "Location must be 1-64 characters"))]
    pub location: String,
    #[validate(range(min = 1, max = 100000, message = "Capacity must be between 1 and 100000"))]
    pub capacity: u32,
    #[serde(default)]
    pub sections: Vec<Section>,
    pub same_per_channel: Option<bool>,
}

/// Descriptive fields only; capacity and spots are fixed at provisioning
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSystemInput {
    #[validate(length(min = 1, max = 100, message = "System name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64, message = "Location must be 1-64 characters"))]
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateQuery {
    pub system_type: SystemType,
    pub quantity_needed: i64,
    pub crop_type: Option<String>,
}

#[derive(Clone)]
pub struct SystemService {
    store: Arc<dyn FarmStore>,
    locks: TransitionLocks,
    events: EventBus,
}

impl SystemService {
    pub fn new(store: Arc<dyn FarmStore>, locks: TransitionLocks, events: EventBus) -> Self {
        Self {
            store,
            locks,
            events,
        }
    }

    pub async fn list(&self, farm_id: Uuid, filter: &SystemFilter) -> AppResult<Vec<GrowingSystem>> {
        self.store.list_systems(farm_id, filter).await
    }

    pub async fn get(&self, farm_id: Uuid, system_id: Uuid) -> AppResult<GrowingSystem> {
        self.store
            .get_system(farm_id, system_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Growing system {}", system_id)))
    }

    pub async fn create(&self, farm_id: Uuid, input: CreateSystemInput) -> AppResult<GrowingSystem> {
        input.validate()?;

        let system = GrowingSystem::provision(
            farm_id,
            NewGrowingSystem {
                name: input.name,
                system_type: input.system_type,
                crop_category: input.crop_category,
                location: input.location,
                capacity: input.capacity,
                sections: input.sections,
                same_per_channel: input.same_per_channel,
            },
            Utc::now(),
        )?;
        self.store.insert_system(&system).await?;

        info!(
            system_id = %system.id,
            farm_id = %farm_id,
            system_type = system.system_type.as_str(),
            capacity = system.capacity,
            "Growing system provisioned"
        );
        self.events.publish(
            FarmEvent::new(farm_id, FarmEventKind::SystemCreated).with_system(system.id),
        );
        Ok(system)
    }

    pub async fn update(
        &self,
        farm_id: Uuid,
        system_id: Uuid,
        input: UpdateSystemInput,
    ) -> AppResult<GrowingSystem> {
        input.validate()?;
        let _guard = self
            .locks
            .acquire([TransitionLocks::system_key(system_id)])
            .await;

        let mut system = self.get(farm_id, system_id).await?;
        if let Some(name) = input.name {
            system.name = name.trim().to_string();
        }
        if let Some(location) = input.location {
            system.location = location;
        }
        system.updated_at = Utc::now();

        let updated = self.store.update_system(&system).await?;
        self.events.publish(
            FarmEvent::new(farm_id, FarmEventKind::SystemUpdated).with_system(system_id),
        );
        Ok(updated)
    }

    /// Delete a system. Systems holding trays are never removed.
    pub async fn delete(&self, farm_id: Uuid, system_id: Uuid) -> AppResult<()> {
        let _guard = self
            .locks
            .acquire([TransitionLocks::system_key(system_id)])
            .await;

        let system = self.get(farm_id, system_id).await?;
        if system.occupancy > 0 {
            return Err(AppError::conflict(
                "system",
                format!(
                    "Growing system {} still holds {} occupied spots",
                    system.name, system.occupancy
                ),
            ));
        }
        self.store.delete_system(&system).await?;

        info!(system_id = %system_id, farm_id = %farm_id, "Growing system deleted");
        self.events.publish(
            FarmEvent::new(farm_id, FarmEventKind::SystemDeleted).with_system(system_id),
        );
        Ok(())
    }

    pub async fn candidates(&self, farm_id: Uuid, query: CandidateQuery) -> AppResult<Vec<Candidate>> {
        let filter = SystemFilter {
            system_type: Some(query.system_type),
        };
        let systems = self.store.list_systems(farm_id, &filter).await?;
        let crop = query.crop_type.as_deref().map(str::trim).filter(|c| !c.is_empty());
        Ok(find_candidates(
            &systems,
            query.system_type,
            query.quantity_needed,
            crop,
        )?)
    }
}
