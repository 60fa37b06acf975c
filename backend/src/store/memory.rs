//! In-memory farm store
//!
//! Not durable. Used for development and tests, and as the reference for
//! commit semantics: every version is checked before anything is written.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::{GrowingSystem, Tray};

use super::{bump_versions, check_commit_scope, stale, Commit, FarmStore, SystemFilter, TrayFilter};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct FarmData {
    systems: BTreeMap<Uuid, GrowingSystem>,
    trays: BTreeMap<String, Tray>,
}

#[derive(Default)]
pub struct MemoryStore {
    farms: RwLock<HashMap<Uuid, FarmData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FarmStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn list_farms(&self) -> AppResult<Vec<Uuid>> {
        let farms = self.farms.read().await;
        Ok(farms
            .iter()
            .filter(|(_, data)| !data.systems.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn list_systems(&self, farm_id: Uuid, filter: &SystemFilter) -> AppResult<Vec<GrowingSystem>> {
        let farms = self.farms.read().await;
        let Some(data) = farms.get(&farm_id) else {
            return Ok(Vec::new());
        };
        let mut systems: Vec<GrowingSystem> = data
            .systems
            .values()
            .filter(|s| filter.system_type.map_or(true, |t| s.system_type == t))
            .cloned()
            .collect();
        systems.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(systems)
    }

    async fn get_system(&self, farm_id: Uuid, system_id: Uuid) -> AppResult<Option<GrowingSystem>> {
        let farms = self.farms.read().await;
        Ok(farms
            .get(&farm_id)
            .and_then(|data| data.systems.get(&system_id))
            .cloned())
    }

    async fn insert_system(&self, system: &GrowingSystem) -> AppResult<()> {
        let mut farms = self.farms.write().await;
        let data = farms.entry(system.farm_id).or_default();
        if data.systems.contains_key(&system.id) {
            return Err(AppError::conflict(
                "system",
                format!("Growing system {} already exists", system.id),
            ));
        }
        data.systems.insert(system.id, system.clone());
        Ok(())
    }

    async fn update_system(&self, system: &GrowingSystem) -> AppResult<GrowingSystem> {
        let mut farms = self.farms.write().await;
        let stored = farms
            .get_mut(&system.farm_id)
            .and_then(|data| data.systems.get_mut(&system.id))
            .ok_or_else(|| AppError::NotFound(format!("Growing system {}", system.id)))?;
        if stored.version != system.version {
            return Err(stale("system", system.id));
        }
        let mut next = system.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete_system(&self, system: &GrowingSystem) -> AppResult<()> {
        let mut farms = self.farms.write().await;
        let data = farms
            .get_mut(&system.farm_id)
            .ok_or_else(|| AppError::NotFound(format!("Growing system {}", system.id)))?;
        match data.systems.get(&system.id) {
            None => Err(AppError::NotFound(format!("Growing system {}", system.id))),
            Some(stored) if stored.version != system.version => Err(stale("system", system.id)),
            Some(_) => {
                data.systems.remove(&system.id);
                Ok(())
            }
        }
    }

    async fn list_trays(&self, farm_id: Uuid, filter: &TrayFilter) -> AppResult<Vec<Tray>> {
        let farms = self.farms.read().await;
        Ok(farms
            .get(&farm_id)
            .map(|data| {
                data.trays
                    .values()
                    .filter(|t| filter.matches(t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_tray(&self, farm_id: Uuid, tray_id: &str) -> AppResult<Option<Tray>> {
        let farms = self.farms.read().await;
        Ok(farms
            .get(&farm_id)
            .and_then(|data| data.trays.get(tray_id))
            .cloned())
    }

    async fn tray_ids_with_prefix(&self, farm_id: Uuid, prefix: &str) -> AppResult<Vec<String>> {
        let farms = self.farms.read().await;
        Ok(farms
            .get(&farm_id)
            .map(|data| {
                data.trays
                    .range(prefix.to_string()..)
                    .take_while(|(id, _)| id.starts_with(prefix))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit(&self, farm_id: Uuid, commit: Commit) -> AppResult<Commit> {
        check_commit_scope(farm_id, &commit)?;

        let mut farms = self.farms.write().await;
        let data = farms.entry(farm_id).or_default();

        for system in &commit.systems {
            match data.systems.get(&system.id) {
                None => return Err(AppError::NotFound(format!("Growing system {}", system.id))),
                Some(stored) if stored.version != system.version => {
                    return Err(stale("system", system.id))
                }
                Some(_) => {}
            }
        }
        for tray in &commit.updated_trays {
            match data.trays.get(&tray.id) {
                None => return Err(AppError::NotFound(format!("Tray {}", tray.id))),
                Some(stored) if stored.version != tray.version => return Err(stale("tray", &tray.id)),
                Some(_) => {}
            }
        }
        if let Some(existing) = commit
            .created_trays
            .iter()
            .find(|t| data.trays.contains_key(&t.id))
        {
            return Err(AppError::conflict(
                "tray",
                format!("Tray {} already exists", existing.id),
            ));
        }

        let committed = bump_versions(commit);
        for system in &committed.systems {
            data.systems.insert(system.id, system.clone());
        }
        for tray in committed.updated_trays.iter().chain(&committed.created_trays) {
            data.trays.insert(tray.id.clone(), tray.clone());
        }
        Ok(committed)
    }
}
