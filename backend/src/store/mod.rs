//! Storage port for growing systems and trays
//!
//! Services talk to storage only through [`FarmStore`]. A lifecycle
//! transition is persisted with one [`FarmStore::commit`] call, which applies
//! every changed record or none of them.

use async_trait::async_trait;
use shared::{GrowingSystem, SystemType, Tray, TrayStatus};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Records produced by one lifecycle operation.
///
/// Each record carries the version it was read at; the store rejects the
/// whole commit if any stored version has moved on, and bumps versions on
/// success.
pub type Commit = shared::lifecycle::Transition;

/// Tray list filter
#[derive(Debug, Clone, Default)]
pub struct TrayFilter {
    pub status: Option<TrayStatus>,
    pub system_id: Option<Uuid>,
}

impl TrayFilter {
    pub fn matches(&self, tray: &Tray) -> bool {
        self.status.map_or(true, |s| tray.status == s)
            && self
                .system_id
                .map_or(true, |id| tray.current_location.system_id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemFilter {
    pub system_type: Option<SystemType>,
}

#[async_trait]
pub trait FarmStore: Send + Sync {
    /// Adapter name reported by the health endpoint
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> AppResult<()>;

    /// Farms with at least one growing system
    async fn list_farms(&self) -> AppResult<Vec<Uuid>>;

    async fn list_systems(&self, farm_id: Uuid, filter: &SystemFilter) -> AppResult<Vec<GrowingSystem>>;

    async fn get_system(&self, farm_id: Uuid, system_id: Uuid) -> AppResult<Option<GrowingSystem>>;

    async fn insert_system(&self, system: &GrowingSystem) -> AppResult<()>;

    /// Replace a system's descriptive fields; fails on a stale version
    async fn update_system(&self, system: &GrowingSystem) -> AppResult<GrowingSystem>;

    /// Delete an empty system; fails on a stale version
    async fn delete_system(&self, system: &GrowingSystem) -> AppResult<()>;

    async fn list_trays(&self, farm_id: Uuid, filter: &TrayFilter) -> AppResult<Vec<Tray>>;

    async fn get_tray(&self, farm_id: Uuid, tray_id: &str) -> AppResult<Option<Tray>>;

    /// Ids of every tray (any status) starting with `prefix`
    async fn tray_ids_with_prefix(&self, farm_id: Uuid, prefix: &str) -> AppResult<Vec<String>>;

    /// Apply a transition atomically and return the stored records
    async fn commit(&self, farm_id: Uuid, commit: Commit) -> AppResult<Commit>;
}

pub(crate) fn stale(resource: &str, id: impl std::fmt::Display) -> AppError {
    AppError::conflict(
        resource,
        format!("{} {} was changed by another operation, retry", resource, id),
    )
}

/// Every record in a commit must belong to the farm it is committed under
pub(crate) fn check_commit_scope(farm_id: Uuid, commit: &Commit) -> AppResult<()> {
    let foreign_system = commit.systems.iter().any(|s| s.farm_id != farm_id);
    let foreign_tray = commit
        .updated_trays
        .iter()
        .chain(&commit.created_trays)
        .any(|t| t.farm_id != farm_id);
    if foreign_system || foreign_tray {
        return Err(AppError::Internal(
            "Commit contains records from another farm".to_string(),
        ));
    }
    Ok(())
}

/// Bump versions for everything in a successful commit
pub(crate) fn bump_versions(mut commit: Commit) -> Commit {
    for system in &mut commit.systems {
        system.version += 1;
    }
    for tray in &mut commit.updated_trays {
        tray.version += 1;
    }
    commit
}
