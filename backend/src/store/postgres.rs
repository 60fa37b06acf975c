//! PostgreSQL farm store
//!
//! Systems keep their spots and sections as JSONB next to the cached
//! occupancy. Location history lives in its own append-only table keyed by
//! `(farm_id, tray_id, seq)`; rows are inserted, never updated. Tray ids are
//! unique per farm, so every tray query is scoped by `farm_id`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{types::Json, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use shared::{
    CropCategory, GrowingSystem, LocationHistoryEntry, Section, Spot, SystemType, Tray,
    TrayLocation, TrayStatus, VarietyAllocation,
};

use super::{bump_versions, check_commit_scope, stale, Commit, FarmStore, SystemFilter, TrayFilter};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct SystemRow {
    id: Uuid,
    farm_id: Uuid,
    name: String,
    system_type: String,
    crop_category: String,
    location: String,
    capacity: i32,
    occupancy: i32,
    same_per_channel: bool,
    sections: Json<Vec<Section>>,
    spots: Json<Vec<Spot>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SystemRow> for GrowingSystem {
    type Error = AppError;

    fn try_from(row: SystemRow) -> AppResult<Self> {
        Ok(GrowingSystem {
            id: row.id,
            farm_id: row.farm_id,
            name: row.name,
            system_type: parse_system_type(&row.system_type)?,
            crop_category: parse_category(&row.crop_category)?,
            location: row.location,
            capacity: to_u32(row.capacity, "capacity")?,
            sections: row.sections.0,
            same_per_channel: row.same_per_channel,
            occupancy: to_u32(row.occupancy, "occupancy")?,
            spots: row.spots.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrayRow {
    id: String,
    farm_id: Uuid,
    crop_type: String,
    category: String,
    planted_date: NaiveDate,
    expected_harvest: NaiveDate,
    harvest_estimated: bool,
    status: String,
    parent_tray_id: Option<String>,
    child_tray_ids: Vec<String>,
    plant_count: i32,
    varieties: Json<Vec<VarietyAllocation>>,
    notes: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    tray_id: String,
    system_id: Uuid,
    system_type: String,
    spot_ids: Vec<String>,
    moved_at: DateTime<Utc>,
    moved_by: String,
    reason: Option<String>,
}

impl TryFrom<HistoryRow> for LocationHistoryEntry {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> AppResult<Self> {
        Ok(LocationHistoryEntry {
            location: TrayLocation {
                system_id: row.system_id,
                system_type: parse_system_type(&row.system_type)?,
                spot_ids: row.spot_ids,
                moved_at: row.moved_at,
            },
            moved_by: row.moved_by,
            reason: row.reason,
        })
    }
}

fn assemble_tray(row: TrayRow, history: Vec<LocationHistoryEntry>) -> AppResult<Tray> {
    let current_location = history
        .last()
        .map(|entry| entry.location.clone())
        .ok_or_else(|| AppError::Internal(format!("Tray {} has no location history", row.id)))?;
    Ok(Tray {
        id: row.id,
        farm_id: row.farm_id,
        crop_type: row.crop_type,
        category: parse_category(&row.category)?,
        planted_date: row.planted_date,
        expected_harvest: row.expected_harvest,
        harvest_estimated: row.harvest_estimated,
        status: TrayStatus::from_str(&row.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown tray status {}", row.status)))?,
        current_location,
        location_history: history,
        parent_tray_id: row.parent_tray_id,
        child_tray_ids: row.child_tray_ids,
        plant_count: to_u32(row.plant_count, "plant_count")?,
        varieties: row.varieties.0,
        notes: row.notes,
        created_by: row.created_by,
        created_at: row.created_at,
        updated_at: row.updated_at,
        version: row.version,
    })
}

fn parse_system_type(value: &str) -> AppResult<SystemType> {
    SystemType::from_str(value)
        .ok_or_else(|| AppError::Internal(format!("Unknown system type {}", value)))
}

fn parse_category(value: &str) -> AppResult<CropCategory> {
    CropCategory::from_str(value)
        .ok_or_else(|| AppError::Internal(format!("Unknown crop category {}", value)))
}

fn to_u32(value: i32, column: &str) -> AppResult<u32> {
    u32::try_from(value).map_err(|_| AppError::Internal(format!("Negative {} {}", column, value)))
}

fn to_i32(value: u32, column: &str) -> AppResult<i32> {
    i32::try_from(value).map_err(|_| AppError::validation(column, format!("{} is too large", value)))
}

const SYSTEM_COLUMNS: &str = "id, farm_id, name, system_type, crop_category, location, capacity, \
     occupancy, same_per_channel, sections, spots, version, created_at, updated_at";

const TRAY_COLUMNS: &str = "id, farm_id, crop_type, category, planted_date, expected_harvest, \
     harvest_estimated, status, parent_tray_id, child_tray_ids, plant_count, varieties, notes, \
     created_by, created_at, updated_at, version";

impl PgStore {
    async fn load_trays(&self, farm_id: Uuid, rows: Vec<TrayRow>) -> AppResult<Vec<Tray>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let history = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT tray_id, system_id, system_type, spot_ids, moved_at, moved_by, reason
            FROM tray_location_history
            WHERE farm_id = $1 AND tray_id = ANY($2)
            ORDER BY tray_id, seq
            "#,
        )
        .bind(farm_id)
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut by_tray: HashMap<String, Vec<LocationHistoryEntry>> = HashMap::new();
        for row in history {
            let tray_id = row.tray_id.clone();
            by_tray.entry(tray_id).or_default().push(row.try_into()?);
        }

        rows.into_iter()
            .map(|row| {
                let entries = by_tray.remove(&row.id).unwrap_or_default();
                assemble_tray(row, entries)
            })
            .collect()
    }

    async fn write_system(tx: &mut Transaction<'_, Postgres>, system: &GrowingSystem) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE growing_systems
            SET name = $2, location = $3, occupancy = $4, spots = $5,
                version = version + 1, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(system.id)
        .bind(&system.name)
        .bind(&system.location)
        .bind(to_i32(system.occupancy, "occupancy")?)
        .bind(Json(&system.spots))
        .bind(system.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_history(
        tx: &mut Transaction<'_, Postgres>,
        farm_id: Uuid,
        tray_id: &str,
        first_seq: usize,
        entries: &[LocationHistoryEntry],
    ) -> AppResult<()> {
        for (offset, entry) in entries.iter().enumerate() {
            let seq = i32::try_from(first_seq + offset)
                .map_err(|_| AppError::Internal(format!("History of tray {} is too long", tray_id)))?;
            sqlx::query(
                r#"
                INSERT INTO tray_location_history
                    (farm_id, tray_id, seq, system_id, system_type, spot_ids, moved_at, moved_by, reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(farm_id)
            .bind(tray_id)
            .bind(seq)
            .bind(entry.location.system_id)
            .bind(entry.location.system_type.as_str())
            .bind(&entry.location.spot_ids)
            .bind(entry.location.moved_at)
            .bind(&entry.moved_by)
            .bind(&entry.reason)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FarmStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn list_farms(&self) -> AppResult<Vec<Uuid>> {
        let farms: Vec<(Uuid,)> = sqlx::query_as("SELECT DISTINCT farm_id FROM growing_systems")
            .fetch_all(&self.db)
            .await?;
        Ok(farms.into_iter().map(|(id,)| id).collect())
    }

    async fn list_systems(&self, farm_id: Uuid, filter: &SystemFilter) -> AppResult<Vec<GrowingSystem>> {
        let rows = sqlx::query_as::<_, SystemRow>(&format!(
            r#"
            SELECT {}
            FROM growing_systems
            WHERE farm_id = $1 AND ($2::text IS NULL OR system_type = $2)
            ORDER BY name ASC, id ASC
            "#,
            SYSTEM_COLUMNS
        ))
        .bind(farm_id)
        .bind(filter.system_type.map(|t| t.as_str()))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(GrowingSystem::try_from).collect()
    }

    async fn get_system(&self, farm_id: Uuid, system_id: Uuid) -> AppResult<Option<GrowingSystem>> {
        let row = sqlx::query_as::<_, SystemRow>(&format!(
            "SELECT {} FROM growing_systems WHERE farm_id = $1 AND id = $2",
            SYSTEM_COLUMNS
        ))
        .bind(farm_id)
        .bind(system_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(GrowingSystem::try_from).transpose()
    }

    async fn insert_system(&self, system: &GrowingSystem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO growing_systems
                (id, farm_id, name, system_type, crop_category, location, capacity, occupancy,
                 same_per_channel, sections, spots, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(system.id)
        .bind(system.farm_id)
        .bind(&system.name)
        .bind(system.system_type.as_str())
        .bind(system.crop_category.as_str())
        .bind(&system.location)
        .bind(to_i32(system.capacity, "capacity")?)
        .bind(to_i32(system.occupancy, "occupancy")?)
        .bind(system.same_per_channel)
        .bind(Json(&system.sections))
        .bind(Json(&system.spots))
        .bind(system.version)
        .bind(system.created_at)
        .bind(system.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_system(&self, system: &GrowingSystem) -> AppResult<GrowingSystem> {
        let result = sqlx::query(
            r#"
            UPDATE growing_systems
            SET name = $3, location = $4, version = version + 1, updated_at = $5
            WHERE id = $1 AND farm_id = $2 AND version = $6
            "#,
        )
        .bind(system.id)
        .bind(system.farm_id)
        .bind(&system.name)
        .bind(&system.location)
        .bind(system.updated_at)
        .bind(system.version)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(stale("system", system.id));
        }
        let mut next = system.clone();
        next.version += 1;
        Ok(next)
    }

    async fn delete_system(&self, system: &GrowingSystem) -> AppResult<()> {
        let result = sqlx::query(
            "DELETE FROM growing_systems WHERE id = $1 AND farm_id = $2 AND version = $3 AND occupancy = 0",
        )
        .bind(system.id)
        .bind(system.farm_id)
        .bind(system.version)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(stale("system", system.id));
        }
        Ok(())
    }

    async fn list_trays(&self, farm_id: Uuid, filter: &TrayFilter) -> AppResult<Vec<Tray>> {
        let rows = sqlx::query_as::<_, TrayRow>(&format!(
            r#"
            SELECT {}
            FROM trays
            WHERE farm_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR current_system_id = $3)
            ORDER BY created_at ASC, id ASC
            "#,
            TRAY_COLUMNS
        ))
        .bind(farm_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.system_id)
        .fetch_all(&self.db)
        .await?;

        self.load_trays(farm_id, rows).await
    }

    async fn get_tray(&self, farm_id: Uuid, tray_id: &str) -> AppResult<Option<Tray>> {
        let row = sqlx::query_as::<_, TrayRow>(&format!(
            "SELECT {} FROM trays WHERE farm_id = $1 AND id = $2",
            TRAY_COLUMNS
        ))
        .bind(farm_id)
        .bind(tray_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(self.load_trays(farm_id, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn tray_ids_with_prefix(&self, farm_id: Uuid, prefix: &str) -> AppResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM trays WHERE farm_id = $1 AND starts_with(id, $2)")
                .bind(farm_id)
                .bind(prefix)
                .fetch_all(&self.db)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn commit(&self, farm_id: Uuid, commit: Commit) -> AppResult<Commit> {
        check_commit_scope(farm_id, &commit)?;

        let mut tx = self.db.begin().await?;

        // Lock every touched row and check it has not moved on
        for system in &commit.systems {
            let stored: Option<(i64,)> = sqlx::query_as(
                "SELECT version FROM growing_systems WHERE id = $1 AND farm_id = $2 FOR UPDATE",
            )
            .bind(system.id)
            .bind(farm_id)
            .fetch_optional(&mut *tx)
            .await?;
            match stored {
                None => return Err(AppError::NotFound(format!("Growing system {}", system.id))),
                Some((version,)) if version != system.version => {
                    return Err(stale("system", system.id))
                }
                Some(_) => {}
            }
        }

        let mut history_lengths = HashMap::new();
        for tray in &commit.updated_trays {
            let stored: Option<(i64, i64)> = sqlx::query_as(
                r#"
                SELECT t.version,
                       (SELECT COUNT(*) FROM tray_location_history h
                        WHERE h.farm_id = t.farm_id AND h.tray_id = t.id)
                FROM trays t
                WHERE t.id = $1 AND t.farm_id = $2
                FOR UPDATE
                "#,
            )
            .bind(&tray.id)
            .bind(farm_id)
            .fetch_optional(&mut *tx)
            .await?;
            match stored {
                None => return Err(AppError::NotFound(format!("Tray {}", tray.id))),
                Some((version, _)) if version != tray.version => return Err(stale("tray", &tray.id)),
                Some((_, length)) => {
                    let length = usize::try_from(length).unwrap_or(0);
                    if length > tray.location_history.len() {
                        return Err(stale("tray", &tray.id));
                    }
                    history_lengths.insert(tray.id.clone(), length);
                }
            }
        }

        for system in &commit.systems {
            Self::write_system(&mut tx, system).await?;
        }

        for tray in &commit.updated_trays {
            sqlx::query(
                r#"
                UPDATE trays
                SET status = $2, current_system_id = $3, child_tray_ids = $4, varieties = $5,
                    notes = $6, updated_at = $7, version = version + 1
                WHERE id = $1 AND farm_id = $8
                "#,
            )
            .bind(&tray.id)
            .bind(tray.status.as_str())
            .bind(tray.current_location.system_id)
            .bind(&tray.child_tray_ids)
            .bind(Json(&tray.varieties))
            .bind(&tray.notes)
            .bind(tray.updated_at)
            .bind(farm_id)
            .execute(&mut *tx)
            .await?;

            let stored = history_lengths.get(&tray.id).copied().unwrap_or(0);
            Self::insert_history(&mut tx, farm_id, &tray.id, stored + 1, &tray.location_history[stored..])
                .await?;
        }

        for tray in &commit.created_trays {
            let inserted = sqlx::query(
                r#"
                INSERT INTO trays
                    (id, farm_id, crop_type, category, planted_date, expected_harvest,
                     harvest_estimated, status, current_system_id, parent_tray_id, child_tray_ids,
                     plant_count, varieties, notes, created_by, created_at, updated_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                ON CONFLICT (farm_id, id) DO NOTHING
                "#,
            )
            .bind(&tray.id)
            .bind(tray.farm_id)
            .bind(&tray.crop_type)
            .bind(tray.category.as_str())
            .bind(tray.planted_date)
            .bind(tray.expected_harvest)
            .bind(tray.harvest_estimated)
            .bind(tray.status.as_str())
            .bind(tray.current_location.system_id)
            .bind(&tray.parent_tray_id)
            .bind(&tray.child_tray_ids)
            .bind(to_i32(tray.plant_count, "plant_count")?)
            .bind(Json(&tray.varieties))
            .bind(&tray.notes)
            .bind(&tray.created_by)
            .bind(tray.created_at)
            .bind(tray.updated_at)
            .bind(tray.version)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(AppError::conflict(
                    "tray",
                    format!("Tray {} already exists", tray.id),
                ));
            }
            Self::insert_history(&mut tx, farm_id, &tray.id, 1, &tray.location_history).await?;
        }

        tx.commit().await?;
        Ok(bump_versions(commit))
    }
}
