//! WebAssembly module for the Farm Operations Platform
//!
//! Provides client-side previews so operators see the outcome before
//! submitting:
//! - Candidate placements for a planting
//! - Split plant and variety distribution
//! - Tray ids and expected harvest dates
//!
//! Nothing here reserves capacity; the server re-validates every request.

use chrono::NaiveDate;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use shared::lifecycle::{distribute_varieties, even_split};
use shared::{
    estimate_harvest, find_candidates, format_tray_id, parse_tray_id, CropCategory, GrowingSystem,
    SystemType, VarietyAllocation,
};

fn js_error(context: &str, e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{}: {}", context, e))
}

fn parse_date(date: &str) -> Result<NaiveDate, JsValue> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| js_error("Invalid date", e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(|e| js_error("Serialization failed", e))
}

/// Candidate placements from a JSON array of growing systems
#[wasm_bindgen]
pub fn preview_candidates(
    systems_json: &str,
    system_type: &str,
    quantity_needed: i64,
    crop_type: Option<String>,
) -> Result<String, JsValue> {
    let systems: Vec<GrowingSystem> =
        serde_json::from_str(systems_json).map_err(|e| js_error("Invalid systems JSON", e))?;
    let system_type = SystemType::from_str(system_type)
        .ok_or_else(|| JsValue::from_str(&format!("Unknown system type {}", system_type)))?;

    let candidates = find_candidates(&systems, system_type, quantity_needed, crop_type.as_deref())
        .map_err(|e| js_error("Invalid request", e))?;
    to_json(&candidates)
}

#[derive(Serialize)]
struct SplitPreview {
    plant_counts: Vec<u32>,
    varieties: Vec<Vec<VarietyAllocation>>,
}

/// Even plant split across `parts` children, with varieties distributed
/// proportionally
#[wasm_bindgen]
pub fn preview_split(plant_count: u32, parts: usize, varieties_json: &str) -> Result<String, JsValue> {
    let varieties: Vec<VarietyAllocation> = if varieties_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(varieties_json).map_err(|e| js_error("Invalid varieties JSON", e))?
    };

    let plant_counts = even_split(plant_count, parts);
    let varieties = distribute_varieties(&varieties, &plant_counts);
    to_json(&SplitPreview {
        plant_counts,
        varieties,
    })
}

/// Tray id for a planting, given the instance number
#[wasm_bindgen]
pub fn preview_tray_id(
    location_code: &str,
    planted_date: &str,
    category: &str,
    crop_type: &str,
    instance: u32,
) -> Result<String, JsValue> {
    let planted = parse_date(planted_date)?;
    let category = CropCategory::from_str(category)
        .ok_or_else(|| JsValue::from_str(&format!("Unknown crop category {}", category)))?;
    Ok(format_tray_id(location_code, planted, category, crop_type, instance))
}

/// Whether a string is a well-formed base tray id
#[wasm_bindgen]
pub fn is_valid_tray_id(id: &str) -> bool {
    parse_tray_id(id).is_some()
}

/// Expected harvest date as `YYYY-MM-DD`
#[wasm_bindgen]
pub fn expected_harvest_date(crop_type: &str, planted_date: &str) -> Result<String, JsValue> {
    let planted = parse_date(planted_date)?;
    Ok(estimate_harvest(crop_type, planted).date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::NewGrowingSystem;
    use uuid::Uuid;

    fn rack_json() -> String {
        let rack = GrowingSystem::provision(
            Uuid::nil(),
            NewGrowingSystem {
                name: "Rack 1".to_string(),
                system_type: SystemType::MicrogreenRack,
                crop_category: CropCategory::Microgreens,
                location: "K".to_string(),
                capacity: 3,
                sections: vec![],
                same_per_channel: None,
            },
            Utc::now(),
        )
        .unwrap();
        serde_json::to_string(&vec![rack]).unwrap()
    }

    #[test]
    fn test_preview_candidates() {
        let json = preview_candidates(&rack_json(), "microgreen-rack", 2, None).unwrap();
        let candidates: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(candidates[0]["spot_ids"], serde_json::json!(["1", "2"]));
    }

    #[test]
    fn test_preview_split() {
        let varieties = r#"[{"seed_id":"s1","seed_name":null,"quantity":10}]"#;
        let json = preview_split(10, 3, varieties).unwrap();
        let preview: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(preview["plant_counts"], serde_json::json!([4, 3, 3]));
        let total: u64 = preview["varieties"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|child| child.as_array().unwrap().iter())
            .map(|v| v["quantity"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_preview_tray_id() {
        let id = preview_tray_id("K", "2025-07-17", "microgreens", "Arugula", 1).unwrap();
        assert_eq!(id, "K071725-MG-ARUG-1");
        assert!(is_valid_tray_id(&id));
        assert!(!is_valid_tray_id("K071725-MG-ARUG-1-S1"));
    }

    #[test]
    fn test_expected_harvest_date() {
        assert_eq!(expected_harvest_date("Radish", "2025-07-17").unwrap(), "2025-07-25");
    }
}
