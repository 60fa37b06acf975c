//! Validation utilities for the Farm Operations Platform

use crate::models::VarietyAllocation;

// ============================================================================
// Tray Validations
// ============================================================================

/// Validate a location code (1-4 uppercase alphanumerics, e.g. "K")
pub fn validate_location_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() {
        return Err("Location code cannot be empty");
    }
    if code.len() > 4 {
        return Err("Location code must be at most 4 characters");
    }
    if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err("Location code must be uppercase alphanumeric only");
    }
    Ok(())
}

/// Validate a crop name (non-empty, must contain a letter for the crop code)
pub fn validate_crop_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Crop type cannot be empty");
    }
    if trimmed.len() > 64 {
        return Err("Crop type must be at most 64 characters");
    }
    if !trimmed.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err("Crop type must contain at least one letter");
    }
    Ok(())
}

/// Validate variety sub-allocations against the tray plant count
pub fn validate_varieties(
    varieties: &[VarietyAllocation],
    plant_count: u32,
) -> Result<(), &'static str> {
    if varieties.iter().any(|v| v.seed_id.trim().is_empty()) {
        return Err("Every variety needs a seed id");
    }
    if varieties.iter().any(|v| v.quantity == 0) {
        return Err("Variety quantities must be positive");
    }
    let total: u64 = varieties.iter().map(|v| u64::from(v.quantity)).sum();
    if total > u64::from(plant_count) {
        return Err("Variety quantities exceed the tray plant count");
    }
    Ok(())
}

// ============================================================================
// Spot Request Validations
// ============================================================================

/// Validate that a spot request names at least one spot and no blanks
pub fn validate_spot_ids(spot_ids: &[String]) -> Result<(), &'static str> {
    if spot_ids.is_empty() {
        return Err("At least one spot is required");
    }
    if spot_ids.iter().any(|s| s.trim().is_empty()) {
        return Err("Spot ids cannot be blank");
    }
    Ok(())
}
