//! Tray identifier codec
//!
//! Format: `{locationCode}{MMDDYY}-{typeCode}-{cropCode}-{instance}`, e.g.
//! `K071725-MG-ARUG-1`. Split children append `-S{n}` to the parent id.

use chrono::NaiveDate;

use crate::models::crop_code;
use crate::types::CropCategory;

/// Decoded parts of a base tray id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayIdParts {
    pub location_code: String,
    pub planted: NaiveDate,
    pub type_code: String,
    pub crop_code: String,
    pub instance: u32,
}

/// Everything up to and including the dash before the instance
pub fn tray_id_prefix(
    location_code: &str,
    planted: NaiveDate,
    category: CropCategory,
    crop_type: &str,
) -> String {
    format!(
        "{}{}-{}-{}-",
        location_code,
        planted.format("%m%d%y"),
        category.type_code(),
        crop_code(crop_type)
    )
}

pub fn format_tray_id(
    location_code: &str,
    planted: NaiveDate,
    category: CropCategory,
    crop_type: &str,
    instance: u32,
) -> String {
    format!(
        "{}{}",
        tray_id_prefix(location_code, planted, category, crop_type),
        instance
    )
}

/// Next free instance discriminator for a prefix, given the ids already in use
pub fn next_instance<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> u32 {
    existing
        .into_iter()
        .filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|rest| rest.split('-').next()?.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

pub fn child_tray_id(parent_id: &str, n: usize) -> String {
    format!("{}-S{}", parent_id, n)
}

/// Parse a base tray id (split suffixes are not accepted)
pub fn parse_tray_id(id: &str) -> Option<TrayIdParts> {
    let mut parts = id.split('-');
    let head = parts.next()?;
    let type_code = parts.next()?;
    let crop = parts.next()?;
    let instance = parts.next()?.parse::<u32>().ok()?;
    if parts.next().is_some() || head.len() < 7 || !head.is_ascii() {
        return None;
    }

    let (location_code, date) = head.split_at(head.len() - 6);
    if !date.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let planted = NaiveDate::parse_from_str(date, "%m%d%y").ok()?;

    Some(TrayIdParts {
        location_code: location_code.to_string(),
        planted,
        type_code: type_code.to_string(),
        crop_code: crop.to_string(),
        instance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn july_17() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()
    }

    #[test]
    fn test_format_matches_documented_example() {
        let id = format_tray_id("K", july_17(), CropCategory::Microgreens, "Arugula", 1);
        assert_eq!(id, "K071725-MG-ARUG-1");
    }

    #[test]
    fn test_next_instance_skips_existing_and_children() {
        let prefix = tray_id_prefix("K", july_17(), CropCategory::Microgreens, "Arugula");
        let existing = [
            "K071725-MG-ARUG-1",
            "K071725-MG-ARUG-2-S1",
            "K071725-MG-ARUG-2",
            "K071725-MG-BASI-7",
        ];
        assert_eq!(next_instance(&prefix, existing), 3);
        assert_eq!(next_instance(&prefix, []), 1);
    }

    #[test]
    fn test_parse_round_trip() {
        let parts = parse_tray_id("KB071725-LG-LETT-12").unwrap();
        assert_eq!(parts.location_code, "KB");
        assert_eq!(parts.planted, july_17());
        assert_eq!(parts.type_code, "LG");
        assert_eq!(parts.crop_code, "LETT");
        assert_eq!(parts.instance, 12);
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        assert!(parse_tray_id("K071725-MG-ARUG").is_none());
        assert!(parse_tray_id("K071725-MG-ARUG-1-S1").is_none());
        assert!(parse_tray_id("071725-MG-ARUG-1").is_none());
        assert!(parse_tray_id("K139925-MG-ARUG-1").is_none());
    }

    #[test]
    fn test_child_ids() {
        assert_eq!(child_tray_id("K071725-MG-ARUG-1", 2), "K071725-MG-ARUG-1-S2");
    }
}
