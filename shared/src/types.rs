//! Common types used across the platform

use serde::{Deserialize, Serialize};

/// Crop category grown by a system or tray
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CropCategory {
    Microgreens,
    LeafyGreens,
}

impl CropCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CropCategory::Microgreens => "microgreens",
            CropCategory::LeafyGreens => "leafy-greens",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "microgreens" => Some(CropCategory::Microgreens),
            "leafy-greens" => Some(CropCategory::LeafyGreens),
            _ => None,
        }
    }

    /// Two-letter code embedded in tray identifiers
    pub fn type_code(&self) -> &'static str {
        match self {
            CropCategory::Microgreens => "MG",
            CropCategory::LeafyGreens => "LG",
        }
    }
}

impl std::fmt::Display for CropCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CropCategory::Microgreens => write!(f, "Microgreens"),
            CropCategory::LeafyGreens => write!(f, "Leafy Greens"),
        }
    }
}

/// Kind of growing system installation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SystemType {
    Nursery,
    Blackout,
    EbbFlow,
    Tower,
    NftChannelGroup,
    MicrogreenRack,
}

impl SystemType {
    pub const ALL: [SystemType; 6] = [
        SystemType::Nursery,
        SystemType::Blackout,
        SystemType::EbbFlow,
        SystemType::Tower,
        SystemType::NftChannelGroup,
        SystemType::MicrogreenRack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::Nursery => "nursery",
            SystemType::Blackout => "blackout",
            SystemType::EbbFlow => "ebb-flow",
            SystemType::Tower => "tower",
            SystemType::NftChannelGroup => "nft-channel-group",
            SystemType::MicrogreenRack => "microgreen-rack",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether occupied spots in one channel must share a crop by default
    pub fn default_same_per_channel(&self) -> bool {
        matches!(self, SystemType::NftChannelGroup)
    }
}

impl std::fmt::Display for SystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemType::Nursery => write!(f, "Nursery"),
            SystemType::Blackout => write!(f, "Blackout"),
            SystemType::EbbFlow => write!(f, "Ebb & Flow"),
            SystemType::Tower => write!(f, "Tower"),
            SystemType::NftChannelGroup => write!(f, "NFT Channel Group"),
            SystemType::MicrogreenRack => write!(f, "Microgreen Rack"),
        }
    }
}
