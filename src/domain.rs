use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarmonizeError;

pub const UNSPECIFIED: &str = "(unspecified)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Compartment {
    Air,
    Water,
    Soil,
    Raw,
}

impl Compartment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compartment::Air => "Air",
            Compartment::Water => "Water",
            Compartment::Soil => "Soil",
            Compartment::Raw => "Raw",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Compartment {
    type Err = HarmonizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "air" => Ok(Compartment::Air),
            "water" => Ok(Compartment::Water),
            "soil" => Ok(Compartment::Soil),
            "raw" | "resource" | "natural resource" => Ok(Compartment::Raw),
            _ => Err(HarmonizeError::InvalidCompartment(value.to_string())),
        }
    }
}

/// Midpoint or damage (endpoint) modelling tier of a factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Midpoint,
    Damage,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Midpoint => write!(f, "Midpoint"),
            Tier::Damage => write!(f, "Damage"),
        }
    }
}

impl FromStr for Tier {
    type Err = HarmonizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "midpoint" | "mp" => Ok(Tier::Midpoint),
            "damage" | "endpoint" => Ok(Tier::Damage),
            _ => Err(HarmonizeError::InvalidTier(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Resolution {
    Global,
    Continent,
    Country,
    #[serde(rename = "Other region")]
    OtherRegion,
    #[serde(rename = "Not regionalized")]
    NotRegionalized,
}

impl Resolution {
    pub fn is_regional(&self) -> bool {
        matches!(
            self,
            Resolution::Continent | Resolution::Country | Resolution::OtherRegion
        )
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Global => write!(f, "Global"),
            Resolution::Continent => write!(f, "Continent"),
            Resolution::Country => write!(f, "Country"),
            Resolution::OtherRegion => write!(f, "Other region"),
            Resolution::NotRegionalized => write!(f, "Not regionalized"),
        }
    }
}

impl FromStr for Resolution {
    type Err = HarmonizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "global" => Ok(Resolution::Global),
            "continent" => Ok(Resolution::Continent),
            "country" => Ok(Resolution::Country),
            "other region" | "otherregion" => Ok(Resolution::OtherRegion),
            "not regionalized" | "notregionalized" => Ok(Resolution::NotRegionalized),
            _ => Err(HarmonizeError::InvalidResolution(value.to_string())),
        }
    }
}

/// The two biogenic-carbon accounting conventions the master dataset is forked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CarbonAccounting {
    PlusMinusOne,
    CarbonNeutral,
}

impl CarbonAccounting {
    pub fn all() -> [CarbonAccounting; 2] {
        [CarbonAccounting::PlusMinusOne, CarbonAccounting::CarbonNeutral]
    }

    pub fn slug(&self) -> &'static str {
        match self {
            CarbonAccounting::PlusMinusOne => "plus-minus-one",
            CarbonAccounting::CarbonNeutral => "carbon-neutral",
        }
    }
}

impl fmt::Display for CarbonAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for CarbonAccounting {
    type Err = HarmonizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "plus-minus-one" | "+/-1" => Ok(CarbonAccounting::PlusMinusOne),
            "carbon-neutral" => Ok(CarbonAccounting::CarbonNeutral),
            other => Err(HarmonizeError::ConfigParse(format!(
                "unknown carbon accounting view: {other}"
            ))),
        }
    }
}
