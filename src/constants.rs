/// Canonical column names and source vocabularies shared across stages.
/// Input files are renamed onto these names during cleaning so later stages
/// never need to know the municipality-specific headers.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LinkageError;

// Address columns
pub const ADDRESS: &str = "address";
pub const NORMALIZED_ADDRESS: &str = "normalized_address";

// Water utility
pub const METER_NUMBER: &str = "meter_number";
pub const USAGE_STATUS: &str = "usage_status";
pub const USAGE_START_DATE: &str = "usage_start_date";
pub const USAGE_END_DATE: &str = "usage_end_date";
pub const READING_DATE: &str = "reading_date";
pub const USAGE: &str = "usage";

// Per-residence usage statistics produced upstream of linkage
pub const CLOSED_FLAG: &str = "closed_flag";
pub const MAX_USAGE: &str = "max_usage";
pub const MEAN_USAGE: &str = "mean_usage";
pub const MIN_USAGE: &str = "min_usage";
pub const TOTAL_USAGE: &str = "total_usage";
pub const USAGE_CHANGE_RATE: &str = "usage_change_rate";

// Resident registry
pub const HOUSEHOLD_CODE: &str = "household_code";
pub const BIRTH_DATE: &str = "birth_date";
pub const GENDER: &str = "gender";
pub const MOVE_DATE: &str = "move_date";

// Land registry
pub const STRUCTURE: &str = "structure";
pub const REGISTRATION_DATE: &str = "registration_date";

// Geocoding
pub const LATITUDE: &str = "lat";
pub const LONGITUDE: &str = "lon";

// Derived by the linker
pub const START_MONTH: &str = "start_month";

// Spatial output
pub const BUILDING_ID: &str = "building_id";
pub const PLATEAU_BUILDING_ID: &str = "buildingID";
pub const BUILDING_GEOMETRY: &str = "building_geometry";
pub const GEOMETRY: &str = "geometry";
pub const RESIDENCE_ID: &str = "residence_id";
pub const KEY_CODE: &str = "key_code";
pub const AREA_NAME: &str = "area_name";

/// Value used for the address of synthetic rows that have no counterpart
pub const MISSING_ADDRESS: &str = "欠損";

/// Default values written into synthetic tables for an absent optional source
pub fn synthetic_default(column: &str) -> &'static str {
    match column {
        STRUCTURE => "木造",
        REGISTRATION_DATE => "1990/01/01",
        METER_NUMBER => "999999",
        USAGE_STATUS => "1",
        ADDRESS => MISSING_ADDRESS,
        USAGE_START_DATE => "20990331",
        USAGE_END_DATE => "",
        READING_DATE => "20230714",
        USAGE => "999",
        HOUSEHOLD_CODE => "999999",
        BIRTH_DATE => "20100331",
        GENDER => "1",
        MOVE_DATE => "2010/01/01",
        LATITUDE | LONGITUDE => "",
        _ => "1",
    }
}

/// The municipal datasets the pipeline knows how to clean and link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WaterStatus,
    WaterUsage,
    ResidentRegistry,
    LandRegistry,
    VacantHouse,
    Geocoding,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::WaterStatus,
        SourceKind::WaterUsage,
        SourceKind::ResidentRegistry,
        SourceKind::LandRegistry,
        SourceKind::VacantHouse,
        SourceKind::Geocoding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::WaterStatus => "water_status",
            SourceKind::WaterUsage => "water_usage",
            SourceKind::ResidentRegistry => "resident_registry",
            SourceKind::LandRegistry => "land_registry",
            SourceKind::VacantHouse => "vacant_house",
            SourceKind::Geocoding => "geocoding",
        }
    }

    /// Canonical columns every cleaned table of this kind must carry
    pub fn canonical_fields(&self) -> &'static [&'static str] {
        match self {
            SourceKind::WaterStatus => &[
                METER_NUMBER,
                USAGE_STATUS,
                ADDRESS,
                USAGE_START_DATE,
                USAGE_END_DATE,
            ],
            SourceKind::WaterUsage => &[METER_NUMBER, READING_DATE, USAGE],
            SourceKind::ResidentRegistry => {
                &[HOUSEHOLD_CODE, ADDRESS, BIRTH_DATE, GENDER, MOVE_DATE]
            }
            SourceKind::LandRegistry => &[ADDRESS, STRUCTURE, REGISTRATION_DATE],
            SourceKind::VacantHouse => &[ADDRESS],
            SourceKind::Geocoding => &[ADDRESS, LATITUDE, LONGITUDE],
        }
    }

    /// Columns that hold dates and get era conversion during cleaning
    pub fn date_fields(&self) -> &'static [&'static str] {
        match self {
            SourceKind::WaterStatus => &[USAGE_START_DATE, USAGE_END_DATE],
            SourceKind::WaterUsage => &[READING_DATE],
            SourceKind::ResidentRegistry => &[BIRTH_DATE, MOVE_DATE],
            SourceKind::LandRegistry => &[REGISTRATION_DATE],
            SourceKind::VacantHouse | SourceKind::Geocoding => &[],
        }
    }

    pub fn has_address(&self) -> bool {
        !matches!(self, SourceKind::WaterUsage)
    }

    /// Sources replaced by synthetic defaults when no file is supplied
    pub fn synthesized_when_absent(&self) -> bool {
        matches!(self, SourceKind::VacantHouse | SourceKind::Geocoding)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = LinkageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| LinkageError::Config(format!("unknown source kind '{}'", s)))
    }
}
