//! Air Quality Index engine.
//!
//! Converts pollutant concentrations into an index on the 0–500 scale using
//! EPA breakpoint interpolation, and maps the result onto a health category.

pub mod breakpoints;
pub mod category;
pub mod compute;

pub use category::AqiCategory;
pub use compute::{AQI_CAP, AqiResult, compute_aqi, sub_index};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::CanonicalReading;

/// A reading together with the index computed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReading {
    #[serde(flatten)]
    pub reading: CanonicalReading,
    pub aqi: AqiResult,
    pub category: AqiCategory,
}

impl EnrichedReading {
    pub fn from_reading(reading: CanonicalReading) -> Self {
        let aqi = compute_aqi(&reading.pollutants);
        let category = aqi.category();
        Self {
            reading,
            aqi,
            category,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.reading.timestamp
    }
}
