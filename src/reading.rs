//! Data types shared by the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pollutants tracked by a [`CanonicalReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pollutant {
    Pm1,
    Pm2_5,
    Pm10,
    O3,
    Co,
    No2,
    So2,
}

impl Pollutant {
    pub const ALL: [Pollutant; 7] = [
        Pollutant::Pm1,
        Pollutant::Pm2_5,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::Co,
        Pollutant::No2,
        Pollutant::So2,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Pollutant::Pm1 => "pm1",
            Pollutant::Pm2_5 => "pm2_5",
            Pollutant::Pm10 => "pm10",
            Pollutant::O3 => "o3",
            Pollutant::Co => "co",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
        }
    }
}

impl std::fmt::Display for Pollutant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Pollutant concentrations. Missing values are `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pollutants {
    pub pm1: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub o3: f64,
    pub co: f64,
    pub no2: f64,
    pub so2: f64,
}

impl Pollutants {
    pub fn get(&self, pollutant: Pollutant) -> f64 {
        match pollutant {
            Pollutant::Pm1 => self.pm1,
            Pollutant::Pm2_5 => self.pm2_5,
            Pollutant::Pm10 => self.pm10,
            Pollutant::O3 => self.o3,
            Pollutant::Co => self.co,
            Pollutant::No2 => self.no2,
            Pollutant::So2 => self.so2,
        }
    }

    pub fn set(&mut self, pollutant: Pollutant, value: f64) {
        let slot = match pollutant {
            Pollutant::Pm1 => &mut self.pm1,
            Pollutant::Pm2_5 => &mut self.pm2_5,
            Pollutant::Pm10 => &mut self.pm10,
            Pollutant::O3 => &mut self.o3,
            Pollutant::Co => &mut self.co,
            Pollutant::No2 => &mut self.no2,
            Pollutant::So2 => &mut self.so2,
        };
        *slot = value;
    }

    /// Builder-style setter, mostly useful in tests and the `aqi` subcommand.
    pub fn with(mut self, pollutant: Pollutant, value: f64) -> Self {
        self.set(pollutant, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pollutant, f64)> + '_ {
        Pollutant::ALL.iter().map(move |&p| (p, self.get(p)))
    }
}

/// Latitude/longitude pair reported by the sensor's GPS module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One raw sensor record as it appears in the bucket object.
///
/// Field names vary between firmware revisions, so the record is kept as an
/// untyped JSON object and interpreted by [`crate::normalize`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawReading(pub Map<String, Value>);

impl RawReading {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// The source timestamp string, if the record carries one.
    pub fn timestamp_str(&self) -> Option<&str> {
        self.0.get("timestamp").and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for RawReading {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A normalized sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalReading {
    pub timestamp: DateTime<Utc>,
    pub pollutants: Pollutants,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub geolocation: Option<GeoPoint>,
    #[serde(default)]
    pub alarm: bool,
}

impl CanonicalReading {
    pub fn new(timestamp: DateTime<Utc>, pollutants: Pollutants) -> Self {
        Self {
            timestamp,
            pollutants,
            temperature: None,
            humidity: None,
            geolocation: None,
            alarm: false,
        }
    }
}
