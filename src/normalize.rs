//! Turns raw sensor records into [`CanonicalReading`]s.
//!
//! Firmware revisions have used several names for the same field; each
//! canonical field lists the raw names it accepts, first match wins.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::reading::{CanonicalReading, GeoPoint, Pollutant, Pollutants, RawReading};

/// Timestamp layout written by the sensor gateway.
pub const SOURCE_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

fn field_names(pollutant: Pollutant) -> &'static [&'static str] {
    match pollutant {
        Pollutant::Pm1 => &["pm1_0_ppm", "pm1_0", "pm1", "PM1_0", "PM1"],
        Pollutant::Pm2_5 => &["pm2_5_ppm", "pm2_5", "pm25", "PM2_5", "PM25"],
        Pollutant::Pm10 => &["pm10_ppm", "pm10", "PM10"],
        Pollutant::O3 => &["ozone_ppm", "o3_ppm", "ozone", "o3", "O3"],
        Pollutant::Co => &["co_ppm", "co", "CO"],
        Pollutant::No2 => &["no2_ppm", "no2", "NO2"],
        Pollutant::So2 => &["so2_ppm", "so2", "SO2"],
    }
}

const TEMPERATURE: &[&str] = &["temp_celsius", "temperature", "temp"];
const HUMIDITY: &[&str] = &["humidity_percent", "humidity"];
const LATITUDE: &[&str] = &["gps_lat", "latitude", "lat"];
const LONGITUDE: &[&str] = &["gps_lng", "gps_lon", "longitude", "lng", "lon"];
const ALARM: &[&str] = &["buzzer_on", "buzzer_o", "buzzer", "alarm"];

/// Parses a source timestamp into a UTC instant.
///
/// Accepts the gateway's `DD/MM/YYYY HH:MM:SS` layout (interpreted as UTC)
/// and falls back to RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, SOURCE_TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" | "yes" => Some(true),
            "false" | "off" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn first_number(raw: &RawReading, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| raw.get(name).and_then(as_number))
}

fn nested_gps(raw: &RawReading, key: &str) -> Option<f64> {
    raw.get("gps")?.get(key).and_then(as_number)
}

/// Extracts pollutant concentrations; missing, negative, or unreadable values are 0.
pub fn pollutants(raw: &RawReading) -> Pollutants {
    let mut out = Pollutants::default();
    for pollutant in Pollutant::ALL {
        let value = first_number(raw, field_names(pollutant)).unwrap_or(0.0);
        out.set(pollutant, value.max(0.0));
    }
    out
}

fn geolocation(raw: &RawReading) -> Option<GeoPoint> {
    let latitude = first_number(raw, LATITUDE).or_else(|| nested_gps(raw, "latitude"))?;
    let longitude = first_number(raw, LONGITUDE).or_else(|| nested_gps(raw, "longitude"))?;
    Some(GeoPoint {
        latitude,
        longitude,
    })
}

fn alarm(raw: &RawReading) -> bool {
    ALARM
        .iter()
        .find_map(|name| raw.get(name).and_then(as_flag))
        .unwrap_or(false)
}

/// Normalizes `raw`, substituting `now` when the timestamp is missing or unreadable.
pub fn normalize_at(raw: &RawReading, now: DateTime<Utc>) -> CanonicalReading {
    let timestamp = match raw.timestamp_str().and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            warn!(
                timestamp = raw.timestamp_str().unwrap_or("<missing>"),
                "Unparseable reading timestamp, using current time"
            );
            now
        }
    };

    let reading = CanonicalReading {
        timestamp,
        pollutants: pollutants(raw),
        temperature: first_number(raw, TEMPERATURE),
        humidity: first_number(raw, HUMIDITY),
        geolocation: geolocation(raw),
        alarm: alarm(raw),
    };
    debug!(timestamp = %reading.timestamp, "Reading normalized");
    reading
}

/// Normalizes a single raw record. Never fails.
pub fn normalize(raw: &RawReading) -> CanonicalReading {
    normalize_at(raw, Utc::now())
}

/// Normalizes the first record of a batch, or `None` for an empty batch.
pub fn normalize_first(raw: &[RawReading]) -> Option<CanonicalReading> {
    raw.first().map(normalize)
}
