//! CSV-backed reading history.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ReadingStore;
use crate::aqi::{AqiCategory, EnrichedReading};
use crate::reading::{CanonicalReading, GeoPoint, Pollutant, Pollutants};

/// One history row. Flat so it maps onto CSV columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: DateTime<Utc>,
    pub aqi: u16,
    pub category: AqiCategory,
    pub dominant: Option<Pollutant>,
    pub pm1: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub o3: f64,
    pub co: f64,
    pub no2: f64,
    pub so2: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub alarm: bool,
}

impl From<&EnrichedReading> for HistoryRow {
    fn from(e: &EnrichedReading) -> Self {
        let r = &e.reading;
        Self {
            timestamp: r.timestamp,
            aqi: e.aqi.overall,
            category: e.category,
            dominant: e.aqi.dominant,
            pm1: r.pollutants.pm1,
            pm2_5: r.pollutants.pm2_5,
            pm10: r.pollutants.pm10,
            o3: r.pollutants.o3,
            co: r.pollutants.co,
            no2: r.pollutants.no2,
            so2: r.pollutants.so2,
            temperature: r.temperature,
            humidity: r.humidity,
            latitude: r.geolocation.map(|g| g.latitude),
            longitude: r.geolocation.map(|g| g.longitude),
            alarm: r.alarm,
        }
    }
}

impl From<HistoryRow> for CanonicalReading {
    fn from(row: HistoryRow) -> Self {
        let geolocation = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Self {
            timestamp: row.timestamp,
            pollutants: Pollutants {
                pm1: row.pm1,
                pm2_5: row.pm2_5,
                pm10: row.pm10,
                o3: row.o3,
                co: row.co,
                no2: row.no2,
                so2: row.so2,
            },
            temperature: row.temperature,
            humidity: row.humidity,
            geolocation,
            alarm: row.alarm,
        }
    }
}

/// Appends history rows to a CSV file, writing the header once.
pub struct CsvStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_row(&self, row: &HistoryRow) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history writer lock poisoned"))?;
        let file_exists = self.path.exists();
        debug!(path = %self.path.display(), file_exists, "Appending history row");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(&self.path)?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);

        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads every parseable row; unreadable rows are skipped.
    pub fn read_rows(&self) -> Result<Vec<HistoryRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut rdr = csv::Reader::from_reader(file);

        let mut rows = Vec::new();
        for (index, result) in rdr.deserialize::<HistoryRow>().enumerate() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => warn!(row = index + 1, error = %e, "Skipping unreadable history row"),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl ReadingStore for CsvStore {
    async fn append(&self, reading: &EnrichedReading) -> Result<()> {
        self.append_row(&HistoryRow::from(reading))
            .with_context(|| format!("Failed to append to {}", self.path.display()))
    }

    async fn latest(&self) -> Result<Option<CanonicalReading>> {
        let rows = self.read_rows()?;
        Ok(rows
            .into_iter()
            .rev()
            .max_by_key(|r| r.timestamp)
            .map(CanonicalReading::from))
    }
}
