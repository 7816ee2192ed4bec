//! CLI entry point for the air quality monitor.
//!
//! Runs the realtime pipeline against a sensor object, performs one-off
//! fetches, computes AQI from given concentrations, and inspects stored
//! history.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use air_quality_monitor::{
    aqi::{EnrichedReading, compute_aqi},
    config::{EmitMode, HubConfig, PollerConfig},
    fetch::{ObjectSource, SourceLocation, s3_client},
    hub::{ChannelConnection, Hub},
    logging,
    pipeline::Pipeline,
    poller::Poller,
    reading::Pollutants,
    store::{CsvStore, MemoryStore, ReadingStore, S3Store},
};
use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "air_quality_monitor")]
#[command(about = "Realtime air quality monitoring from an object-store sensor feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a source continuously and print every hub message as JSON
    Watch {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        poller: PollerArgs,

        /// Where history is written (`memory` keeps only the most recent rows)
        #[arg(long, value_enum, default_value_t = StoreKind::Csv)]
        store: StoreKind,

        /// CSV file used by `--store csv`
        #[arg(long, default_value = "data/history.csv")]
        history_csv: PathBuf,

        /// Bucket used by `--store s3`
        #[arg(long, env = "HISTORY_BUCKET")]
        history_bucket: Option<String>,

        /// Key prefix used by `--store s3`
        #[arg(long, env = "HISTORY_PREFIX", default_value = "air-quality")]
        history_prefix: String,
    },
    /// Fetch a source once and print the readings with their AQI
    Fetch {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        poller: PollerArgs,
    },
    /// Compute the AQI for the given concentrations
    Aqi {
        /// PM1 in µg/m³
        #[arg(long, default_value_t = 0.0)]
        pm1: f64,
        /// PM2.5 in µg/m³
        #[arg(long = "pm2-5", default_value_t = 0.0)]
        pm2_5: f64,
        /// PM10 in µg/m³
        #[arg(long, default_value_t = 0.0)]
        pm10: f64,
        /// O3 in ppm
        #[arg(long, default_value_t = 0.0)]
        o3: f64,
        /// CO in ppm
        #[arg(long, default_value_t = 0.0)]
        co: f64,
        /// NO2 in ppb
        #[arg(long, default_value_t = 0.0)]
        no2: f64,
        /// SO2 in ppb
        #[arg(long, default_value_t = 0.0)]
        so2: f64,
    },
    /// Print the latest reading from a CSV history file
    History {
        /// CSV history file
        #[arg(short, long, default_value = "data/history.csv")]
        path: PathBuf,

        /// Also print this many of the most recent rows
        #[arg(short = 'n', long, default_value_t = 0)]
        rows: usize,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Sensor object: s3://bucket/key, http(s)://..., or a local file path
    #[arg(long, value_name = "LOCATION")]
    source: Option<String>,

    /// Bucket holding the sensor object, used when --source is not given
    #[arg(long, env = "OBS_BUCKET")]
    bucket: Option<String>,

    /// Key of the sensor object, used when --source is not given
    #[arg(long, env = "FILE_KEY")]
    key: Option<String>,

    /// S3-compatible endpoint, e.g. a Huawei OBS region endpoint
    #[arg(long, env = "OBS_ENDPOINT")]
    endpoint_url: Option<String>,
}

impl SourceArgs {
    fn location(&self) -> Result<SourceLocation> {
        if let Some(source) = &self.source {
            return SourceLocation::parse(source);
        }
        match (&self.bucket, &self.key) {
            (Some(bucket), Some(key)) => Ok(SourceLocation::S3 {
                bucket: bucket.clone(),
                key: key.clone(),
            }),
            _ => bail!("No source given: pass --source or set OBS_BUCKET and FILE_KEY"),
        }
    }

    async fn build(&self, timeout: Duration) -> Result<Arc<dyn ObjectSource>> {
        self.location()?
            .into_source(self.endpoint_url.as_deref(), timeout)
            .await
    }
}

#[derive(Args)]
struct PollerArgs {
    /// Poll interval in milliseconds
    #[arg(long, env = "REAL_TIME_POLL_INTERVAL", default_value_t = 5000)]
    poll_interval_ms: u64,

    /// Fetch timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 10)]
    fetch_timeout_secs: u64,

    /// Consecutive failures before the baseline is reset (0 = never)
    #[arg(long, env = "MAX_CONSECUTIVE_ERRORS", default_value_t = 3)]
    max_consecutive_errors: u32,

    /// Total failures before polling stops (0 = never)
    #[arg(long, env = "MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// Emit every new record or only the newest one per cycle
    #[arg(long, value_enum, default_value_t = EmitMode::All)]
    emit: EmitMode,
}

impl PollerArgs {
    fn config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_consecutive_errors: self.max_consecutive_errors,
            max_retries: self.max_retries,
            emit_mode: self.emit,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Csv,
    S3,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _log_guard = logging::init()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            source,
            poller,
            store,
            history_csv,
            history_bucket,
            history_prefix,
        } => {
            let config = poller.config();
            let object_source = source.build(config.fetch_timeout).await?;
            let store: Arc<dyn ReadingStore> = match store {
                StoreKind::Memory => Arc::new(MemoryStore::new()),
                StoreKind::Csv => Arc::new(CsvStore::new(history_csv)),
                StoreKind::S3 => {
                    let Some(bucket) = history_bucket else {
                        bail!("--store s3 needs --history-bucket or HISTORY_BUCKET");
                    };
                    let client = s3_client(source.endpoint_url.as_deref()).await;
                    Arc::new(S3Store::new(client, bucket, history_prefix))
                }
            };
            watch(object_source, config, store).await?;
        }
        Commands::Fetch { source, poller } => {
            let config = poller.config();
            let object_source = source.build(config.fetch_timeout).await?;
            let poller = Poller::new(object_source, config);

            match poller.fetch_latest().await {
                Some(readings) => {
                    info!(count = readings.len(), "Fetched new readings");
                    for reading in readings {
                        let enriched = EnrichedReading::from_reading(reading);
                        println!("{}", serde_json::to_string(&enriched)?);
                    }
                }
                None => {
                    let status = poller.status();
                    if status.total_failures > 0 {
                        bail!("Fetch failed; see log for details");
                    }
                    info!("No readings found");
                }
            }
        }
        Commands::Aqi {
            pm1,
            pm2_5,
            pm10,
            o3,
            co,
            no2,
            so2,
        } => {
            let pollutants = Pollutants {
                pm1,
                pm2_5,
                pm10,
                o3,
                co,
                no2,
                so2,
            };
            let result = compute_aqi(&pollutants);
            println!("{}", serde_json::to_string_pretty(&result)?);
            info!(
                aqi = result.overall,
                category = result.category().label(),
                dominant = ?result.dominant,
                "AQI computed"
            );
        }
        Commands::History { path, rows } => {
            let store = CsvStore::new(&path);
            match store.latest().await? {
                Some(reading) => {
                    let enriched = EnrichedReading::from_reading(reading);
                    println!("{}", serde_json::to_string_pretty(&enriched)?);
                }
                None => warn!(path = %path.display(), "No stored readings"),
            }

            if rows > 0 {
                let all = store.read_rows()?;
                let start = all.len().saturating_sub(rows);
                for row in &all[start..] {
                    println!("{}", serde_json::to_string(row)?);
                }
            }
        }
    }

    Ok(())
}

/// Runs the pipeline until Ctrl+C or until the poller gives up.
#[tracing::instrument(skip_all, fields(source = %source.describe()))]
async fn watch(
    source: Arc<dyn ObjectSource>,
    config: PollerConfig,
    store: Arc<dyn ReadingStore>,
) -> Result<()> {
    let poller = Poller::new(source, config);
    let mut fatal = poller.subscribe_errors();
    let hub = Arc::new(Hub::new(store, HubConfig::default()));
    let pipeline = Pipeline::new(poller, hub);

    let (console, mut messages) = ChannelConnection::new(256);
    let printer = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            match message.to_json() {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "Failed to encode hub message"),
            }
        }
    });

    pipeline.start();
    let console_id = pipeline.connect(Arc::new(console)).await;
    info!("Watching. Press Ctrl+C to stop.");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted");
            Ok(())
        }
        Some(err) = fatal.recv() => Err(anyhow::Error::new(err)),
    };

    pipeline.disconnect(console_id);
    pipeline.stop();
    printer.abort();

    let status = pipeline.status();
    let poller_status = pipeline.poller().status();
    info!(
        last_update = ?status.last_update_timestamp,
        last_success = ?poller_status.last_success,
        total_failures = poller_status.total_failures,
        connections = status.active_connection_count,
        "Watch finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_watch_with_source() {
        let cli = Cli::try_parse_from([
            "air_quality_monitor",
            "watch",
            "--source",
            "s3://bucket/sensor.json",
            "--poll-interval-ms",
            "1000",
            "--emit",
            "latest-only",
        ])
        .unwrap();

        match cli.command {
            Commands::Watch {
                source,
                poller,
                store,
                ..
            } => {
                assert!(matches!(store, StoreKind::Csv));
                assert_eq!(
                    source.location().unwrap(),
                    SourceLocation::S3 {
                        bucket: "bucket".into(),
                        key: "sensor.json".into()
                    }
                );
                let config = poller.config();
                assert_eq!(config.poll_interval, Duration::from_secs(1));
                assert_eq!(config.emit_mode, EmitMode::LatestOnly);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_source_from_bucket_and_key() {
        let args = SourceArgs {
            source: None,
            bucket: Some("obs-bucket".into()),
            key: Some("data/latest.json".into()),
            endpoint_url: None,
        };
        assert_eq!(
            args.location().unwrap(),
            SourceLocation::S3 {
                bucket: "obs-bucket".into(),
                key: "data/latest.json".into()
            }
        );

        let missing = SourceArgs {
            source: None,
            bucket: None,
            key: None,
            endpoint_url: None,
        };
        assert!(missing.location().is_err());
    }
}
