use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use air_quality_monitor::config::{HubConfig, PollerConfig};
use air_quality_monitor::fetch::FileSource;
use air_quality_monitor::hub::{ChannelConnection, Hub, HubMessage};
use air_quality_monitor::normalize::parse_timestamp;
use air_quality_monitor::pipeline::Pipeline;
use air_quality_monitor::poller::Poller;
use air_quality_monitor::store::{MemoryStore, ReadingStore};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

fn sensor_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("air_quality_monitor_{name}.json"));
    let _ = fs::remove_file(&path);
    path
}

/// Replaces the sensor object atomically so a concurrent fetch never sees half a file.
fn publish(path: &Path, records: &[(&str, f64)]) {
    let body: Vec<_> = records
        .iter()
        .map(|(ts, pm2_5)| serde_json::json!({ "timestamp": ts, "pm2_5_ppm": pm2_5, "temp_celsius": 24.0 }))
        .collect();
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec(&body).unwrap()).unwrap();
    fs::rename(&tmp, path).unwrap();
}

const T1: &str = "01/03/2025 10:00:00";
const T2: &str = "01/03/2025 10:00:05";
const T3: &str = "01/03/2025 10:00:10";

fn ts(raw: &str) -> chrono::DateTime<chrono::Utc> {
    parse_timestamp(raw).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_only_records_after_watermark() {
    let path = sensor_file("watermark");
    publish(&path, &[(T1, 10.0)]);
    let poller = Poller::new(Arc::new(FileSource::new(&path)), PollerConfig::default());

    let first = poller.fetch_latest().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(poller.last_seen().await, Some(ts(T1)));

    publish(&path, &[(T3, 30.0), (T1, 10.0), (T2, 20.0)]);
    let next = poller.fetch_latest().await.unwrap();
    let timestamps: Vec<_> = next.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![ts(T2), ts(T3)]);
    assert_eq!(poller.last_seen().await, Some(ts(T3)));

    assert!(poller.fetch_latest().await.is_none());
    assert_eq!(poller.last_seen().await, Some(ts(T3)));

    fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_consecutive_failures_reset_baseline() {
    let path = sensor_file("baseline_reset");
    publish(&path, &[(T1, 10.0), (T2, 20.0)]);
    let config = PollerConfig {
        max_consecutive_errors: 3,
        max_retries: 10,
        ..Default::default()
    };
    let poller = Poller::new(Arc::new(FileSource::new(&path)), config);

    assert_eq!(poller.fetch_latest().await.unwrap().len(), 2);
    assert_eq!(poller.last_seen().await, Some(ts(T2)));

    fs::remove_file(&path).unwrap();
    for _ in 0..3 {
        assert!(poller.fetch_latest().await.is_none());
    }
    assert_eq!(poller.last_seen().await, None);
    assert_eq!(poller.status().total_failures, 3);

    publish(&path, &[(T1, 10.0), (T2, 20.0)]);
    let replayed = poller.fetch_latest().await.unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(poller.status().consecutive_errors, 0);

    fs::remove_file(&path).unwrap();
}

async fn next_message(rx: &mut Receiver<HubMessage>) -> HubMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for hub message")
        .expect("connection channel closed")
}

#[tokio::test]
async fn test_pipeline_streams_new_readings_to_clients() {
    let path = sensor_file("pipeline");
    publish(&path, &[(T1, 40.0)]);

    let config = PollerConfig {
        poll_interval: Duration::from_millis(50),
        max_retries: 0,
        ..Default::default()
    };
    let store = Arc::new(MemoryStore::new());
    let poller = Poller::new(Arc::new(FileSource::new(&path)), config);
    let hub = Arc::new(Hub::new(store.clone(), HubConfig::default()));
    let pipeline = Pipeline::new(poller, hub);

    let (client, mut rx) = ChannelConnection::new(32);
    pipeline.connect(Arc::new(client)).await;
    assert_eq!(next_message(&mut rx).await, HubMessage::no_data());

    pipeline.start();
    match next_message(&mut rx).await {
        HubMessage::Update { data } => {
            assert_eq!(data.timestamp(), ts(T1));
            assert_eq!(data.aqi.overall, 112);
        }
        other => panic!("expected update, got {other:?}"),
    }

    publish(&path, &[(T1, 40.0), (T2, 8.0), (T3, 60.0)]);
    let mut received = Vec::new();
    for _ in 0..2 {
        if let HubMessage::Update { data } = next_message(&mut rx).await {
            received.push(data.timestamp());
        }
    }
    assert_eq!(received, vec![ts(T2), ts(T3)]);

    let status = pipeline.status();
    assert!(status.active);
    assert_eq!(status.last_update_timestamp, Some(ts(T3)));
    assert_eq!(status.active_connection_count, 1);

    // A late joiner gets the latest reading as its snapshot.
    let (late, mut late_rx) = ChannelConnection::new(8);
    pipeline.connect(Arc::new(late)).await;
    match next_message(&mut late_rx).await {
        HubMessage::Snapshot { data } => assert_eq!(data.timestamp(), ts(T3)),
        other => panic!("expected snapshot, got {other:?}"),
    }

    pipeline.stop();
    assert!(!pipeline.status().active);

    for _ in 0..100 {
        if store.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.len(), 3);
    assert_eq!(store.latest().await.unwrap().map(|r| r.timestamp), Some(ts(T3)));

    fs::remove_file(&path).unwrap();
}
