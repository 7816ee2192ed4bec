use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::ReadingStore;
use crate::aqi::EnrichedReading;
use crate::reading::CanonicalReading;

/// Serializes a value to JSON and uploads it to an S3 bucket with `application/json` content type.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json")
        .send()
        .await
        .with_context(|| format!("S3 PutObject failed for s3://{bucket}/{key}"))?;

    Ok(())
}

/// Stores history as one JSON object per reading under `<prefix>/readings/`
/// and mirrors the newest one to `<prefix>/latest.json`.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub fn reading_key(&self, reading: &EnrichedReading) -> String {
        self.key(&format!(
            "readings/{}.json",
            reading.timestamp().format("%Y-%m-%dT%H-%M-%SZ")
        ))
    }

    pub fn latest_key(&self) -> String {
        self.key("latest.json")
    }
}

#[async_trait]
impl ReadingStore for S3Store {
    async fn append(&self, reading: &EnrichedReading) -> Result<()> {
        write_json_to_s3(&self.client, &self.bucket, &self.reading_key(reading), reading).await?;

        // Only move latest.json forward; a late write of an older reading must not regress it.
        let newer = match self.latest().await {
            Ok(Some(current)) => reading.timestamp() > current.timestamp,
            _ => true,
        };
        if newer {
            write_json_to_s3(&self.client, &self.bucket, &self.latest_key(), reading).await?;
        }
        debug!(bucket = %self.bucket, key = %self.reading_key(reading), "Reading stored in S3");
        Ok(())
    }

    async fn latest(&self) -> Result<Option<CanonicalReading>> {
        let key = self.latest_key();
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key());
                if missing {
                    return Ok(None);
                }
                return Err(err)
                    .with_context(|| format!("S3 GetObject failed for s3://{}/{}", self.bucket, key));
            }
        };

        let bytes = output.body.collect().await?.into_bytes();
        let stored: EnrichedReading = serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid reading JSON in s3://{}/{}", self.bucket, key))?;
        Ok(Some(stored.reading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Pollutants;
    use chrono::{TimeZone, Utc};

    fn store(prefix: &str) -> S3Store {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        S3Store::new(aws_sdk_s3::Client::from_conf(config), "bucket", prefix)
    }

    #[test]
    fn test_keys_respect_prefix() {
        let reading = EnrichedReading::from_reading(CanonicalReading::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap(),
            Pollutants::default(),
        ));

        let s = store("station-1/");
        assert_eq!(s.latest_key(), "station-1/latest.json");
        assert_eq!(s.reading_key(&reading), "station-1/readings/2025-03-01T12-30-05Z.json");

        let bare = store("");
        assert_eq!(bare.latest_key(), "latest.json");
    }

    #[test]
    fn test_stored_json_round_trips() {
        let reading = EnrichedReading::from_reading(CanonicalReading::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap(),
            Pollutants {
                pm10: 80.0,
                ..Default::default()
            },
        ));
        let json = serde_json::to_vec(&reading).unwrap();
        let back: EnrichedReading = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, reading);
    }
}
