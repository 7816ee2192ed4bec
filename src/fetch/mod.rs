//! Remote data sources for the sensor object.
//!
//! [`ObjectSource`] is the seam the poller fetches through. Implementations
//! exist for S3-compatible buckets, plain HTTP(S) URLs, and local files.

mod basic;
mod client;
mod file;
mod http;
mod s3;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use file::FileSource;
pub use http::HttpSource;
pub use s3::S3Source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;

/// Conditional-fetch metadata returned by the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Result of a fetch against an [`ObjectSource`].
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The source confirmed the object is unchanged since `validators`.
    NotModified,
    Fetched { body: Bytes, validators: Validators },
}

/// Abstraction over wherever the sensor gateway writes its data object.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetches the object. `validators` may be empty; sources that do not
    /// support conditional requests ignore them.
    async fn fetch(&self, validators: &Validators) -> Result<FetchOutcome>;

    /// Human-readable location, used in logs.
    fn describe(&self) -> String;
}

/// Where a source lives, parsed from a CLI-style location string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    S3 { bucket: String, key: String },
    Http(String),
    File(String),
}

impl SourceLocation {
    /// Parses `s3://bucket/key`, `http(s)://...`, or treats anything else as a file path.
    pub fn parse(location: &str) -> Result<Self> {
        if let Some(rest) = location.strip_prefix("s3://") {
            let Some((bucket, key)) = rest.split_once('/') else {
                bail!("S3 location '{location}' must look like s3://bucket/key");
            };
            if bucket.is_empty() || key.is_empty() {
                bail!("S3 location '{location}' must look like s3://bucket/key");
            }
            return Ok(SourceLocation::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(SourceLocation::Http(location.to_string()));
        }
        Ok(SourceLocation::File(location.to_string()))
    }

    /// Builds the matching source. S3 sources use the ambient AWS
    /// configuration, optionally pointed at an S3-compatible endpoint.
    pub async fn into_source(
        self,
        endpoint_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn ObjectSource>> {
        let source: Arc<dyn ObjectSource> = match self {
            SourceLocation::S3 { bucket, key } => {
                let client = s3_client(endpoint_url).await;
                Arc::new(S3Source::new(client, bucket, key))
            }
            SourceLocation::Http(url) => {
                Arc::new(HttpSource::new(BasicClient::with_timeout(timeout)?, url))
            }
            SourceLocation::File(path) => Arc::new(FileSource::new(path)),
        };
        Ok(source)
    }
}

/// Loads the ambient AWS configuration and builds an S3 client.
///
/// Path-style addressing is forced when a custom endpoint is given, which
/// most S3-compatible stores expect.
pub async fn s3_client(endpoint_url: Option<&str>) -> aws_sdk_s3::Client {
    let config = aws_config::load_from_env().await;
    match endpoint_url {
        Some(endpoint) => {
            let s3_config = aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .force_path_style(true)
                .build();
            aws_sdk_s3::Client::from_conf(s3_config)
        }
        None => aws_sdk_s3::Client::new(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_location() {
        assert_eq!(
            SourceLocation::parse("s3://sensors/live/data.json").unwrap(),
            SourceLocation::S3 {
                bucket: "sensors".into(),
                key: "live/data.json".into()
            }
        );
    }

    #[test]
    fn test_parse_s3_location_requires_key() {
        assert!(SourceLocation::parse("s3://sensors").is_err());
        assert!(SourceLocation::parse("s3://sensors/").is_err());
    }

    #[test]
    fn test_parse_http_and_file_locations() {
        assert_eq!(
            SourceLocation::parse("https://example.org/data.json").unwrap(),
            SourceLocation::Http("https://example.org/data.json".into())
        );
        assert_eq!(
            SourceLocation::parse("fixtures/data.ndjson").unwrap(),
            SourceLocation::File("fixtures/data.ndjson".into())
        );
    }

    #[test]
    fn test_validators_empty() {
        assert!(Validators::default().is_empty());
        let v = Validators {
            etag: Some("\"abc\"".into()),
            last_modified: None,
        };
        assert!(!v.is_empty());
    }
}
