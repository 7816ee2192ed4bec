use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::DateTimeFormat;
use tracing::debug;

use super::{FetchOutcome, ObjectSource, Validators};

/// Reads the sensor object from an S3-compatible bucket.
///
/// Sends `If-None-Match` when an ETag is known so an unchanged object costs a
/// 304 instead of a full download.
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Source {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn fetch(&self, validators: &Validators) -> Result<FetchOutcome> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .set_if_none_match(validators.etag.clone())
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                if status == Some(304) {
                    debug!(bucket = %self.bucket, key = %self.key, "Object not modified");
                    return Ok(FetchOutcome::NotModified);
                }
                return Err(err).with_context(|| {
                    format!("S3 GetObject failed for s3://{}/{}", self.bucket, self.key)
                });
            }
        };

        let validators = Validators {
            etag: output.e_tag().map(str::to_string),
            last_modified: output
                .last_modified()
                .and_then(|t| t.fmt(DateTimeFormat::HttpDate).ok()),
        };

        let body = output
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, self.key))?
            .into_bytes();

        debug!(bytes = body.len(), etag = ?validators.etag, "Object fetched from S3");
        Ok(FetchOutcome::Fetched { body, validators })
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}
