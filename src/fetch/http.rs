use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use tracing::debug;

use super::client::HttpClient;
use super::{FetchOutcome, ObjectSource, Validators};

/// Reads the sensor object from a URL, e.g. a public or pre-signed bucket URL.
pub struct HttpSource<C> {
    client: C,
    url: String,
}

impl<C: HttpClient> HttpSource<C> {
    pub fn new(client: C, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl<C: HttpClient> ObjectSource for HttpSource<C> {
    async fn fetch(&self, validators: &Validators) -> Result<FetchOutcome> {
        let mut headers = HeaderMap::new();
        if let Some(etag) = &validators.etag {
            headers.insert(IF_NONE_MATCH, etag.parse()?);
        }
        if let Some(modified) = &validators.last_modified {
            headers.insert(IF_MODIFIED_SINCE, modified.parse()?);
        }

        let resp = self
            .client
            .get(&self.url, headers)
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %self.url, "Object not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            bail!("GET {} returned status {}", self.url, status);
        }

        let validators = Validators {
            etag: header_string(resp.headers(), ETAG),
            last_modified: header_string(resp.headers(), LAST_MODIFIED),
        };
        let body = resp.bytes().await?;

        debug!(bytes = body.len(), etag = ?validators.etag, "Object fetched over HTTP");
        Ok(FetchOutcome::Fetched { body, validators })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
