use std::time::Duration;

use super::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::HeaderMap;

/// [`HttpClient`] over a shared `reqwest::Client`.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    /// Client with connect and overall request timeouts.
    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn get(&self, url: &str, headers: HeaderMap) -> reqwest::Result<reqwest::Response> {
        self.0.get(url).headers(headers).send().await
    }
}
