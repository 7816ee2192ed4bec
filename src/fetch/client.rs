use async_trait::async_trait;
use reqwest::Response;
use reqwest::header::HeaderMap;

/// Transport the HTTP source issues its conditional GETs through.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET for `url` with `headers` added to the request.
    async fn get(&self, url: &str, headers: HeaderMap) -> reqwest::Result<Response>;
}
