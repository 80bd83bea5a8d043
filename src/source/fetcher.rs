use crate::error::{Error, Result};
use crate::source::{listing, Post};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Retrieval seam for the monitor: the newest `limit` entries of one source,
/// in the order the source delivers them.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_newest(&self, source: &str, limit: u32) -> Result<Vec<Post>>;
}

#[derive(Debug, Clone)]
pub struct RedditFetcher {
    client: Client,
    base_url: String,
    timeout_duration: Duration,
    rate_limit_backoff: Duration,
    user_agent: String,
}

impl Default for RedditFetcher {
    fn default() -> Self {
        Self::new("https://www.reddit.com")
    }
}

impl RedditFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_duration: Duration::from_secs(30),
            rate_limit_backoff: Duration::from_secs(60),
            user_agent: format!("subwatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    fn listing_url(&self, source: &str, limit: u32) -> String {
        format!(
            "{}/r/{}/new.json?limit={}&raw_json=1",
            self.base_url, source, limit
        )
    }

    async fn fetch_response(&self, url: &str) -> Result<Response> {
        let response = timeout(self.timeout_duration, self.send_request(url))
            .await
            .map_err(|_| Error::Timeout(format!("Request to {} timed out", url)))?;

        response
    }

    async fn send_request(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request failed: {}", e)))?;

        Ok(response)
    }
}

#[async_trait]
impl SourceFetcher for RedditFetcher {
    async fn fetch_newest(&self, source: &str, limit: u32) -> Result<Vec<Post>> {
        let url = self.listing_url(source, limit);
        debug!("Fetching newest posts from: {}", url);

        let mut response = self.fetch_response(&url).await?;

        // Rate pressure is not an error: back off once and take whatever the
        // retry yields, so the cycle keeps moving.
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                "Rate limited on r/{}, backing off for {}s",
                source,
                self.rate_limit_backoff.as_secs()
            );
            tokio::time::sleep(self.rate_limit_backoff).await;
            response = self.fetch_response(&url).await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                warn!("Still rate limited on r/{}, returning no posts", source);
                return Ok(Vec::new());
            }
        }

        let status = response.status();
        if matches!(
            status,
            StatusCode::NOT_FOUND
                | StatusCode::FORBIDDEN
                | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS
        ) {
            return Err(Error::SourceUnavailable(format!(
                "r/{} returned HTTP {}",
                source,
                status.as_u16()
            )));
        }

        if !status.is_success() {
            return Err(Error::Transport(format!(
                "HTTP {} for {}: {}",
                status.as_u16(),
                url,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;

        debug!("Downloaded {} bytes from {}", body.len(), url);

        let posts = listing::parse_listing(&body)?;
        debug!("Parsed {} posts from r/{}", posts.len(), source);
        Ok(posts)
    }
}
