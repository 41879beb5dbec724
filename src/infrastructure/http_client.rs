//! HTTP client for web crawling with rate limiting and error handling
//!
//! Provides a robust HTTP client specifically designed for scraping
//! storefronts with respect for server resources: per-client rate limiting,
//! connect/read timeouts, exponential-backoff retries, and cooperative
//! cancellation at every I/O boundary.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::site_profile::SiteProfile;

/// HTTP client configuration for crawling.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub max_requests_per_second: u32,
    /// Retry attempts for transient failures (timeouts, 5xx).
    pub max_retries: u32,
    /// Backoff base in seconds; attempt n waits base^n with jitter.
    pub backoff_base_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36"
                .to_string(),
            connect_timeout_seconds: 10,
            read_timeout_seconds: 30,
            max_requests_per_second: 4,
            max_retries: 3,
            backoff_base_seconds: 2,
        }
    }
}

/// A fetched page body together with the URL it finally resolved to after
/// redirects. The detail processor needs the final URL to catch listings
/// that silently redirect away from removed products.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub final_url: String,
}

/// Rate-limited HTTP client shared by one pass.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Client honoring a profile's user-agent override and cookie set.
    pub fn for_profile(profile: &SiteProfile, mut config: HttpClientConfig) -> Result<Self> {
        if let Some(agent) = &profile.access_config.user_agent {
            config.user_agent = agent.clone();
        }
        let cookie_header = if profile.access_config.cookies.is_empty() {
            None
        } else {
            Some(
                profile
                    .access_config
                    .cookies
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        Self::build(config, cookie_header)
    }

    fn build(config: HttpClientConfig, cookie_header: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        if let Some(cookie) = cookie_header {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&cookie).context("Invalid cookie value")?,
            );
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.read_timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .pool_max_idle_per_host(100)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self { client, rate_limiter, config })
    }

    /// Fetch a page and capture the post-redirect URL, with cancellation
    /// support at the rate-limit, request, and body-read boundaries.
    pub async fn fetch_page(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedPage> {
        if cancel.is_cancelled() {
            anyhow::bail!("Request cancelled before starting");
        }

        tokio::select! {
            _ = self.rate_limiter.until_ready() => {},
            _ = cancel.cancelled() => anyhow::bail!("Request cancelled during rate limiting"),
        }

        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.with_context(|| format!("Failed to fetch URL: {url}"))?
            },
            _ = cancel.cancelled() => anyhow::bail!("HTTP request cancelled for {url}"),
        };

        if !response.status().is_success() {
            anyhow::bail!("HTTP request failed with status {}: {}", response.status(), url);
        }

        let final_url = response.url().to_string();
        let body = tokio::select! {
            result = response.text() => {
                result.with_context(|| format!("Failed to read response body from: {url}"))?
            },
            _ = cancel.cancelled() => anyhow::bail!("Response reading cancelled for {url}"),
        };

        debug!("Successfully fetched: {} ({} chars)", url, body.len());
        Ok(FetchedPage { body, final_url })
    }

    /// Fetch with exponential backoff. Exhausted retries collapse to `None`
    /// so callers can treat the page as empty (end-of-catalog signal).
    pub async fn fetch_page_with_retries(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Option<FetchedPage> {
        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return None;
            }
            match self.fetch_page(url, cancel).await {
                Ok(page) => return Some(page),
                Err(e) => {
                    if attempt == self.config.max_retries {
                        warn!("Failed to fetch {url} after {} attempts: {e}", attempt + 1);
                        return None;
                    }
                    let backoff = self.config.backoff_base_seconds.pow(attempt + 1);
                    let jitter = fastrand::f64();
                    warn!(
                        "Retry {}/{} for {url}: {e}. Waiting {backoff}s",
                        attempt + 1,
                        self.config.max_retries
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs_f64(backoff as f64 + jitter)) => {},
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }
        None
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let config = HttpClientConfig::default();
        let client = HttpClient::new(config).unwrap();
        assert_eq!(client.config().connect_timeout_seconds, 10);
        assert_eq!(client.config().read_timeout_seconds, 30);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_fetch() {
        let client = HttpClient::new(HttpClientConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.fetch_page("https://example.com", &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn exhausted_retries_yield_none() {
        let config = HttpClientConfig {
            max_retries: 0,
            connect_timeout_seconds: 1,
            read_timeout_seconds: 1,
            ..Default::default()
        };
        let client = HttpClient::new(config).unwrap();
        let cancel = CancellationToken::new();
        // Reserved TEST-NET-1 address: connection cannot succeed.
        let page = client
            .fetch_page_with_retries("http://192.0.2.1/page/1", &cancel)
            .await;
        assert!(page.is_none());
    }
}
