//! External HTTP collaborators
//!
//! Provides:
//! - `Fetcher`: plain GET used by the enrichment runners
//! - `GraphApi`: token exchange and bulk engagement lookup
//! - reqwest-backed implementations with outbound rate limiting
//! - in-process mocks that record every call

pub mod graph;

pub use graph::{FacebookGraph, GraphApi, MockGraphApi};

use crate::config::{ApiConfig, RateLimitConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Token-bucket limiter shared by every outbound call of one client
pub type GlobalRateLimiter = DefaultDirectRateLimiter;

/// Create a new per-second rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<Arc<GlobalRateLimiter>> {
    let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.requests_per_second must be greater than zero".to_string(),
    })?;
    let burst = NonZeroU32::new(burst).ok_or_else(|| AppError::Configuration {
        message: "rate_limit.burst must be greater than zero".to_string(),
    })?;

    Ok(Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))))
}

/// Create a limiter allowing `calls_per_hour` calls per hour
pub fn create_hourly_limiter(calls_per_hour: u32) -> Result<Arc<GlobalRateLimiter>> {
    let quota = NonZeroU32::new(calls_per_hour).ok_or_else(|| AppError::Configuration {
        message: "hourly rate limit must be greater than zero".to_string(),
    })?;

    Ok(Arc::new(RateLimiter::direct(Quota::per_hour(quota))))
}

/// Response of one GET, after redirects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    pub status: u16,
    /// URL of the final response once redirects were followed
    pub final_url: String,
    pub body: String,
}

impl FetchedResponse {
    pub fn new(status: u16, final_url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            final_url: final_url.into(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON
    pub fn json(&self, service: &str) -> Result<serde_json::Value> {
        serde_json::from_str(&self.body).map_err(|e| AppError::malformed(service, e.to_string()))
    }
}

/// Outbound GET. A non-2xx status is a successful fetch; only transport
/// failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedResponse>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Option<Arc<GlobalRateLimiter>>,
}

impl HttpFetcher {
    /// Create a fetcher from configuration
    pub fn new(apis: &ApiConfig, rate_limit: &RateLimitConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(apis.request_timeout_secs))
            .user_agent(apis.user_agent.clone())
            .build()?;

        let limiter = if rate_limit.enabled {
            Some(create_rate_limiter(rate_limit.requests_per_second, rate_limit.burst)?)
        } else {
            None
        };

        Ok(Self { client, limiter })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let host = host_of(url);
        let start = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_external_request(&host, "error", start.elapsed().as_secs_f64());
                tracing::warn!(url = url, error = %e, "Request failed");
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        let outcome = if (200..300).contains(&status) { "success" } else { "http_error" };
        metrics::record_external_request(&host, outcome, start.elapsed().as_secs_f64());

        Ok(FetchedResponse::new(status, final_url, body))
    }
}

/// Whether the response came from a different URL than the one requested.
/// Both sides are parsed, so the client's own percent-encoding of the
/// request does not count as a redirect.
pub fn was_redirected(request_url: &str, final_url: &str) -> bool {
    match (reqwest::Url::parse(request_url), reqwest::Url::parse(final_url)) {
        (Ok(requested), Ok(fetched)) => requested != fetched,
        _ => request_url != final_url,
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

type Handler = Box<dyn Fn(&str) -> Result<FetchedResponse> + Send + Sync>;

/// Mock fetcher for testing: answers with a closure and records every URL
pub struct MockFetcher {
    handler: Handler,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<FetchedResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every request with the same status and body, no redirect
    pub fn constant(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self::new(move |url| Ok(FetchedResponse::new(status, url, body.clone())))
    }

    /// Fail every request as a transport error
    pub fn unreachable() -> Self {
        Self::new(|_| {
            Err(AppError::Upstream {
                service: "mock".to_string(),
                status: None,
                message: "connection refused".to_string(),
            })
        })
    }

    /// URLs requested so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());
        (self.handler)(url)
    }
}
