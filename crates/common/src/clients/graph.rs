//! Facebook Graph API client for URL engagement counters

use super::{create_hourly_limiter, FetchedResponse, GlobalRateLimiter};
use crate::config::{ApiConfig, FacebookConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SERVICE: &str = "graph";

/// Social-engagement lookup keyed by URL
#[async_trait]
pub trait GraphApi: Send + Sync {
    /// Exchange app credentials for an access token
    async fn access_token(&self) -> Result<String>;

    /// Look up engagement for a batch of URLs in one call
    async fn engagement(&self, token: &str, urls: &[String]) -> Result<FetchedResponse>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Graph API over reqwest
pub struct FacebookGraph {
    client: reqwest::Client,
    config: FacebookConfig,
    limiter: Arc<GlobalRateLimiter>,
}

impl FacebookGraph {
    pub fn new(config: &FacebookConfig, apis: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(apis.request_timeout_secs))
            .user_agent(apis.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            limiter: create_hourly_limiter(config.hourly_rate_limit)?,
            config: config.clone(),
        })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (&self.config.app_id, &self.config.app_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Ok((id.as_str(), secret.as_str()))
            }
            _ => Err(AppError::Configuration {
                message: "facebook.app_id and facebook.app_secret are required".to_string(),
            }),
        }
    }
}

#[async_trait]
impl GraphApi for FacebookGraph {
    async fn access_token(&self) -> Result<String> {
        let (app_id, app_secret) = self.credentials()?;
        let url = format!("{}/oauth/access_token", self.config.graph_base.trim_end_matches('/'));

        self.limiter.until_ready().await;
        let response = self
            .client
            .post(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", app_id),
                ("client_secret", app_secret),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(AppError::Upstream {
                service: SERVICE.to_string(),
                status: Some(status),
                message: body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::malformed(SERVICE, e.to_string()))?;
        Ok(token.access_token)
    }

    async fn engagement(&self, token: &str, urls: &[String]) -> Result<FetchedResponse> {
        let url = format!(
            "{}/v{}/",
            self.config.graph_base.trim_end_matches('/'),
            self.config.api_version
        );
        let ids = urls.join(",");

        self.limiter.until_ready().await;
        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", ids.as_str()),
                ("fields", "engagement,og_object"),
                ("access_token", token),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                metrics::record_external_request(SERVICE, "error", start.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        let outcome = if (200..300).contains(&status) { "success" } else { "http_error" };
        metrics::record_external_request(SERVICE, outcome, start.elapsed().as_secs_f64());

        Ok(FetchedResponse::new(status, final_url, body))
    }
}

type EngagementHandler = Box<dyn Fn(&[String]) -> Result<FetchedResponse> + Send + Sync>;

/// Mock graph API for testing
pub struct MockGraphApi {
    token: Option<String>,
    handler: EngagementHandler,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockGraphApi {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Result<FetchedResponse> + Send + Sync + 'static,
    {
        Self {
            token: Some("mock-token".to_string()),
            handler: Box::new(handler),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Report the same counters for every requested URL
    pub fn uniform(reactions: i64, shares: i64, comments: i64, plugin_comments: i64) -> Self {
        Self::new(move |urls| {
            let body: serde_json::Map<String, serde_json::Value> = urls
                .iter()
                .map(|url| {
                    (
                        url.clone(),
                        serde_json::json!({
                            "id": url,
                            "engagement": {
                                "reaction_count": reactions,
                                "share_count": shares,
                                "comment_count": comments,
                                "comment_plugin_count": plugin_comments,
                            }
                        }),
                    )
                })
                .collect();
            Ok(FetchedResponse::new(200, "mock://graph", serde_json::Value::Object(body).to_string()))
        })
    }

    /// Fail the token exchange
    pub fn without_token(mut self) -> Self {
        self.token = None;
        self
    }

    /// URL batches requested so far
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl GraphApi for MockGraphApi {
    async fn access_token(&self) -> Result<String> {
        self.token.clone().ok_or_else(|| AppError::Upstream {
            service: SERVICE.to_string(),
            status: Some(400),
            message: "invalid client credentials".to_string(),
        })
    }

    async fn engagement(&self, _token: &str, urls: &[String]) -> Result<FetchedResponse> {
        self.batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(urls.to_vec());
        (self.handler)(urls)
    }
}
