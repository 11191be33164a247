//! Landing page resolution: follow the DOI resolver's redirects and keep
//! the final URL.

use super::{request_log, should_complete, BatchContext, StageRunner};
use async_trait::async_trait;
use collector_common::clients::{was_redirected, Fetcher};
use collector_common::config::{ApiConfig, FailurePolicy};
use collector_common::db::models::{Identifier, UrlType};
use collector_common::{doi, AppError, Result, Stage};
use std::sync::Arc;
use tracing::{instrument, warn};

const SERVICE: &str = "doi_resolver";

pub struct LandingPageRunner {
    fetcher: Arc<dyn Fetcher>,
    resolver_base: String,
    policy: FailurePolicy,
}

impl LandingPageRunner {
    pub fn new(fetcher: Arc<dyn Fetcher>, apis: &ApiConfig, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            resolver_base: apis.doi_resolver_base.trim_end_matches('/').to_string(),
            policy,
        }
    }

    pub fn request_url(&self, doi: &str) -> String {
        format!("{}/{}", self.resolver_base, doi::quote_path(doi))
    }

    /// Only a 2xx response reached through a redirect yields a landing page
    #[instrument(skip(self, ctx), fields(doi = %doi))]
    async fn resolve(&self, ctx: &mut BatchContext<'_>, doi: &str) {
        let request_url = self.request_url(doi);
        let result = self.fetcher.get(&request_url).await;
        ctx.log_request(request_log(doi, &request_url, Stage::LandingPage, &result));

        let outcome = result.and_then(|response| {
            if response.is_success() {
                Ok(response)
            } else {
                Err(AppError::Upstream {
                    service: SERVICE.to_string(),
                    status: Some(response.status),
                    message: "landing page returned an error status".to_string(),
                })
            }
        });

        let success = match outcome {
            Ok(response) => {
                if was_redirected(&request_url, &response.final_url) {
                    ctx.add_url(doi, response.final_url, UrlType::DoiLandingPage);
                } else {
                    ctx.skipped();
                }
                true
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Landing page request failed");
                ctx.failed(&e);
                false
            }
        };

        if should_complete(self.policy, success) {
            ctx.complete(doi);
        }
        ctx.processed();
    }
}

#[async_trait]
impl StageRunner for LandingPageRunner {
    fn stage(&self) -> Stage {
        Stage::LandingPage
    }

    async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()> {
        for identifier in batch {
            self.resolve(ctx, &identifier.doi).await;
        }
        Ok(())
    }
}
