//! Unpaywall open-access lookup, one call per identifier

use super::{request_log, should_complete, BatchContext, StageRunner};
use async_trait::async_trait;
use collector_common::clients::{FetchedResponse, Fetcher};
use collector_common::config::{ApiConfig, FailurePolicy};
use collector_common::db::models::{Identifier, UrlType};
use collector_common::{doi, AppError, Result, Stage};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{instrument, warn};

const SERVICE: &str = "unpaywall";

#[derive(Debug, Default, Deserialize)]
struct UnpaywallResponse {
    doi_url: Option<String>,
    oa_locations: Option<Vec<OaLocation>>,
}

#[derive(Debug, Default, Deserialize)]
struct OaLocation {
    url: Option<String>,
    url_for_pdf: Option<String>,
    url_for_landing_page: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn first_of(locations: &[OaLocation], field: impl Fn(&OaLocation) -> Option<&String>) -> Option<String> {
    locations.iter().find_map(|location| non_empty(field(location)))
}

impl UnpaywallResponse {
    /// Candidate URLs, one per sub-type. Locations are ordered best-first,
    /// so each field takes the first non-empty value.
    fn candidates(&self) -> Vec<(String, UrlType)> {
        let locations = self.oa_locations.as_deref().unwrap_or_default();

        [
            (non_empty(self.doi_url.as_ref()), UrlType::UnpaywallDoiUrl),
            (first_of(locations, |l| l.url.as_ref()), UrlType::UnpaywallUrl),
            (first_of(locations, |l| l.url_for_pdf.as_ref()), UrlType::UnpaywallUrlForPdf),
            (
                first_of(locations, |l| l.url_for_landing_page.as_ref()),
                UrlType::UnpaywallUrlForLandingPage,
            ),
        ]
        .into_iter()
        .filter_map(|(url, url_type)| url.map(|url| (url, url_type)))
        .collect()
    }
}

pub struct UnpaywallRunner {
    fetcher: Arc<dyn Fetcher>,
    base: String,
    email: String,
    policy: FailurePolicy,
}

impl UnpaywallRunner {
    pub fn new(fetcher: Arc<dyn Fetcher>, apis: &ApiConfig, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            base: apis.unpaywall_base.trim_end_matches('/').to_string(),
            email: apis.app_email.clone(),
            policy,
        }
    }

    pub fn request_url(&self, doi: &str) -> String {
        format!(
            "{}/{}?email={}",
            self.base,
            doi::quote_path(doi),
            urlencoding::encode(&self.email)
        )
    }

    fn parse(response: &FetchedResponse) -> Result<UnpaywallResponse> {
        if !response.is_success() {
            return Err(AppError::Upstream {
                service: SERVICE.to_string(),
                status: Some(response.status),
                message: "lookup returned an error status".to_string(),
            });
        }
        serde_json::from_str(&response.body).map_err(|e| AppError::malformed(SERVICE, e.to_string()))
    }

    #[instrument(skip(self, ctx), fields(doi = %doi))]
    async fn lookup(&self, ctx: &mut BatchContext<'_>, doi: &str) {
        let request_url = self.request_url(doi);
        let result = self.fetcher.get(&request_url).await;
        ctx.log_request(request_log(doi, &request_url, Stage::Unpaywall, &result));

        let success = match result.and_then(|response| Self::parse(&response)) {
            Ok(parsed) => {
                let candidates = parsed.candidates();
                if candidates.is_empty() {
                    ctx.skipped();
                }
                for (url, url_type) in candidates {
                    ctx.add_url(doi, url, url_type);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Unpaywall lookup failed");
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
impl StageRunner for UnpaywallRunner {
    fn stage(&self) -> Stage {
        Stage::Unpaywall
    }

    async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()> {
        for identifier in batch {
            self.lookup(ctx, &identifier.doi).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::scheduler::Scheduler;
    use collector_common::clients::MockFetcher;

    fn config() -> ApiConfig {
        ApiConfig {
            app_email: "team@example.org".to_string(),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_request_url() {
        let runner = UnpaywallRunner::new(
            Arc::new(MockFetcher::constant(200, "{}")),
            &config(),
            FailurePolicy::MarkComplete,
        );
        assert_eq!(
            runner.request_url("10.1002/(SICI)1097"),
            "https://api.unpaywall.org/v2/10.1002/%28SICI%291097?email=team%40example.org"
        );
    }

    #[test]
    fn test_candidates_take_first_non_empty() {
        let parsed: UnpaywallResponse = serde_json::from_value(serde_json::json!({
            "doi_url": "https://doi.org/10.1000/a",
            "oa_locations": [
                {"url": "https://repo.org/a", "url_for_pdf": null, "url_for_landing_page": ""},
                {"url": "https://mirror.org/a", "url_for_pdf": "https://mirror.org/a.pdf",
                 "url_for_landing_page": "https://mirror.org/a/landing"}
            ]
        }))
        .unwrap();

        assert_eq!(
            parsed.candidates(),
            vec![
                ("https://doi.org/10.1000/a".to_string(), UrlType::UnpaywallDoiUrl),
                ("https://repo.org/a".to_string(), UrlType::UnpaywallUrl),
                ("https://mirror.org/a.pdf".to_string(), UrlType::UnpaywallUrlForPdf),
                ("https://mirror.org/a/landing".to_string(), UrlType::UnpaywallUrlForLandingPage),
            ]
        );

        let empty: UnpaywallResponse = serde_json::from_value(serde_json::json!({
            "doi_url": null,
            "oa_locations": null
        }))
        .unwrap();
        assert!(empty.candidates().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_stores_sub_typed_urls() {
        let repository = repository_with(&["10.1000/a", "10.1000/b"]).await;
        let fetcher = Arc::new(MockFetcher::new(|url| {
            if url.contains("10.1000/b") {
                return Ok(FetchedResponse::new(404, url, r#"{"error":true,"message":"not found"}"#));
            }
            let body = serde_json::json!({
                "doi_url": "https://doi.org/10.1000/a",
                "oa_locations": [{"url": "https://repo.org/a.pdf", "url_for_pdf": "https://repo.org/a.pdf"}]
            });
            Ok(FetchedResponse::new(200, url, body.to_string()))
        }));
        let runner = UnpaywallRunner::new(fetcher.clone(), &config(), FailurePolicy::MarkComplete);

        let summary = Scheduler::new(repository.clone(), 1000).run(&runner).await.unwrap();
        assert_eq!(fetcher.call_count(), 2);
        // url and url_for_pdf are the same string, so only one is stored
        assert_eq!(summary.outcome.urls_added, 2);
        assert_eq!(summary.outcome.already_present, 1);
        assert_eq!(summary.outcome.failed, 1);
        assert_eq!(summary.outcome.completed, 2);

        let urls = repository.urls_for_identifier("10.1000/a").await.unwrap();
        assert!(urls
            .iter()
            .any(|u| u.url == "https://repo.org/a.pdf" && u.url_type() == UrlType::UnpaywallUrl));

        let logs = repository.request_logs_for_identifier("10.1000/b").await.unwrap();
        assert_eq!(logs[0].response_status, Some(404));
        assert_eq!(logs[0].request_type, "unpaywall");
    }
}
