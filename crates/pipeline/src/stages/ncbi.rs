//! NCBI ID-converter runner
//!
//! One GET covers a whole batch of identifiers. Every identifier in the
//! batch gets its own request log row carrying the shared response body.

use super::{request_log, should_complete, BatchContext, StageRunner};
use async_trait::async_trait;
use collector_common::clients::{FetchedResponse, Fetcher};
use collector_common::config::{ApiConfig, FailurePolicy, NCBI_MAX_IDS};
use collector_common::db::models::{Identifier, UrlType};
use collector_common::{AppError, Result, Stage};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SERVICE: &str = "ncbi";
const PUBMED_BASE: &str = "https://www.ncbi.nlm.nih.gov/pubmed";
const PMC_BASE: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

#[derive(Debug, Deserialize)]
struct ConverterResponse {
    #[serde(default)]
    records: Vec<ConverterRecord>,
}

/// One record of the converter response. `pmid` arrives as a string or a
/// number depending on the API version.
#[derive(Debug, Deserialize)]
struct ConverterRecord {
    doi: Option<String>,
    pmid: Option<Value>,
    pmcid: Option<Value>,
    errmsg: Option<String>,
}

fn id_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn pubmed_url(pmid: &str) -> String {
    format!("{}/{}", PUBMED_BASE, pmid)
}

/// PMC article URL. Accepts `PMC123` or `123`.
pub fn pmc_url(pmcid: &str) -> String {
    let digits = pmcid
        .strip_prefix("PMC")
        .or_else(|| pmcid.strip_prefix("pmc"))
        .unwrap_or(pmcid);
    format!("{}/PMC{}/", PMC_BASE, digits)
}

pub struct NcbiRunner {
    fetcher: Arc<dyn Fetcher>,
    base: String,
    tool: String,
    email: String,
    capacity: usize,
    policy: FailurePolicy,
}

impl NcbiRunner {
    pub fn new(fetcher: Arc<dyn Fetcher>, apis: &ApiConfig, capacity: usize, policy: FailurePolicy) -> Self {
        Self {
            fetcher,
            base: apis.ncbi_idconv_base.clone(),
            tool: apis.ncbi_tool.clone(),
            email: apis.app_email.clone(),
            capacity: capacity.clamp(1, NCBI_MAX_IDS),
            policy,
        }
    }

    pub fn request_url(&self, dois: &[&str]) -> String {
        format!(
            "{}?ids={}&tool={}&email={}&idtype=doi&versions=no&format=json",
            self.base,
            urlencoding::encode(&dois.join(",")),
            urlencoding::encode(&self.tool),
            urlencoding::encode(&self.email),
        )
    }

    fn parse(response: &FetchedResponse) -> Result<ConverterResponse> {
        if !response.is_success() {
            return Err(AppError::Upstream {
                service: SERVICE.to_string(),
                status: Some(response.status),
                message: "ID converter returned an error status".to_string(),
            });
        }
        serde_json::from_str(&response.body).map_err(|e| AppError::malformed(SERVICE, e.to_string()))
    }

    /// Derive PubMed and PMC URLs for the identifiers in the batch
    fn apply(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier], parsed: ConverterResponse) {
        let requested: HashMap<String, &str> = batch
            .iter()
            .map(|identifier| (identifier.doi.to_lowercase(), identifier.doi.as_str()))
            .collect();

        for record in parsed.records {
            let Some(doi) = record
                .doi
                .as_deref()
                .and_then(|d| requested.get(&d.to_lowercase()).copied())
            else {
                debug!(doi = ?record.doi, "Converter record for an identifier outside the batch");
                continue;
            };

            if let Some(errmsg) = &record.errmsg {
                debug!(doi = %doi, errmsg = %errmsg, "No PubMed mapping");
            }

            let pm_id = id_text(record.pmid.as_ref());
            let pmc_id = id_text(record.pmcid.as_ref());

            if let Some(pmid) = &pm_id {
                ctx.add_url(doi, pubmed_url(pmid), UrlType::Pubmed);
                ctx.flag(doi, Stage::Pubmed);
            }
            if let Some(pmcid) = &pmc_id {
                ctx.add_url(doi, pmc_url(pmcid), UrlType::PubmedCentral);
                ctx.flag(doi, Stage::PubmedCentral);
            }
            if pm_id.is_none() && pmc_id.is_none() {
                ctx.skipped();
            }
            ctx.set_pubmed_ids(doi, pm_id, pmc_id);
        }
    }
}

#[async_trait]
impl StageRunner for NcbiRunner {
    fn stage(&self) -> Stage {
        Stage::Ncbi
    }

    fn batch_capacity(&self) -> usize {
        self.capacity
    }

    #[instrument(skip(self, ctx, batch), fields(batch = batch.len()))]
    async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let dois: Vec<&str> = batch.iter().map(|identifier| identifier.doi.as_str()).collect();
        let request_url = self.request_url(&dois);
        let result = self.fetcher.get(&request_url).await;

        for identifier in batch {
            ctx.log_request(request_log(&identifier.doi, &request_url, Stage::Ncbi, &result));
        }

        let parsed = result.and_then(|response| Self::parse(&response));
        let success = match parsed {
            Ok(parsed) => {
                self.apply(ctx, batch, parsed);
                true
            }
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), batch = batch.len(), "ID converter call failed");
                for _ in batch {
                    ctx.failed(&e);
                }
                false
            }
        };

        for identifier in batch {
            if should_complete(self.policy, success) {
                ctx.complete(&identifier.doi);
            }
            ctx.processed();
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

    fn runner(fetcher: Arc<MockFetcher>, policy: FailurePolicy) -> NcbiRunner {
        NcbiRunner::new(fetcher, &ApiConfig::default(), 200, policy)
    }

    #[test]
    fn test_pubmed_urls() {
        assert_eq!(pubmed_url("26535800"), "https://www.ncbi.nlm.nih.gov/pubmed/26535800");
        assert_eq!(pmc_url("PMC4631542"), "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC4631542/");
        assert_eq!(pmc_url("4631542"), "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC4631542/");
    }

    #[test]
    fn test_id_text() {
        assert_eq!(id_text(Some(&serde_json::json!("123"))), Some("123".to_string()));
        assert_eq!(id_text(Some(&serde_json::json!(123))), Some("123".to_string()));
        assert_eq!(id_text(Some(&serde_json::json!(""))), None);
        assert_eq!(id_text(None), None);
    }

    #[test]
    fn test_request_url() {
        let runner = runner(Arc::new(MockFetcher::constant(200, "{}")), FailurePolicy::MarkComplete);
        let url = runner.request_url(&["10.1000/a", "10.1000/b"]);
        assert!(url.starts_with("https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/?ids=10.1000%2Fa%2C10.1000%2Fb"));
        assert!(url.contains("&tool=collector"));
        assert!(url.ends_with("&idtype=doi&versions=no&format=json"));
    }

    #[test]
    fn test_capacity_is_clamped_to_converter_limit() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(MockFetcher::constant(200, "{}"));
        let apis = ApiConfig::default();
        let oversized = NcbiRunner::new(fetcher.clone(), &apis, 500, FailurePolicy::MarkComplete);
        assert_eq!(oversized.batch_capacity(), NCBI_MAX_IDS);
        let empty = NcbiRunner::new(fetcher, &apis, 0, FailurePolicy::MarkComplete);
        assert_eq!(empty.batch_capacity(), 1);
    }

    #[tokio::test]
    async fn test_batch_boundary() {
        let dois: Vec<String> = (0..250).map(|i| format!("10.1000/{}", i)).collect();
        let refs: Vec<&str> = dois.iter().map(String::as_str).collect();
        let repository = repository_with(&refs).await;
        let fetcher = Arc::new(MockFetcher::constant(200, r#"{"status":"ok","records":[]}"#));

        let summary = Scheduler::new(repository.clone(), 1000)
            .run(&runner(fetcher.clone(), FailurePolicy::MarkComplete))
            .await
            .unwrap();

        assert_eq!(fetcher.call_count(), 2);
        assert_eq!(summary.outcome.requests_logged, 250);
        assert_eq!(summary.outcome.completed, 250);
        assert_eq!(repository.counts().await.unwrap().request_logs, 250);

        let logs = repository.request_logs_for_identifier("10.1000/249").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].request_url, fetcher.calls()[1]);
        assert_eq!(logs[0].request_type, "ncbi");
        assert!(pending(&repository, Stage::Ncbi).await.is_empty());
    }

    #[tokio::test]
    async fn test_records_become_pubmed_urls() {
        let repository = repository_with(&["10.1371/journal.pone.0141854", "10.1000/none"]).await;
        let body = serde_json::json!({
            "status": "ok",
            "records": [
                {"doi": "10.1371/JOURNAL.PONE.0141854", "pmid": 26535800, "pmcid": "PMC4631542"},
                {"doi": "10.1000/none", "status": "error", "errmsg": "invalid article id"},
                {"doi": "10.9999/stranger", "pmid": "1"}
            ]
        });
        let fetcher = Arc::new(MockFetcher::constant(200, body.to_string()));

        let summary = Scheduler::new(repository.clone(), 1000)
            .run(&runner(fetcher, FailurePolicy::MarkComplete))
            .await
            .unwrap();
        assert_eq!(summary.outcome.urls_added, 2);
        assert_eq!(summary.outcome.skipped, 1);

        let identifier = repository.get_identifier("10.1371/journal.pone.0141854").await.unwrap();
        assert_eq!(identifier.pm_id.as_deref(), Some("26535800"));
        assert_eq!(identifier.pmc_id.as_deref(), Some("PMC4631542"));
        assert!(identifier.is_completed(Stage::Ncbi));
        assert!(identifier.is_completed(Stage::Pubmed));
        assert!(identifier.is_completed(Stage::PubmedCentral));

        let mut types: Vec<UrlType> = repository
            .urls_for_identifier("10.1371/journal.pone.0141854")
            .await
            .unwrap()
            .iter()
            .map(|u| u.url_type())
            .collect();
        types.sort_by_key(|t| t.as_str());
        assert_eq!(types, vec![UrlType::Pubmed, UrlType::PubmedCentral]);

        let none = repository.get_identifier("10.1000/none").await.unwrap();
        assert!(none.is_completed(Stage::Ncbi));
        assert!(!none.is_completed(Stage::Pubmed));
        assert_eq!(repository.counts().await.unwrap().urls, 2);
    }

    #[tokio::test]
    async fn test_malformed_body_with_retry_policy() {
        let repository = repository_with(&["10.1000/a", "10.1000/b"]).await;
        let fetcher = Arc::new(MockFetcher::constant(200, "<html>maintenance</html>"));

        let summary = Scheduler::new(repository.clone(), 1000)
            .run(&runner(fetcher.clone(), FailurePolicy::Retry))
            .await
            .unwrap();

        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(summary.outcome.failed, 2);
        assert_eq!(summary.outcome.completed, 0);
        assert_eq!(summary.outcome.requests_logged, 2);
        assert_eq!(pending(&repository, Stage::Ncbi).await.len(), 2);
    }
}
