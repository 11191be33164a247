//! Enrichment stage runners
//!
//! Each runner handles one enrichment source behind the same interface.
//! Runners never write to storage directly: they record URLs, request
//! logs and completion flags in a `BatchContext`, which the scheduler
//! persists in one transaction per chunk.

mod canonical;
mod landing_page;
mod ncbi;
mod unpaywall;

pub use canonical::{CanonicalForm, CanonicalRunner};
pub use landing_page::LandingPageRunner;
pub use ncbi::NcbiRunner;
pub use unpaywall::UnpaywallRunner;

use crate::dedup::DedupIndex;
use async_trait::async_trait;
use collector_common::clients::{FetchedResponse, Fetcher};
use collector_common::config::{AppConfig, FailurePolicy};
use collector_common::db::models::{Identifier, UrlType};
use collector_common::db::{NewRequestLog, NewUrl};
use collector_common::errors::ErrorKind;
use collector_common::{metrics, AppError, Repository, Result, Stage, StageSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::debug;

/// Failed identifiers by error kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub validation: u64,
    pub transient: u64,
    pub constraint: u64,
    pub fatal: u64,
}

impl FailureCounts {
    pub fn record(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Validation => self.validation += 1,
            ErrorKind::Transient => self.transient += 1,
            ErrorKind::Constraint => self.constraint += 1,
            ErrorKind::Fatal => self.fatal += 1,
        }
    }
}

impl AddAssign for FailureCounts {
    fn add_assign(&mut self, other: Self) {
        self.validation += other.validation;
        self.transient += other.transient;
        self.constraint += other.constraint;
        self.fatal += other.fatal;
    }
}

/// Counts produced by one batch (or, summed, by one stage run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Identifiers handled
    pub processed: u64,
    /// URLs inserted
    pub urls_added: u64,
    /// Candidate URLs that already existed
    pub already_present: u64,
    /// Identifiers that produced no candidate
    pub skipped: u64,
    /// Identifiers whose external call failed
    pub failed: u64,
    /// `failed`, split by error kind
    pub failures: FailureCounts,
    /// Request log rows written
    pub requests_logged: u64,
    /// Identifiers whose stage flag was set
    pub completed: u64,
}

impl AddAssign for BatchOutcome {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.urls_added += other.urls_added;
        self.already_present += other.already_present;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.failures += other.failures;
        self.requests_logged += other.requests_logged;
        self.completed += other.completed;
    }
}

/// Writes staged by a runner for one chunk of identifiers
pub struct BatchContext<'a> {
    stage: Stage,
    index: &'a mut DedupIndex,
    urls: Vec<NewUrl>,
    logs: Vec<NewRequestLog>,
    flags: BTreeMap<String, StageSet>,
    pubmed_ids: Vec<(String, Option<String>, Option<String>)>,
    outcome: BatchOutcome,
}

impl<'a> BatchContext<'a> {
    pub fn new(stage: Stage, index: &'a mut DedupIndex) -> Self {
        Self {
            stage,
            index,
            urls: Vec::new(),
            logs: Vec::new(),
            flags: BTreeMap::new(),
            pubmed_ids: Vec::new(),
            outcome: BatchOutcome::default(),
        }
    }

    /// Stage a candidate URL. Returns false if the URL is already known.
    pub fn add_url(&mut self, doi: &str, url: String, url_type: UrlType) -> bool {
        if !self.index.register(&url) {
            self.outcome.already_present += 1;
            return false;
        }
        self.urls.push(NewUrl {
            url,
            doi: doi.to_string(),
            url_type,
        });
        true
    }

    pub fn log_request(&mut self, log: NewRequestLog) {
        self.logs.push(log);
    }

    /// Set this runner's flag for the identifier
    pub fn complete(&mut self, doi: &str) {
        self.flag(doi, self.stage);
    }

    /// Set another stage's flag as a side effect (PubMed flags from NCBI)
    pub fn flag(&mut self, doi: &str, stage: Stage) {
        self.flags.entry(doi.to_string()).or_default().insert(stage);
    }

    pub fn set_pubmed_ids(&mut self, doi: &str, pm_id: Option<String>, pmc_id: Option<String>) {
        if pm_id.is_some() || pmc_id.is_some() {
            self.pubmed_ids.push((doi.to_string(), pm_id, pmc_id));
        }
    }

    pub fn processed(&mut self) {
        self.outcome.processed += 1;
    }

    pub fn skipped(&mut self) {
        self.outcome.skipped += 1;
    }

    /// Count a failed identifier under its error kind
    pub fn failed(&mut self, error: &AppError) {
        self.outcome.failed += 1;
        self.outcome.failures.record(error.kind());
    }

    /// Persist everything staged in one transaction. Staged index keys are
    /// kept on commit and discarded on failure.
    pub async fn commit(self, repository: &Repository) -> Result<BatchOutcome> {
        let BatchContext {
            stage,
            index,
            urls,
            logs,
            flags,
            pubmed_ids,
            mut outcome,
        } = self;

        let staged_urls = urls.len() as u64;

        let write = async {
            let txn = repository.begin().await?;
            let urls_added = repository.insert_urls(&txn, urls).await?;
            let logged = repository.insert_request_logs(&txn, logs).await?;

            for (doi, pm_id, pmc_id) in pubmed_ids {
                repository.set_pubmed_ids(&txn, &doi, pm_id, pmc_id).await?;
            }

            // Group identifiers by flag set so each distinct set is one update
            let mut by_flags: BTreeMap<i32, Vec<String>> = BTreeMap::new();
            for (doi, set) in flags {
                by_flags.entry(set.bits()).or_default().push(doi);
            }
            let mut completed = 0;
            for (bits, dois) in by_flags {
                let set = StageSet::from_bits(bits);
                repository.mark_completed(&txn, &dois, set).await?;
                if set.contains(stage) {
                    completed += dois.len() as u64;
                }
            }

            txn.commit().await?;
            Ok::<_, collector_common::AppError>((urls_added, logged, completed))
        }
        .await;

        match write {
            Ok((urls_added, logged, completed)) => {
                index.commit();
                outcome.urls_added = urls_added;
                outcome.already_present += staged_urls - urls_added;
                outcome.requests_logged = logged;
                outcome.completed = completed;
                metrics::record_urls_added(stage.as_str(), urls_added);
                debug!(stage = %stage, outcome = ?outcome, "Batch committed");
                Ok(outcome)
            }
            Err(e) => {
                index.rollback();
                Err(e)
            }
        }
    }

    /// Drop everything staged without writing
    pub fn abandon(self) {
        self.index.rollback();
    }
}

/// One enrichment source
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Stage whose flag this runner sets
    fn stage(&self) -> Stage;

    /// Identifiers handled per external call (1 for per-item APIs)
    fn batch_capacity(&self) -> usize {
        1
    }

    /// Handle up to `batch_capacity` identifiers. Failed external calls are
    /// recorded in the context; an `Err` aborts the stage.
    async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()>;
}

/// Whether a stage flag is set after an attempt
pub fn should_complete(policy: FailurePolicy, success: bool) -> bool {
    match policy {
        FailurePolicy::MarkComplete => true,
        FailurePolicy::Retry => success,
    }
}

/// Request log row for one attempt. Without a response, the status is null
/// and the body holds the error.
pub fn request_log(
    doi: &str,
    request_url: &str,
    stage: Stage,
    result: &Result<FetchedResponse>,
) -> NewRequestLog {
    let (response_content, response_status) = match result {
        Ok(response) => (Some(response.body.clone()), Some(response.status)),
        Err(e) => (Some(e.to_string()), None),
    };

    NewRequestLog {
        doi: doi.to_string(),
        request_url: request_url.to_string(),
        request_type: stage.as_str().to_string(),
        response_content,
        response_status,
    }
}

/// Build the runner for a stage. `Pubmed` and `PubmedCentral` have no
/// runner of their own.
pub fn build_runner(stage: Stage, fetcher: Arc<dyn Fetcher>, config: &AppConfig) -> Option<Box<dyn StageRunner>> {
    let policy = config.pipeline.failure_policy;
    match stage {
        Stage::DoiNew => Some(Box::new(CanonicalRunner::new(CanonicalForm::New, &config.apis))),
        Stage::DoiOld => Some(Box::new(CanonicalRunner::new(CanonicalForm::Old, &config.apis))),
        Stage::LandingPage => Some(Box::new(LandingPageRunner::new(fetcher, &config.apis, policy))),
        Stage::Ncbi => Some(Box::new(NcbiRunner::new(
            fetcher,
            &config.apis,
            config.pipeline.ncbi_batch_size,
            policy,
        ))),
        Stage::Unpaywall => Some(Box::new(UnpaywallRunner::new(fetcher, &config.apis, policy))),
        Stage::Pubmed | Stage::PubmedCentral => None,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use collector_common::AppError;

    #[test]
    fn test_should_complete() {
        assert!(should_complete(FailurePolicy::MarkComplete, false));
        assert!(should_complete(FailurePolicy::Retry, true));
        assert!(!should_complete(FailurePolicy::Retry, false));
    }

    #[test]
    fn test_request_log_without_response() {
        let result: Result<FetchedResponse> = Err(AppError::Upstream {
            service: "unpaywall".into(),
            status: None,
            message: "timed out".into(),
        });
        let log = request_log("10.1000/a", "https://api.unpaywall.org/v2/10.1000/a", Stage::Unpaywall, &result);
        assert_eq!(log.response_status, None);
        assert_eq!(log.request_type, "unpaywall");
        assert!(log.response_content.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_context_commit_persists_and_dedups() {
        let repository = repository_with(&["10.1000/a", "10.1000/b"]).await;
        let mut index = DedupIndex::load(&repository).await.unwrap();

        let mut ctx = BatchContext::new(Stage::Ncbi, &mut index);
        assert!(ctx.add_url("10.1000/a", "https://www.ncbi.nlm.nih.gov/pubmed/1".into(), UrlType::Pubmed));
        assert!(!ctx.add_url("10.1000/b", "https://www.ncbi.nlm.nih.gov/pubmed/1".into(), UrlType::Pubmed));
        ctx.complete("10.1000/a");
        ctx.flag("10.1000/a", Stage::Pubmed);
        ctx.complete("10.1000/b");
        let outcome = ctx.commit(&repository).await.unwrap();

        assert_eq!(outcome.urls_added, 1);
        assert_eq!(outcome.already_present, 1);
        assert_eq!(outcome.completed, 2);
        assert!(index.contains_url("https://www.ncbi.nlm.nih.gov/pubmed/1"));

        let a = repository.get_identifier("10.1000/a").await.unwrap();
        assert!(a.is_completed(Stage::Ncbi) && a.is_completed(Stage::Pubmed));
        let b = repository.get_identifier("10.1000/b").await.unwrap();
        assert!(b.is_completed(Stage::Ncbi) && !b.is_completed(Stage::Pubmed));
    }

    #[tokio::test]
    async fn test_abandon_rolls_back_index() {
        let repository = repository_with(&["10.1000/a"]).await;
        let mut index = DedupIndex::load(&repository).await.unwrap();

        let mut ctx = BatchContext::new(Stage::DoiNew, &mut index);
        ctx.add_url("10.1000/a", "https://doi.org/10.1000/a".into(), UrlType::DoiNew);
        ctx.abandon();

        assert!(!index.contains_url("https://doi.org/10.1000/a"));
        assert!(pending(&repository, Stage::DoiNew).await.len() == 1);
    }
}
