//! Batch scheduler: drives a stage runner over pending identifiers in
//! chunks, one storage transaction per chunk.

use crate::dedup::DedupIndex;
use crate::stages::{build_runner, BatchContext, BatchOutcome, StageRunner};
use collector_common::db::models::Identifier;
use collector_common::metrics::StageMetrics;
use collector_common::stage::RUNNER_STAGES;
use collector_common::{AppConfig, Fetcher, Repository, Result, Stage};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Aggregate result of one stage run
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    /// Identifiers pending when the run started
    pub pending: usize,
    /// Chunks committed
    pub batches: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

/// Runs a stage over every identifier whose flag is unset. Completed chunks
/// stay committed if a later chunk fails, so a rerun resumes where the
/// previous one stopped.
pub struct Scheduler {
    repository: Repository,
    batch_size: usize,
}

impl Scheduler {
    pub fn new(repository: Repository, batch_size: usize) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
        }
    }

    /// Load pending identifiers and the dedup index, then run the stage
    pub async fn run(&self, runner: &dyn StageRunner) -> Result<StageSummary> {
        let pending = self.repository.pending_identifiers(runner.stage()).await?;
        let mut index = DedupIndex::load(&self.repository).await?;
        self.run_stage(runner, &pending, &mut index).await
    }

    /// Split `identifiers` into chunks of `batch_size`, hand each chunk to
    /// the runner in groups of its batch capacity, and commit per chunk.
    #[instrument(skip(self, runner, identifiers, index), fields(stage = %runner.stage(), pending = identifiers.len()))]
    pub async fn run_stage(
        &self,
        runner: &dyn StageRunner,
        identifiers: &[Identifier],
        index: &mut DedupIndex,
    ) -> Result<StageSummary> {
        let stage = runner.stage();
        let metrics = StageMetrics::start(stage.as_str());
        let capacity = runner.batch_capacity().max(1);

        let mut summary = StageSummary {
            stage,
            pending: identifiers.len(),
            batches: 0,
            outcome: BatchOutcome::default(),
        };

        for chunk in identifiers.chunks(self.batch_size) {
            let mut ctx = BatchContext::new(stage, index);
            for group in chunk.chunks(capacity) {
                if let Err(e) = runner.run_batch(&mut ctx, group).await {
                    error!(error = %e, "Stage aborted");
                    ctx.abandon();
                    return Err(e);
                }
            }

            let outcome = ctx.commit(&self.repository).await?;
            summary.batches += 1;
            summary.outcome += outcome;
            info!(
                batch = summary.batches,
                processed = summary.outcome.processed,
                urls_added = summary.outcome.urls_added,
                "Chunk committed"
            );
        }

        metrics.finish(summary.outcome.processed);
        info!(
            added = summary.outcome.urls_added,
            already_present = summary.outcome.already_present,
            skipped = summary.outcome.skipped,
            failed = summary.outcome.failed,
            "Stage complete"
        );

        Ok(summary)
    }
}

/// Stage runners wired from configuration
pub struct Pipeline {
    config: AppConfig,
    fetcher: Arc<dyn Fetcher>,
    scheduler: Scheduler,
}

impl Pipeline {
    pub fn new(config: AppConfig, fetcher: Arc<dyn Fetcher>, repository: Repository) -> Self {
        let scheduler = Scheduler::new(repository, config.pipeline.batch_size);
        Self {
            config,
            fetcher,
            scheduler,
        }
    }

    /// Run one stage. `None` for stages that are only set as a side effect
    /// of another runner.
    pub async fn run(&self, stage: Stage) -> Result<Option<StageSummary>> {
        let Some(runner) = build_runner(stage, self.fetcher.clone(), &self.config) else {
            return Ok(None);
        };
        self.scheduler.run(runner.as_ref()).await.map(Some)
    }

    /// Run every stage that has a runner, in pipeline order
    pub async fn enrich_all(&self) -> Result<Vec<StageSummary>> {
        let mut summaries = Vec::with_capacity(RUNNER_STAGES.len());
        for stage in RUNNER_STAGES {
            if let Some(summary) = self.run(stage).await? {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::*;
    use crate::stages::{CanonicalForm, CanonicalRunner, LandingPageRunner, NcbiRunner, UnpaywallRunner};
    use async_trait::async_trait;
    use collector_common::clients::{FetchedResponse, MockFetcher};
    use collector_common::config::{ApiConfig, FailurePolicy};
    use collector_common::db::models::UrlType;
    use collector_common::AppError;

    #[tokio::test]
    async fn test_doi_new_is_idempotent() {
        let repository = repository_with(&["10.1000/a", "10.1000/b", "10.1000/c"]).await;
        let runner = CanonicalRunner::new(CanonicalForm::New, &ApiConfig::default());
        let scheduler = Scheduler::new(repository.clone(), 2);

        let first = scheduler.run(&runner).await.unwrap();
        assert_eq!(first.pending, 3);
        assert_eq!(first.batches, 2);
        assert_eq!(first.outcome.urls_added, 3);
        assert_eq!(first.outcome.completed, 3);

        let second = scheduler.run(&runner).await.unwrap();
        assert_eq!(second.pending, 0);
        assert_eq!(second.outcome.urls_added, 0);
        assert_eq!(repository.counts().await.unwrap().urls, 3);

        let urls = repository.urls_for_identifier("10.1000/b").await.unwrap();
        assert_eq!(urls[0].url, "https://doi.org/10.1000/b");
        assert_eq!(urls[0].url_type(), UrlType::DoiNew);
    }

    #[tokio::test]
    async fn test_ingest_then_canonical_new() {
        use crate::ingest::Ingestor;
        use crate::source::{ImportSource, RawRecord};
        use collector_common::DbPool;

        let repository = Repository::new(DbPool::in_memory().await.unwrap());
        let record = RawRecord {
            doi: Some("10.1371/journal.pone.0141854".to_string()),
            date: Some("2015-10-29".to_string()),
            ..RawRecord::default()
        };
        let source = ImportSource::File("seed.csv".into());
        Ingestor::new(repository.clone(), 1000)
            .ingest(&source, vec![record])
            .await
            .unwrap();

        let identifier = repository.get_identifier("10.1371/journal.pone.0141854").await.unwrap();
        assert!(identifier.stages().is_empty());

        let runner = CanonicalRunner::new(CanonicalForm::New, &ApiConfig::default());
        let scheduler = Scheduler::new(repository.clone(), 1000);
        let first = scheduler.run(&runner).await.unwrap();
        assert_eq!(first.outcome.urls_added, 1);

        let urls = repository.all_urls().await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://doi.org/10.1371/journal.pone.0141854");
        let identifier = repository.get_identifier("10.1371/journal.pone.0141854").await.unwrap();
        assert!(identifier.is_completed(Stage::DoiNew));

        let second = scheduler.run(&runner).await.unwrap();
        assert_eq!(second.outcome.urls_added, 0);
        assert_eq!(repository.all_urls().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_external_stages_rerun_adds_nothing() {
        let repository = repository_with(&["10.1000/a", "10.1000/b"]).await;
        let fetcher = Arc::new(MockFetcher::new(|url| {
            let body = if url.contains("/idconv/") {
                serde_json::json!({"records": [
                    {"doi": "10.1000/a", "pmid": "26535800", "pmcid": "PMC4631542"},
                    {"doi": "10.1000/b", "errmsg": "invalid article id"}
                ]})
            } else {
                let slug = if url.contains("10.1000/a") { "a" } else { "b" };
                serde_json::json!({"oa_locations": [{"url_for_pdf": format!("https://repo.org/{}.pdf", slug)}]})
            };
            Ok(FetchedResponse::new(200, url, body.to_string()))
        }));
        let apis = ApiConfig::default();
        let runners: Vec<Box<dyn StageRunner>> = vec![
            Box::new(NcbiRunner::new(fetcher.clone(), &apis, 200, FailurePolicy::Retry)),
            Box::new(UnpaywallRunner::new(fetcher.clone(), &apis, FailurePolicy::Retry)),
        ];
        let scheduler = Scheduler::new(repository.clone(), 1000);

        for runner in &runners {
            let first = scheduler.run(runner.as_ref()).await.unwrap();
            assert_eq!(first.outcome.requests_logged, 2);
            assert_eq!(first.outcome.completed, 2);

            let before = repository.counts().await.unwrap();
            let calls = fetcher.call_count();
            let second = scheduler.run(runner.as_ref()).await.unwrap();

            assert_eq!(second.pending, 0);
            assert_eq!(second.outcome.requests_logged, 0);
            assert_eq!(second.outcome.urls_added, 0);
            assert_eq!(fetcher.call_count(), calls);
            assert_eq!(repository.counts().await.unwrap(), before);
        }

        let counts = repository.counts().await.unwrap();
        assert_eq!(counts.urls, 4);
        assert_eq!(counts.request_logs, 4);
    }

    #[tokio::test]
    async fn test_existing_url_counts_as_present() {
        let repository = repository_with(&["10.1000/a"]).await;
        let mut index = DedupIndex::from_keys(Vec::new(), vec!["https://doi.org/10.1000/a".to_string()]);
        let runner = CanonicalRunner::new(CanonicalForm::New, &ApiConfig::default());
        let identifiers = pending(&repository, Stage::DoiNew).await;

        let summary = Scheduler::new(repository.clone(), 10)
            .run_stage(&runner, &identifiers, &mut index)
            .await
            .unwrap();
        assert_eq!(summary.outcome.urls_added, 0);
        assert_eq!(summary.outcome.already_present, 1);
        // No candidate was new, the flag is still set
        assert_eq!(summary.outcome.completed, 1);
    }

    /// Fails on the identifier named at construction
    struct FailingRunner {
        inner: CanonicalRunner,
        fail_on: &'static str,
    }

    #[async_trait]
    impl StageRunner for FailingRunner {
        fn stage(&self) -> Stage {
            self.inner.stage()
        }

        async fn run_batch(&self, ctx: &mut BatchContext<'_>, batch: &[Identifier]) -> Result<()> {
            if batch.iter().any(|identifier| identifier.doi == self.fail_on) {
                return Err(AppError::Internal {
                    message: "process killed".to_string(),
                });
            }
            self.inner.run_batch(ctx, batch).await
        }
    }

    #[tokio::test]
    async fn test_resume_after_interrupted_run() {
        let dois = ["10.1000/1", "10.1000/2", "10.1000/3", "10.1000/4", "10.1000/5"];
        let repository = repository_with(&dois).await;
        let scheduler = Scheduler::new(repository.clone(), 1);

        let crashing = FailingRunner {
            inner: CanonicalRunner::new(CanonicalForm::New, &ApiConfig::default()),
            fail_on: "10.1000/4",
        };
        assert!(scheduler.run(&crashing).await.is_err());

        let remaining = pending(&repository, Stage::DoiNew).await;
        let remaining: Vec<&str> = remaining.iter().map(|identifier| identifier.doi.as_str()).collect();
        assert_eq!(remaining, vec!["10.1000/4", "10.1000/5"]);
        assert_eq!(repository.counts().await.unwrap().urls, 3);

        let runner = CanonicalRunner::new(CanonicalForm::New, &ApiConfig::default());
        let resumed = scheduler.run(&runner).await.unwrap();
        assert_eq!(resumed.pending, 2);
        assert_eq!(resumed.outcome.urls_added, 2);
        assert!(pending(&repository, Stage::DoiNew).await.is_empty());
    }

    #[tokio::test]
    async fn test_shared_landing_page_stored_once() {
        let repository = repository_with(&["10.1000/a", "10.1000/b"]).await;
        let fetcher = Arc::new(MockFetcher::new(|_| {
            Ok(FetchedResponse::new(200, "https://publisher.org/issue/1", "<html>"))
        }));
        let runner = LandingPageRunner::new(fetcher, &ApiConfig::default(), FailurePolicy::MarkComplete);

        let summary = Scheduler::new(repository.clone(), 1000).run(&runner).await.unwrap();
        assert_eq!(summary.outcome.urls_added, 1);
        assert_eq!(summary.outcome.already_present, 1);
        assert_eq!(repository.counts().await.unwrap().urls, 1);
    }

    #[tokio::test]
    async fn test_pipeline_enrich_all() {
        let repository = repository_with(&["10.1000/a"]).await;
        let config = AppConfig::default();
        let fetcher = Arc::new(MockFetcher::constant(200, "{}"));
        let pipeline = Pipeline::new(config, fetcher.clone(), repository.clone());

        assert!(pipeline.run(Stage::Pubmed).await.unwrap().is_none());

        let summaries = pipeline.enrich_all().await.unwrap();
        let stages: Vec<Stage> = summaries.iter().map(|s| s.stage).collect();
        assert_eq!(stages, RUNNER_STAGES.to_vec());
        // Landing page, NCBI and Unpaywall each call out once
        assert_eq!(fetcher.call_count(), 3);

        let identifier = repository.get_identifier("10.1000/a").await.unwrap();
        for stage in RUNNER_STAGES {
            assert!(identifier.is_completed(stage));
        }
        assert!(!identifier.is_completed(Stage::Pubmed));

        let summary = serde_json::to_value(&summaries[0]).unwrap();
        assert_eq!(summary["stage"], "doi_new");
        assert_eq!(summary["urls_added"], 1);
    }
}
