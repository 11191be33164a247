//! Engagement poller: bulk social-engagement lookups for every stored URL.
//! Each poll appends new snapshots; earlier ones are never overwritten.

use collector_common::clients::FetchedResponse;
use collector_common::db::NewEngagement;
use collector_common::{metrics, AppError, GraphApi, Repository, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const SERVICE: &str = "graph";

/// Result of one poll
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngagementSummary {
    pub urls: usize,
    pub batches: usize,
    pub records_added: u64,
    pub failed_batches: usize,
    /// URLs the response did not cover
    pub missing: usize,
}

#[derive(Debug, Default, Deserialize)]
struct Counters {
    #[serde(default)]
    reaction_count: i64,
    #[serde(default)]
    share_count: i64,
    #[serde(default)]
    comment_count: i64,
    #[serde(default)]
    comment_plugin_count: i64,
}

/// Snapshot for one URL entry of the response. Missing counters read as zero.
fn snapshot(url: &str, entry: &Value) -> NewEngagement {
    let counters = entry
        .get("engagement")
        .and_then(|e| serde_json::from_value::<Counters>(e.clone()).ok())
        .unwrap_or_default();

    NewEngagement {
        url: url.to_string(),
        response: entry.clone(),
        reactions: counters.reaction_count,
        shares: counters.share_count,
        comments: counters.comment_count,
        plugin_comments: counters.comment_plugin_count,
    }
}

fn parse(response: &FetchedResponse) -> Result<serde_json::Map<String, Value>> {
    if !response.is_success() {
        return Err(AppError::Upstream {
            service: SERVICE.to_string(),
            status: Some(response.status),
            message: response.body.clone(),
        });
    }
    match response.json(SERVICE)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::malformed(
            SERVICE,
            format!("expected an object keyed by URL, got {}", other),
        )),
    }
}

pub struct EngagementPoller {
    repository: Repository,
    api: Arc<dyn GraphApi>,
    batch_size: usize,
}

impl EngagementPoller {
    pub fn new(repository: Repository, api: Arc<dyn GraphApi>, batch_size: usize) -> Self {
        Self {
            repository,
            api,
            batch_size: batch_size.max(1),
        }
    }

    /// Poll every stored URL. The token exchange runs once up front and its
    /// failure aborts the poll; a failed batch is logged and skipped.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<EngagementSummary> {
        let urls: Vec<String> = self
            .repository
            .all_urls()
            .await?
            .into_iter()
            .map(|u| u.url)
            .collect();

        let mut summary = EngagementSummary {
            urls: urls.len(),
            ..Default::default()
        };
        if urls.is_empty() {
            info!("No URLs to poll");
            return Ok(summary);
        }

        let token = self.api.access_token().await?;

        for batch in urls.chunks(self.batch_size) {
            summary.batches += 1;

            let entries = match self.api.engagement(&token, batch).await.and_then(|r| parse(&r)) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, kind = ?e.kind(), batch = summary.batches, "Engagement batch failed");
                    summary.failed_batches += 1;
                    continue;
                }
            };

            let mut rows = Vec::with_capacity(batch.len());
            for url in batch {
                match entries.get(url) {
                    Some(entry) if entry.is_object() => rows.push(snapshot(url, entry)),
                    _ => summary.missing += 1,
                }
            }

            let added = self
                .repository
                .insert_engagement(self.repository.connection(), rows)
                .await?;
            summary.records_added += added;
            metrics::record_engagement(added);
        }

        info!(
            urls = summary.urls,
            records_added = summary.records_added,
            failed_batches = summary.failed_batches,
            "Engagement poll complete"
        );
        Ok(summary)
    }
}
