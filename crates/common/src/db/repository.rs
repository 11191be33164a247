//! Repository pattern for database operations
//!
//! Reads go through the pool. Writes that belong to a pipeline batch take
//! any `ConnectionTrait` so they can run inside the batch transaction.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::stage::{Stage, StageSet};
use chrono::NaiveDate;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, IntoActiveModel, Iterable, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier row staged for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentifier {
    pub doi: String,
    pub import_id: Uuid,
    pub date_published: Option<NaiveDate>,
    pub is_valid: bool,
}

/// URL row staged for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub url: String,
    pub doi: String,
    pub url_type: UrlType,
}

/// Audit row for one outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequestLog {
    pub doi: String,
    pub request_url: String,
    pub request_type: String,
    pub response_content: Option<String>,
    pub response_status: Option<u16>,
}

/// One engagement snapshot for one URL
#[derive(Debug, Clone, PartialEq)]
pub struct NewEngagement {
    pub url: String,
    pub response: serde_json::Value,
    pub reactions: i64,
    pub shares: i64,
    pub comments: i64,
    pub plugin_comments: i64,
}

/// Which rows a bulk reset removes. Dependent rows go with their parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetTarget {
    Imports,
    Dois,
    Urls,
    Requests,
    Engagement,
    All,
}

impl FromStr for ResetTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "imports" => Ok(ResetTarget::Imports),
            "dois" | "identifiers" => Ok(ResetTarget::Dois),
            "urls" => Ok(ResetTarget::Urls),
            "requests" => Ok(ResetTarget::Requests),
            "engagement" | "fbrequests" => Ok(ResetTarget::Engagement),
            "all" => Ok(ResetTarget::All),
            other => Err(format!("unknown reset target: {}", other)),
        }
    }
}

/// Rows deleted per table by a bulk reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCounts {
    pub imports: u64,
    pub identifiers: u64,
    pub urls: u64,
    pub request_logs: u64,
    pub engagement: u64,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub imports: u64,
    pub identifiers: u64,
    pub urls: u64,
    pub request_logs: u64,
    pub engagement: u64,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    pub fn connection(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Start a batch transaction
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.pool.write().begin().await.map_err(Into::into)
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Import Operations
    // ========================================================================

    /// Persist the audit record for one ingestion call
    pub async fn create_import(&self, source: &str, raw: serde_json::Value) -> Result<Import> {
        let import = ImportActiveModel {
            id: Set(Uuid::now_v7()),
            source: Set(source.to_string()),
            raw: Set(raw),
            created_at: Set(chrono::Utc::now().into()),
        };

        import.insert(self.connection()).await.map_err(Into::into)
    }

    /// All import records in creation order
    pub async fn all_imports(&self) -> Result<Vec<Import>> {
        ImportEntity::find()
            .order_by_asc(ImportColumn::CreatedAt)
            .order_by_asc(ImportColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Identifier Operations
    // ========================================================================

    /// All identifiers in load order
    pub async fn all_identifiers(&self) -> Result<Vec<Identifier>> {
        IdentifierEntity::find()
            .order_by_asc(IdentifierColumn::CreatedAt)
            .order_by_asc(IdentifierColumn::Doi)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All stored identifier strings
    pub async fn identifier_keys(&self) -> Result<Vec<String>> {
        IdentifierEntity::find()
            .select_only()
            .column(IdentifierColumn::Doi)
            .into_tuple::<String>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Identifiers whose flag for `stage` is not yet set, in load order
    pub async fn pending_identifiers(&self, stage: Stage) -> Result<Vec<Identifier>> {
        IdentifierEntity::find()
            .filter(pending_filter(stage))
            .order_by_asc(IdentifierColumn::CreatedAt)
            .order_by_asc(IdentifierColumn::Doi)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Find identifier by DOI
    pub async fn find_identifier(&self, doi: &str) -> Result<Option<Identifier>> {
        IdentifierEntity::find_by_id(doi.to_string())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Insert identifiers, skipping any whose DOI already exists.
    /// Returns the number of rows inserted.
    pub async fn insert_identifiers<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<NewIdentifier>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now();
        let models = rows
            .into_iter()
            .map(|row| IdentifierActiveModel {
                doi: Set(row.doi),
                import_id: Set(row.import_id),
                date_published: Set(row.date_published),
                is_valid: Set(row.is_valid),
                completed_stages: Set(StageSet::EMPTY.bits()),
                pm_id: Set(None),
                pmc_id: Set(None),
                created_at: Set(now.into()),
            })
            .collect();

        insert_chunked(conn, models, Some(OnConflict::column(IdentifierColumn::Doi).do_nothing().to_owned())).await
    }

    /// Set completion flags. Flags are only ever added, never cleared.
    pub async fn mark_completed<C: ConnectionTrait>(
        &self,
        conn: &C,
        dois: &[String],
        stages: StageSet,
    ) -> Result<u64> {
        if dois.is_empty() || stages.is_empty() {
            return Ok(0);
        }

        let result = IdentifierEntity::update_many()
            .col_expr(
                IdentifierColumn::CompletedStages,
                Expr::cust(format!("completed_stages | {}", stages.bits())),
            )
            .filter(IdentifierColumn::Doi.is_in(dois.iter().cloned()))
            .exec(conn)
            .await?;

        debug!(
            identifiers = result.rows_affected,
            stages = stages.bits(),
            "Completion flags set"
        );
        Ok(result.rows_affected)
    }

    /// Record the PubMed / PubMed Central ids returned by the ID converter
    pub async fn set_pubmed_ids<C: ConnectionTrait>(
        &self,
        conn: &C,
        doi: &str,
        pm_id: Option<String>,
        pmc_id: Option<String>,
    ) -> Result<()> {
        if pm_id.is_none() && pmc_id.is_none() {
            return Ok(());
        }

        let mut update = IdentifierEntity::update_many()
            .filter(IdentifierColumn::Doi.eq(doi));
        if let Some(pm_id) = pm_id {
            update = update.col_expr(IdentifierColumn::PmId, Expr::value(pm_id));
        }
        if let Some(pmc_id) = pmc_id {
            update = update.col_expr(IdentifierColumn::PmcId, Expr::value(pmc_id));
        }

        update.exec(conn).await?;
        Ok(())
    }

    // ========================================================================
    // URL Operations
    // ========================================================================

    /// All stored URL strings
    pub async fn url_keys(&self) -> Result<Vec<String>> {
        UrlEntity::find()
            .select_only()
            .column(UrlColumn::Url)
            .into_tuple::<String>()
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// All stored URLs in creation order
    pub async fn all_urls(&self) -> Result<Vec<DerivedUrl>> {
        UrlEntity::find()
            .order_by_asc(UrlColumn::CreatedAt)
            .order_by_asc(UrlColumn::Url)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// URLs derived for one identifier
    pub async fn urls_for_identifier(&self, doi: &str) -> Result<Vec<DerivedUrl>> {
        UrlEntity::find()
            .filter(UrlColumn::Doi.eq(doi))
            .order_by_asc(UrlColumn::CreatedAt)
            .order_by_asc(UrlColumn::Url)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Insert URLs, skipping any URL string that already exists.
    /// Returns the number of rows inserted.
    pub async fn insert_urls<C: ConnectionTrait>(&self, conn: &C, rows: Vec<NewUrl>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now();
        let models = rows
            .into_iter()
            .map(|row| UrlActiveModel {
                url: Set(row.url),
                doi: Set(row.doi),
                url_type: Set(row.url_type.into()),
                created_at: Set(now.into()),
            })
            .collect();

        insert_chunked(conn, models, Some(OnConflict::column(UrlColumn::Url).do_nothing().to_owned())).await
    }

    // ========================================================================
    // Request Log Operations
    // ========================================================================

    /// Append request log rows
    pub async fn insert_request_logs<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<NewRequestLog>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now();
        let models = rows
            .into_iter()
            .map(|row| RequestLogActiveModel {
                id: Set(Uuid::now_v7()),
                doi: Set(row.doi),
                request_url: Set(row.request_url),
                request_type: Set(row.request_type),
                response_content: Set(row.response_content),
                response_status: Set(row.response_status.map(i32::from)),
                created_at: Set(now.into()),
            })
            .collect();

        insert_chunked(conn, models, None).await
    }

    /// Every request log in creation order
    pub async fn all_request_logs(&self) -> Result<Vec<RequestLog>> {
        RequestLogEntity::find()
            .order_by_asc(RequestLogColumn::CreatedAt)
            .order_by_asc(RequestLogColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Request logs written for one identifier
    pub async fn request_logs_for_identifier(&self, doi: &str) -> Result<Vec<RequestLog>> {
        RequestLogEntity::find()
            .filter(RequestLogColumn::Doi.eq(doi))
            .order_by_asc(RequestLogColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Engagement Operations
    // ========================================================================

    /// Append engagement snapshots
    pub async fn insert_engagement<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<NewEngagement>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now();
        let models = rows
            .into_iter()
            .map(|row| EngagementActiveModel {
                id: Set(Uuid::now_v7()),
                url: Set(row.url),
                response: Set(row.response),
                reactions: Set(row.reactions),
                shares: Set(row.shares),
                comments: Set(row.comments),
                plugin_comments: Set(row.plugin_comments),
                created_at: Set(now.into()),
            })
            .collect();

        insert_chunked(conn, models, None).await
    }

    /// Every engagement snapshot in creation order
    pub async fn all_engagement(&self) -> Result<Vec<EngagementRecord>> {
        EngagementEntity::find()
            .order_by_asc(EngagementColumn::CreatedAt)
            .order_by_asc(EngagementColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Engagement history for one URL
    pub async fn engagement_for_url(&self, url: &str) -> Result<Vec<EngagementRecord>> {
        EngagementEntity::find()
            .filter(EngagementColumn::Url.eq(url))
            .order_by_asc(EngagementColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Restore
    // ========================================================================
    //
    // Rows come back exactly as exported: ids, flags and timestamps are kept.
    // A row whose primary key already exists is skipped.

    pub async fn restore_imports<C: ConnectionTrait>(&self, conn: &C, rows: Vec<Import>) -> Result<u64> {
        let models = rows
            .into_iter()
            .map(|row| ImportActiveModel {
                id: Set(row.id),
                source: Set(row.source),
                raw: Set(row.raw),
                created_at: Set(row.created_at),
            })
            .collect();
        insert_chunked(conn, models, Some(OnConflict::column(ImportColumn::Id).do_nothing().to_owned())).await
    }

    pub async fn restore_identifiers<C: ConnectionTrait>(&self, conn: &C, rows: Vec<Identifier>) -> Result<u64> {
        let models = rows
            .into_iter()
            .map(|row| IdentifierActiveModel {
                doi: Set(row.doi),
                import_id: Set(row.import_id),
                date_published: Set(row.date_published),
                is_valid: Set(row.is_valid),
                completed_stages: Set(row.completed_stages),
                pm_id: Set(row.pm_id),
                pmc_id: Set(row.pmc_id),
                created_at: Set(row.created_at),
            })
            .collect();
        insert_chunked(conn, models, Some(OnConflict::column(IdentifierColumn::Doi).do_nothing().to_owned())).await
    }

    pub async fn restore_urls<C: ConnectionTrait>(&self, conn: &C, rows: Vec<DerivedUrl>) -> Result<u64> {
        let models = rows
            .into_iter()
            .map(|row| UrlActiveModel {
                url: Set(row.url),
                doi: Set(row.doi),
                url_type: Set(row.url_type),
                created_at: Set(row.created_at),
            })
            .collect();
        insert_chunked(conn, models, Some(OnConflict::column(UrlColumn::Url).do_nothing().to_owned())).await
    }

    pub async fn restore_request_logs<C: ConnectionTrait>(&self, conn: &C, rows: Vec<RequestLog>) -> Result<u64> {
        let models = rows
            .into_iter()
            .map(|row| RequestLogActiveModel {
                id: Set(row.id),
                doi: Set(row.doi),
                request_url: Set(row.request_url),
                request_type: Set(row.request_type),
                response_content: Set(row.response_content),
                response_status: Set(row.response_status),
                created_at: Set(row.created_at),
            })
            .collect();
        insert_chunked(conn, models, Some(OnConflict::column(RequestLogColumn::Id).do_nothing().to_owned())).await
    }

    pub async fn restore_engagement<C: ConnectionTrait>(
        &self,
        conn: &C,
        rows: Vec<EngagementRecord>,
    ) -> Result<u64> {
        let models = rows
            .into_iter()
            .map(|row| EngagementActiveModel {
                id: Set(row.id),
                url: Set(row.url),
                response: Set(row.response),
                reactions: Set(row.reactions),
                shares: Set(row.shares),
                comments: Set(row.comments),
                plugin_comments: Set(row.plugin_comments),
                created_at: Set(row.created_at),
            })
            .collect();
        insert_chunked(conn, models, Some(OnConflict::column(EngagementColumn::Id).do_nothing().to_owned())).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Bulk reset. Dependents are deleted before the rows they reference.
    pub async fn delete(&self, target: ResetTarget) -> Result<DeleteCounts> {
        let txn = self.begin().await?;
        let mut counts = DeleteCounts::default();

        let (engagement, requests, urls, dois, imports) = match target {
            ResetTarget::Engagement => (true, false, false, false, false),
            ResetTarget::Requests => (false, true, false, false, false),
            ResetTarget::Urls => (true, false, true, false, false),
            ResetTarget::Dois => (true, true, true, true, false),
            ResetTarget::Imports | ResetTarget::All => (true, true, true, true, true),
        };

        if engagement {
            counts.engagement = EngagementEntity::delete_many().exec(&txn).await?.rows_affected;
        }
        if requests {
            counts.request_logs = RequestLogEntity::delete_many().exec(&txn).await?.rows_affected;
        }
        if urls {
            counts.urls = UrlEntity::delete_many().exec(&txn).await?.rows_affected;
        }
        if dois {
            counts.identifiers = IdentifierEntity::delete_many().exec(&txn).await?.rows_affected;
        }
        if imports {
            counts.imports = ImportEntity::delete_many().exec(&txn).await?.rows_affected;
        }

        txn.commit().await?;

        info!(reset = ?target, counts = ?counts, "Bulk reset complete");
        Ok(counts)
    }

    /// Row count per table
    pub async fn counts(&self) -> Result<TableCounts> {
        let conn = self.read_conn();
        Ok(TableCounts {
            imports: ImportEntity::find().count(conn).await?,
            identifiers: IdentifierEntity::find().count(conn).await?,
            urls: UrlEntity::find().count(conn).await?,
            request_logs: RequestLogEntity::find().count(conn).await?,
            engagement: EngagementEntity::find().count(conn).await?,
        })
    }

    /// Number of identifiers still pending, per stage
    pub async fn pending_counts(&self) -> Result<Vec<(Stage, u64)>> {
        let mut pending = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let count = IdentifierEntity::find()
                .filter(pending_filter(stage))
                .count(self.read_conn())
                .await?;
            pending.push((stage, count));
        }
        Ok(pending)
    }

    /// Fetch an identifier that must exist
    pub async fn get_identifier(&self, doi: &str) -> Result<Identifier> {
        self.find_identifier(doi)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "identifier".to_string(),
                id: doi.to_string(),
            })
    }
}

fn pending_filter(stage: Stage) -> sea_orm::sea_query::SimpleExpr {
    Expr::cust(format!("(completed_stages & {}) = 0", stage.bit()))
}

/// Most bind parameters one statement may carry on each backend
fn max_bind_params(backend: DbBackend) -> usize {
    match backend {
        DbBackend::Sqlite => 32_766,
        _ => 65_535,
    }
}

/// Rows that fit in one multi-row INSERT of `columns` columns
fn rows_per_statement(backend: DbBackend, columns: usize) -> usize {
    (max_bind_params(backend) / columns.max(1)).max(1)
}

/// Multi-row insert split into statements that each stay under the
/// backend's bind-parameter limit. Returns the number of rows inserted.
async fn insert_chunked<C, A>(conn: &C, models: Vec<A>, on_conflict: Option<OnConflict>) -> Result<u64>
where
    C: ConnectionTrait,
    A: ActiveModelTrait + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
{
    let columns = <A::Entity as EntityTrait>::Column::iter().count();
    let per_statement = rows_per_statement(conn.get_database_backend(), columns);

    let mut inserted = 0;
    let mut models = models.into_iter().peekable();
    while models.peek().is_some() {
        let chunk: Vec<A> = models.by_ref().take(per_statement).collect();
        let mut insert = <A::Entity as EntityTrait>::insert_many(chunk);
        if let Some(on_conflict) = &on_conflict {
            insert = insert.on_conflict(on_conflict.clone());
        }
        inserted += insert.exec_without_returning(conn).await?;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repository() -> Repository {
        Repository::new(DbPool::in_memory().await.unwrap())
    }

    async fn seed(repo: &Repository, dois: &[&str]) -> Uuid {
        let import = repo
            .create_import("<INIT test.csv>", serde_json::json!([]))
            .await
            .unwrap();
        let rows = dois
            .iter()
            .map(|doi| NewIdentifier {
                doi: doi.to_string(),
                import_id: import.id,
                date_published: NaiveDate::from_ymd_opt(2015, 10, 29),
                is_valid: true,
            })
            .collect();
        repo.insert_identifiers(repo.connection(), rows).await.unwrap();
        import.id
    }

    #[tokio::test]
    async fn test_insert_identifiers_skips_existing() {
        let repo = repository().await;
        let import_id = seed(&repo, &["10.1000/a", "10.1000/b"]).await;

        let again = vec![
            NewIdentifier {
                doi: "10.1000/b".into(),
                import_id,
                date_published: None,
                is_valid: true,
            },
            NewIdentifier {
                doi: "10.1000/c".into(),
                import_id,
                date_published: None,
                is_valid: true,
            },
        ];
        let inserted = repo.insert_identifiers(repo.connection(), again).await.unwrap();
        assert_eq!(inserted, 1);

        let b = repo.get_identifier("10.1000/b").await.unwrap();
        assert_eq!(b.date_published, NaiveDate::from_ymd_opt(2015, 10, 29));
        assert!(b.stages().is_empty());
    }

    #[tokio::test]
    async fn test_url_uniqueness_across_identifiers() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a", "10.1000/b"]).await;

        let first = vec![NewUrl {
            url: "https://example.org/article".into(),
            doi: "10.1000/a".into(),
            url_type: UrlType::Seed,
        }];
        let second = vec![NewUrl {
            url: "https://example.org/article".into(),
            doi: "10.1000/b".into(),
            url_type: UrlType::DoiLandingPage,
        }];

        assert_eq!(repo.insert_urls(repo.connection(), first).await.unwrap(), 1);
        assert_eq!(repo.insert_urls(repo.connection(), second).await.unwrap(), 0);

        let urls = repo.all_urls().await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].doi, "10.1000/a");
        assert_eq!(urls[0].url_type(), UrlType::Seed);
    }

    #[tokio::test]
    async fn test_mark_completed_is_monotonic() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a", "10.1000/b"]).await;
        let a = vec!["10.1000/a".to_string()];

        repo.mark_completed(repo.connection(), &a, Stage::Ncbi.into()).await.unwrap();
        repo.mark_completed(repo.connection(), &a, StageSet::from(Stage::Pubmed)).await.unwrap();
        repo.mark_completed(repo.connection(), &a, Stage::Ncbi.into()).await.unwrap();

        let stored = repo.get_identifier("10.1000/a").await.unwrap();
        assert!(stored.is_completed(Stage::Ncbi));
        assert!(stored.is_completed(Stage::Pubmed));
        assert!(!stored.is_completed(Stage::PubmedCentral));

        let pending = repo.pending_identifiers(Stage::Ncbi).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].doi, "10.1000/b");
    }

    #[tokio::test]
    async fn test_set_pubmed_ids() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a"]).await;

        repo.set_pubmed_ids(repo.connection(), "10.1000/a", Some("26517868".into()), None)
            .await
            .unwrap();

        let stored = repo.get_identifier("10.1000/a").await.unwrap();
        assert_eq!(stored.pm_id.as_deref(), Some("26517868"));
        assert!(stored.pmc_id.is_none());
    }

    #[tokio::test]
    async fn test_delete_respects_dependencies() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a"]).await;
        repo.insert_urls(
            repo.connection(),
            vec![NewUrl {
                url: "https://doi.org/10.1000/a".into(),
                doi: "10.1000/a".into(),
                url_type: UrlType::DoiNew,
            }],
        )
        .await
        .unwrap();
        repo.insert_request_logs(
            repo.connection(),
            vec![NewRequestLog {
                doi: "10.1000/a".into(),
                request_url: "https://doi.org/10.1000/a".into(),
                request_type: "doi_landingpage".into(),
                response_content: None,
                response_status: None,
            }],
        )
        .await
        .unwrap();

        let deleted = repo.delete(ResetTarget::Urls).await.unwrap();
        assert_eq!(deleted.urls, 1);
        assert_eq!(deleted.identifiers, 0);

        let deleted = repo.delete(ResetTarget::All).await.unwrap();
        assert_eq!(deleted.request_logs, 1);
        assert_eq!(deleted.identifiers, 1);
        assert_eq!(deleted.imports, 1);
        assert_eq!(repo.counts().await.unwrap(), TableCounts::default());
    }

    #[tokio::test]
    async fn test_pending_counts() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a", "10.1000/b", "10.1000/c"]).await;
        repo.mark_completed(repo.connection(), &["10.1000/a".to_string()], Stage::DoiNew.into())
            .await
            .unwrap();

        let pending = repo.pending_counts().await.unwrap();
        assert!(pending.contains(&(Stage::DoiNew, 2)));
        assert!(pending.contains(&(Stage::Unpaywall, 3)));
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(DbBackend::Postgres, 8), 8191);
        assert_eq!(rows_per_statement(DbBackend::Sqlite, 8), 4095);
        assert_eq!(rows_per_statement(DbBackend::Postgres, 0), 65_535);
        assert_eq!(rows_per_statement(DbBackend::Postgres, 100_000), 1);
    }

    #[tokio::test]
    async fn test_insert_beyond_bind_limit() {
        let repo = repository().await;
        let import_id = seed(&repo, &[]).await;
        let rows: Vec<NewIdentifier> = (0..10_000)
            .map(|i| NewIdentifier {
                doi: format!("10.1000/{}", i),
                import_id,
                date_published: None,
                is_valid: true,
            })
            .collect();

        let inserted = repo.insert_identifiers(repo.connection(), rows).await.unwrap();
        assert_eq!(inserted, 10_000);
        assert_eq!(repo.counts().await.unwrap().identifiers, 10_000);
    }

    #[tokio::test]
    async fn test_restore_keeps_exported_state() {
        let repo = repository().await;
        seed(&repo, &["10.1000/a"]).await;
        repo.mark_completed(repo.connection(), &["10.1000/a".to_string()], Stage::Ncbi.into())
            .await
            .unwrap();
        repo.set_pubmed_ids(repo.connection(), "10.1000/a", Some("1".into()), None)
            .await
            .unwrap();
        let imports = repo.all_imports().await.unwrap();
        let identifiers = repo.all_identifiers().await.unwrap();

        let copy = repository().await;
        assert_eq!(copy.restore_imports(copy.connection(), imports.clone()).await.unwrap(), 1);
        assert_eq!(copy.restore_identifiers(copy.connection(), identifiers.clone()).await.unwrap(), 1);
        assert_eq!(copy.restore_identifiers(copy.connection(), identifiers.clone()).await.unwrap(), 0);

        assert_eq!(copy.all_imports().await.unwrap(), imports);
        assert_eq!(copy.all_identifiers().await.unwrap(), identifiers);
        assert!(copy.pending_identifiers(Stage::Ncbi).await.unwrap().is_empty());
    }

    #[test]
    fn test_reset_target_parsing() {
        assert_eq!("all".parse::<ResetTarget>().unwrap(), ResetTarget::All);
        assert_eq!("fbrequests".parse::<ResetTarget>().unwrap(), ResetTarget::Engagement);
        assert!("everything".parse::<ResetTarget>().is_err());
    }
}
