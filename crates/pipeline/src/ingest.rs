//! Ingestion stage: raw records to identifiers and seed URLs

use crate::dedup::DedupIndex;
use crate::source::{ImportSource, RawRecord, RejectedRecord};
use chrono::NaiveDate;
use collector_common::db::models::UrlType;
use collector_common::db::{NewIdentifier, NewUrl};
use collector_common::errors::ErrorCode;
use collector_common::{doi, metrics, AppError, Repository, Result};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Row after normalization. Absent fields are serialized as `false` in the
/// import snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub doi: String,
    #[serde(serialize_with = "absent_as_false")]
    pub url: Option<String>,
    #[serde(serialize_with = "absent_as_false")]
    pub url_type: Option<String>,
    #[serde(serialize_with = "absent_as_false")]
    pub date: Option<String>,
}

fn absent_as_false<S: Serializer>(value: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_str(v),
        None => serializer.serialize_bool(false),
    }
}

/// Rows removed by normalization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub duplicates: usize,
    pub missing_identifier: usize,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Trim fields, drop rows without an identifier, drop rows that repeat an
/// earlier identifier without contributing a new seed URL, and strip seed
/// URLs already claimed by an earlier row.
pub fn normalize(records: Vec<RawRecord>) -> (Vec<NormalizedRecord>, NormalizeStats) {
    let mut stats = NormalizeStats::default();
    let mut seen_dois = HashSet::new();
    let mut seen_urls = HashSet::new();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let Some(doi) = clean(record.doi) else {
            stats.missing_identifier += 1;
            continue;
        };

        let mut url = clean(record.url);
        let mut url_type = clean(record.url_type);
        if let Some(u) = &url {
            if !seen_urls.insert(u.clone()) {
                url = None;
                url_type = None;
            }
        }

        let new_doi = seen_dois.insert(doi.clone());
        if !new_doi && url.is_none() {
            stats.duplicates += 1;
            continue;
        }

        rows.push(NormalizedRecord {
            doi,
            url,
            url_type,
            date: clean(record.date),
        });
    }

    (rows, stats)
}

fn parse_date(value: Option<&str>) -> std::result::Result<NaiveDate, AppError> {
    let value = value.ok_or_else(|| AppError::MissingField {
        field: "date".to_string(),
    })?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| AppError::InvalidFormat {
        message: format!("date {}: {}", value, e),
    })
}

/// Result of one ingestion call
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub import_id: Uuid,
    pub source: String,
    pub rows: usize,
    pub duplicates_dropped: usize,
    pub identifiers_added: u64,
    pub identifiers_already_present: u64,
    pub urls_added: u64,
    pub urls_already_present: u64,
    /// Rows skipped for a missing identifier or a missing/malformed date
    pub skipped: u64,
    pub invalid_identifiers: Vec<String>,
    pub rejected: Vec<RejectedRecord>,
    /// Rows skipped during ingestion, by error code
    pub errors: BTreeMap<ErrorCode, u64>,
}

impl IngestSummary {
    fn reject(&mut self, error: &AppError) {
        *self.errors.entry(error.code()).or_default() += 1;
    }
}

/// Ingestion stage
pub struct Ingestor {
    repository: Repository,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(repository: Repository, batch_size: usize) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest raw records. Fails only if the import audit row or a batch
    /// write fails; bad rows are counted and skipped.
    #[instrument(skip(self, records), fields(source = %source.descriptor(), records = records.len()))]
    pub async fn ingest(&self, source: &ImportSource, records: Vec<RawRecord>) -> Result<IngestSummary> {
        let (rows, stats) = normalize(records);
        let descriptor = source.descriptor();

        let raw = serde_json::to_value(&rows)?;
        let import = self.repository.create_import(&descriptor, raw).await?;
        info!(import_id = %import.id, rows = rows.len(), "Import recorded");

        let mut index = DedupIndex::load(&self.repository).await?;
        let mut created: HashSet<String> = HashSet::new();
        let mut summary = IngestSummary {
            import_id: import.id,
            source: descriptor,
            rows: rows.len(),
            duplicates_dropped: stats.duplicates,
            skipped: stats.missing_identifier as u64,
            ..Default::default()
        };
        if stats.missing_identifier > 0 {
            let missing = AppError::MissingField { field: "doi".to_string() };
            summary.errors.insert(missing.code(), stats.missing_identifier as u64);
        }

        for chunk in rows.chunks(self.batch_size) {
            let mut identifiers = Vec::new();
            let mut urls = Vec::new();

            for row in chunk {
                if !doi::is_valid(&row.doi) {
                    let err = AppError::InvalidIdentifier { doi: row.doi.clone() };
                    warn!(error = %err, code = ?err.code(), "Row skipped");
                    summary.reject(&err);
                    summary.invalid_identifiers.push(row.doi.clone());
                    continue;
                }

                if !index.contains_identifier(&row.doi) {
                    let date = match parse_date(row.date.as_deref()) {
                        Ok(date) => date,
                        Err(err) => {
                            warn!(doi = %row.doi, error = %err, code = ?err.code(), "Row skipped");
                            summary.reject(&err);
                            summary.skipped += 1;
                            continue;
                        }
                    };
                    index.register_identifier(&row.doi);
                    created.insert(row.doi.clone());
                    identifiers.push(NewIdentifier {
                        doi: row.doi.clone(),
                        import_id: import.id,
                        date_published: Some(date),
                        is_valid: true,
                    });
                } else if !created.contains(&row.doi) {
                    summary.identifiers_already_present += 1;
                }

                if let Some(url) = &row.url {
                    if index.register(url) {
                        urls.push(NewUrl {
                            url: url.clone(),
                            doi: row.doi.clone(),
                            url_type: UrlType::from_seed(row.url_type.as_deref()),
                        });
                    } else {
                        summary.urls_already_present += 1;
                    }
                }
            }

            let staged_urls = urls.len() as u64;
            let txn = self.repository.begin().await?;
            let write = async {
                let ids = self.repository.insert_identifiers(&txn, identifiers).await?;
                let urls = self.repository.insert_urls(&txn, urls).await?;
                Ok::<_, collector_common::AppError>((ids, urls))
            }
            .await;

            let (ids_added, urls_added) = match write {
                Ok(counts) => counts,
                Err(e) => {
                    index.rollback();
                    return Err(e);
                }
            };
            txn.commit().await?;
            index.commit();

            summary.identifiers_added += ids_added;
            summary.urls_added += urls_added;
            summary.urls_already_present += staged_urls - urls_added;
            metrics::record_urls_added("ingest", urls_added);
        }

        metrics::record_ingestion(summary.identifiers_added, summary.invalid_identifiers.len() as u64);
        info!(
            identifiers_added = summary.identifiers_added,
            urls_added = summary.urls_added,
            invalid = summary.invalid_identifiers.len(),
            skipped = summary.skipped,
            "Ingestion complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parse_csv;
    use collector_common::DbPool;
    use std::path::PathBuf;

    fn record(doi: &str, url: Option<&str>, date: Option<&str>) -> RawRecord {
        RawRecord {
            doi: Some(doi.to_string()),
            url: url.map(str::to_string),
            url_type: url.map(|_| "ojs".to_string()),
            date: date.map(str::to_string),
        }
    }

    async fn ingestor(batch_size: usize) -> (Ingestor, Repository) {
        let repository = Repository::new(DbPool::in_memory().await.unwrap());
        (Ingestor::new(repository.clone(), batch_size), repository)
    }

    fn source() -> ImportSource {
        ImportSource::File(PathBuf::from("seed.csv"))
    }

    #[test]
    fn test_normalize_drops_duplicates() {
        let (rows, stats) = normalize(vec![
            record("10.1000/a", Some("https://x.org/a"), Some("2020-01-01")),
            record("10.1000/a", Some("https://x.org/a"), Some("2020-01-01")),
            record("10.1000/a", Some("https://x.org/a2"), Some("2021-01-01")),
            record("10.1000/b", Some("https://x.org/a"), Some("2020-01-01")),
            record(" ", None, None),
        ]);

        assert_eq!(rows.len(), 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.missing_identifier, 1);
        assert_eq!(rows[2].doi, "10.1000/b");
        assert_eq!(rows[2].url, None);
    }

    #[test]
    fn test_absent_fields_serialize_as_sentinel() {
        let (rows, _) = normalize(vec![record("10.1000/a", None, None)]);
        let raw = serde_json::to_value(&rows).unwrap();
        assert_eq!(raw[0]["doi"], "10.1000/a");
        assert_eq!(raw[0]["url"], false);
        assert_eq!(raw[0]["date"], false);
    }

    #[tokio::test]
    async fn test_duplicate_identifier_keeps_each_seed_url() {
        let (ingestor, repository) = ingestor(1000).await;
        let csv = "doi,url,url_type,date\n\
                   10.1371/journal.pone.0141854,https://journal.org/article/1,ojs,2015-10-29\n\
                   10.1371/journal.pone.0141854,https://mirror.org/article/1,ojs,2015-10-29\n";
        let loaded = parse_csv(csv.as_bytes()).unwrap();

        let summary = ingestor.ingest(&source(), loaded.records).await.unwrap();
        assert_eq!(summary.identifiers_added, 1);
        assert_eq!(summary.urls_added, 2);

        let counts = repository.counts().await.unwrap();
        assert_eq!(counts.identifiers, 1);
        assert_eq!(counts.urls, 2);
        assert_eq!(counts.imports, 1);

        let urls = repository.urls_for_identifier("10.1371/journal.pone.0141854").await.unwrap();
        assert!(urls.iter().all(|u| u.url_type() == UrlType::Ojs));
    }

    #[tokio::test]
    async fn test_invalid_and_undated_rows_are_skipped() {
        let (ingestor, repository) = ingestor(2).await;
        let records = vec![
            record("10.1371/journal.pone.0141854", None, Some("2015-10-29")),
            record("not-a-doi", Some("https://x.org/bad"), Some("2015-10-29")),
            record("10.1000/undated", Some("https://x.org/undated"), None),
            record("10.1000/baddate", None, Some("29.10.2015")),
            record("10.1000/ok", Some("https://x.org/ok"), Some("2016-01-01")),
        ];

        let summary = ingestor.ingest(&source(), records).await.unwrap();
        assert_eq!(summary.identifiers_added, 2);
        assert_eq!(summary.urls_added, 1);
        assert_eq!(summary.invalid_identifiers, vec!["not-a-doi".to_string()]);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors.get(&ErrorCode::InvalidIdentifier), Some(&1));
        assert_eq!(summary.errors.get(&ErrorCode::MissingField), Some(&1));
        assert_eq!(summary.errors.get(&ErrorCode::InvalidFormat), Some(&1));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["errors"]["INVALID_IDENTIFIER"], 1);

        let stored = repository.get_identifier("10.1000/ok").await.unwrap();
        assert_eq!(stored.date_published, NaiveDate::from_ymd_opt(2016, 1, 1));
        assert_eq!(stored.import_id, summary.import_id);
        assert!(stored.stages().is_empty());
        assert!(repository.find_identifier("10.1000/undated").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reimport_attaches_new_seed_urls() {
        let (ingestor, repository) = ingestor(1000).await;
        ingestor
            .ingest(&source(), vec![record("10.1000/a", Some("https://x.org/1"), Some("2020-01-01"))])
            .await
            .unwrap();

        let summary = ingestor
            .ingest(
                &source(),
                vec![
                    record("10.1000/a", Some("https://x.org/1"), Some("2020-01-01")),
                    record("10.1000/a", Some("https://x.org/2"), None),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary.identifiers_added, 0);
        assert_eq!(summary.identifiers_already_present, 2);
        assert_eq!(summary.urls_added, 1);
        assert_eq!(summary.urls_already_present, 1);

        let counts = repository.counts().await.unwrap();
        assert_eq!(counts.imports, 2);
        assert_eq!(counts.urls, 2);
    }
}
