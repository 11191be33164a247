//! Table export and restore
//!
//! Every table can be written to `{dir}/{prefix}{table}.csv` with a header
//! row, and read back either on top of the existing rows (append) or into a
//! freshly recreated schema (reset). A restore runs in one transaction, in
//! foreign-key order, whatever order the tables were requested in.

use chrono::{DateTime, FixedOffset};
use collector_common::db::models::{DerivedUrl, EngagementRecord, Identifier, Import, RequestLog};
use collector_common::db::{schema, TableCounts};
use collector_common::{AppError, Repository, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, instrument};
use uuid::Uuid;

/// One exportable table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Imports,
    Dois,
    Urls,
    Requests,
    Fbrequests,
}

impl Table {
    /// Every table, parents before the rows that reference them
    pub const ALL: [Table; 5] = [
        Table::Imports,
        Table::Dois,
        Table::Urls,
        Table::Requests,
        Table::Fbrequests,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Imports => "imports",
            Table::Dois => "dois",
            Table::Urls => "urls",
            Table::Requests => "requests",
            Table::Fbrequests => "fbrequests",
        }
    }

    /// File holding this table's rows
    pub fn path(self, dir: &Path, prefix: &str) -> PathBuf {
        dir.join(format!("{}{}.csv", prefix, self.name()))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imports" => Ok(Table::Imports),
            "dois" | "identifiers" => Ok(Table::Dois),
            "urls" => Ok(Table::Urls),
            "requests" => Ok(Table::Requests),
            "fbrequests" | "engagement" => Ok(Table::Fbrequests),
            other => Err(format!("unknown table: {}", other)),
        }
    }
}

/// How restored rows meet the rows already stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Keep existing rows; skip restored rows whose key is already present
    #[default]
    Append,
    /// Drop and recreate every table first
    Reset,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(ImportMode::Append),
            "reset" => Ok(ImportMode::Reset),
            other => Err(format!("unknown import mode: {}", other)),
        }
    }
}

/// One written export file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedTable {
    pub table: Table,
    pub path: PathBuf,
    pub rows: u64,
}

/// CSV shape of an import record. The raw payload is kept as JSON text.
#[derive(Debug, Serialize, Deserialize)]
struct ImportRow {
    id: Uuid,
    source: String,
    raw: String,
    created_at: DateTime<FixedOffset>,
}

impl From<Import> for ImportRow {
    fn from(import: Import) -> Self {
        Self {
            id: import.id,
            source: import.source,
            raw: import.raw.to_string(),
            created_at: import.created_at,
        }
    }
}

impl TryFrom<ImportRow> for Import {
    type Error = AppError;

    fn try_from(row: ImportRow) -> Result<Self> {
        Ok(Import {
            id: row.id,
            source: row.source,
            raw: serde_json::from_str(&row.raw)?,
            created_at: row.created_at,
        })
    }
}

/// CSV shape of an engagement snapshot
#[derive(Debug, Serialize, Deserialize)]
struct EngagementRow {
    id: Uuid,
    url: String,
    response: String,
    reactions: i64,
    shares: i64,
    comments: i64,
    plugin_comments: i64,
    created_at: DateTime<FixedOffset>,
}

impl From<EngagementRecord> for EngagementRow {
    fn from(record: EngagementRecord) -> Self {
        Self {
            id: record.id,
            url: record.url,
            response: record.response.to_string(),
            reactions: record.reactions,
            shares: record.shares,
            comments: record.comments,
            plugin_comments: record.plugin_comments,
            created_at: record.created_at,
        }
    }
}

impl TryFrom<EngagementRow> for EngagementRecord {
    type Error = AppError;

    fn try_from(row: EngagementRow) -> Result<Self> {
        Ok(EngagementRecord {
            id: row.id,
            url: row.url,
            response: serde_json::from_str(&row.response)?,
            reactions: row.reactions,
            shares: row.shares,
            comments: row.comments,
            plugin_comments: row.plugin_comments,
            created_at: row.created_at,
        })
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<u64> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut written = 0;
    for row in rows {
        writer.serialize(row)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.is_file() {
        return Err(AppError::NotFound {
            resource_type: "table file".to_string(),
            id: path.display().to_string(),
        });
    }
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize::<T>().collect::<std::result::Result<Vec<T>, _>>()?;
    Ok(rows)
}

/// Distinct tables in foreign-key order
fn ordered(tables: &[Table]) -> Vec<Table> {
    Table::ALL.into_iter().filter(|table| tables.contains(table)).collect()
}

/// Write each requested table to `{dir}/{prefix}{table}.csv`
#[instrument(skip(repository, tables, dir), fields(dir = %dir.display()))]
pub async fn export_tables(
    repository: &Repository,
    tables: &[Table],
    dir: &Path,
    prefix: &str,
) -> Result<Vec<ExportedTable>> {
    std::fs::create_dir_all(dir)?;

    let mut exported = Vec::with_capacity(tables.len());
    for table in ordered(tables) {
        let path = table.path(dir, prefix);
        let rows = match table {
            Table::Imports => {
                let rows = repository.all_imports().await?;
                write_csv(&path, rows.into_iter().map(ImportRow::from))?
            }
            Table::Dois => write_csv(&path, repository.all_identifiers().await?)?,
            Table::Urls => write_csv(&path, repository.all_urls().await?)?,
            Table::Requests => write_csv(&path, repository.all_request_logs().await?)?,
            Table::Fbrequests => {
                let rows = repository.all_engagement().await?;
                write_csv(&path, rows.into_iter().map(EngagementRow::from))?
            }
        };

        info!(table = %table, rows, path = %path.display(), "Table exported");
        exported.push(ExportedTable { table, path, rows });
    }

    Ok(exported)
}

/// Rows read back from export files, before any database change
#[derive(Default)]
struct Restored {
    imports: Vec<Import>,
    identifiers: Vec<Identifier>,
    urls: Vec<DerivedUrl>,
    request_logs: Vec<RequestLog>,
    engagement: Vec<EngagementRecord>,
}

fn read_tables(tables: &[Table], dir: &Path, prefix: &str) -> Result<Restored> {
    let mut restored = Restored::default();
    for table in tables {
        let path = table.path(dir, prefix);
        match table {
            Table::Imports => {
                restored.imports = read_csv::<ImportRow>(&path)?
                    .into_iter()
                    .map(Import::try_from)
                    .collect::<Result<_>>()?;
            }
            Table::Dois => restored.identifiers = read_csv(&path)?,
            Table::Urls => restored.urls = read_csv(&path)?,
            Table::Requests => restored.request_logs = read_csv(&path)?,
            Table::Fbrequests => {
                restored.engagement = read_csv::<EngagementRow>(&path)?
                    .into_iter()
                    .map(EngagementRecord::try_from)
                    .collect::<Result<_>>()?;
            }
        }
    }
    Ok(restored)
}

/// Restore tables from `{dir}/{prefix}{table}.csv`. Every file is read
/// before the database is touched. Returns the rows inserted per table.
#[instrument(skip(repository, tables, dir), fields(dir = %dir.display()))]
pub async fn import_tables(
    repository: &Repository,
    tables: &[Table],
    dir: &Path,
    prefix: &str,
    mode: ImportMode,
) -> Result<TableCounts> {
    let tables = ordered(tables);
    let restored = read_tables(&tables, dir, prefix)?;

    let txn = repository.begin().await?;
    if mode == ImportMode::Reset {
        schema::reset_tables(&txn).await?;
    }

    let counts = TableCounts {
        imports: repository.restore_imports(&txn, restored.imports).await?,
        identifiers: repository.restore_identifiers(&txn, restored.identifiers).await?,
        urls: repository.restore_urls(&txn, restored.urls).await?,
        request_logs: repository.restore_request_logs(&txn, restored.request_logs).await?,
        engagement: repository.restore_engagement(&txn, restored.engagement).await?,
    };
    txn.commit().await?;

    info!(mode = ?mode, counts = ?counts, "Tables restored");
    Ok(counts)
}
