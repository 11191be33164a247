//! Record sources for ingestion: CSV files and JSON (API-style) payloads

use chrono::{DateTime, Utc};
use collector_common::errors::ErrorCode;
use collector_common::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::warn;
use validator::{Validate, ValidationError};

/// url_type values accepted from the API
pub const API_URL_TYPES: [&str; 7] = [
    "ojs",
    "doi_new",
    "doi_old",
    "doi_new_landingpage",
    "unpaywall",
    "pubmed",
    "pubmedcentral",
];

/// One input row: identifier plus optional seed URL and publication date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub doi: Option<String>,
    pub url: Option<String>,
    pub url_type: Option<String>,
    pub date: Option<String>,
}

/// Where an import came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    File(PathBuf),
    Api(DateTime<Utc>),
}

impl ImportSource {
    /// Descriptor stored on the Import row
    pub fn descriptor(&self) -> String {
        match self {
            ImportSource::File(path) => format!("<INIT {}>", path.display()),
            ImportSource::Api(at) => format!("<API {}>", at.format("%Y-%m-%d-%H-%M-%S")),
        }
    }
}

/// A row refused before ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub row: usize,
    pub code: ErrorCode,
    pub reason: String,
}

impl RejectedRecord {
    pub fn new(row: usize, error: AppError) -> Self {
        Self {
            row,
            code: error.code(),
            reason: error.to_string(),
        }
    }
}

fn invalid_record(row: usize, message: impl ToString) -> RejectedRecord {
    RejectedRecord::new(
        row,
        AppError::InvalidRecord {
            row,
            message: message.to_string(),
        },
    )
}

/// Parsed rows plus the rows that could not be read
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<RawRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Record as posted to the API
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_seed_url"))]
pub struct ApiRecord {
    #[validate(length(min = 1, message = "DOI is missing"))]
    pub doi: String,
    pub url: Option<String>,
    pub url_type: Option<String>,
    pub date: Option<String>,
}

fn validate_seed_url(record: &ApiRecord) -> std::result::Result<(), ValidationError> {
    let has_url = record.url.as_deref().is_some_and(|u| !u.trim().is_empty());
    match record.url_type.as_deref() {
        Some(url_type) if !API_URL_TYPES.contains(&url_type) => {
            let mut err = ValidationError::new("url_type");
            err.message = Some(format!("URL type {} is not one of the allowed types", url_type).into());
            Err(err)
        }
        None if has_url => {
            let mut err = ValidationError::new("url_type");
            err.message = Some("URL type is missing".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

impl From<ApiRecord> for RawRecord {
    fn from(record: ApiRecord) -> Self {
        RawRecord {
            doi: Some(record.doi),
            url: record.url,
            url_type: record.url_type,
            date: record.date,
        }
    }
}

/// Read CSV rows with a `doi,url,url_type,date` header. Extra columns are
/// ignored; unreadable rows are rejected, not fatal.
pub fn parse_csv<R: Read>(reader: R) -> Result<LoadedRecords> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut loaded = LoadedRecords::default();
    for (row, result) in reader.deserialize::<RawRecord>().enumerate() {
        match result {
            Ok(record) => loaded.records.push(record),
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(e.into()),
            Err(e) => {
                warn!(row = row + 1, error = %e, "Unreadable CSV row");
                loaded.rejected.push(invalid_record(row + 1, e));
            }
        }
    }
    Ok(loaded)
}

/// Read a CSV file
pub fn read_csv(path: &Path) -> Result<LoadedRecords> {
    let file = std::fs::File::open(path)?;
    parse_csv(file)
}

/// Parse and validate an API payload: a JSON array of records
pub fn parse_api_records(payload: &str) -> Result<LoadedRecords> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        _ => {
            return Err(AppError::InvalidFormat {
                message: "No list of data in JSON".to_string(),
            })
        }
    };

    let mut loaded = LoadedRecords::default();
    for (row, item) in items.into_iter().enumerate() {
        let record: ApiRecord = match serde_json::from_value(item) {
            Ok(record) => record,
            Err(e) => {
                loaded.rejected.push(invalid_record(row + 1, e));
                continue;
            }
        };

        if let Err(e) = record.validate() {
            let rejected = if e.field_errors().contains_key("doi") {
                RejectedRecord::new(row + 1, AppError::MissingField { field: "doi".to_string() })
            } else {
                invalid_record(row + 1, e)
            };
            loaded.rejected.push(rejected);
            continue;
        }

        loaded.records.push(record.into());
    }

    if !loaded.rejected.is_empty() {
        warn!(rejected = loaded.rejected.len(), "API records rejected");
    }
    Ok(loaded)
}

/// Read a JSON payload from a file
pub fn read_json(path: &Path) -> Result<LoadedRecords> {
    let payload = std::fs::read_to_string(path)?;
    parse_api_records(&payload)
}

/// Load a file by extension: `.json` is an API payload, anything else CSV
pub fn load_records(path: &Path) -> Result<(ImportSource, LoadedRecords)> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        Ok((ImportSource::Api(Utc::now()), read_json(path)?))
    } else {
        Ok((ImportSource::File(path.to_path_buf()), read_csv(path)?))
    }
}
