//! Collector pipeline
//!
//! Ingestion of identifier records, the enrichment stage runners and their
//! batch scheduler, the engagement poller, and table export/restore.

pub mod dedup;
pub mod engagement;
pub mod ingest;
pub mod scheduler;
pub mod source;
pub mod stages;
pub mod tables;

pub use dedup::DedupIndex;
pub use engagement::{EngagementPoller, EngagementSummary};
pub use ingest::{IngestSummary, Ingestor};
pub use scheduler::{Pipeline, Scheduler, StageSummary};
pub use source::{load_records, ImportSource, RawRecord};
pub use stages::{BatchContext, BatchOutcome, FailureCounts, StageRunner};
pub use tables::{export_tables, import_tables, ImportMode, Table};
