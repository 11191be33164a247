//! Collector Common Library
//!
//! Shared code for the collector pipeline including:
//! - Database models, schema and repository
//! - External API clients (DOI resolver, NCBI, Unpaywall, Graph API)
//! - Error types and handling
//! - Configuration management
//! - DOI validation and enrichment stage flags
//! - Metrics and observability

pub mod clients;
pub mod config;
pub mod db;
pub mod doi;
pub mod errors;
pub mod metrics;
pub mod stage;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use clients::{Fetcher, GraphApi};
pub use stage::{Stage, StageSet};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
