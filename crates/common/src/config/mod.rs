//! Configuration management for the collector
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Most identifiers the NCBI ID converter accepts in one call
pub const NCBI_MAX_IDS: usize = 200;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Batch sizes and failure handling for the enrichment stages
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// External scholarly APIs (DOI resolver, NCBI, Unpaywall)
    #[serde(default)]
    pub apis: ApiConfig,

    /// Facebook Graph API credentials and limits
    #[serde(default)]
    pub facebook: FacebookConfig,

    /// Outbound rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (postgres:// or sqlite://)
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Log every SQL statement
    #[serde(default)]
    pub sqlx_logging: bool,
}

/// What happens to an identifier's completion flag when its external call fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Flag the stage as done after any attempt; failures are never retried
    #[default]
    MarkComplete,
    /// Leave the flag unset on failure so the next run tries again
    Retry,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Identifiers (or rows) per committed transaction
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Identifiers per NCBI ID-converter request (API maximum is 200)
    #[serde(default = "default_ncbi_batch_size")]
    pub ncbi_batch_size: usize,

    /// URLs per Graph API lookup
    #[serde(default = "default_engagement_batch_size")]
    pub engagement_batch_size: usize,

    /// Retry-vs-skip behaviour for failed external calls
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Contact email sent to NCBI and Unpaywall
    #[serde(default)]
    pub app_email: String,

    /// Tool name registered with NCBI
    #[serde(default = "default_ncbi_tool")]
    pub ncbi_tool: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User agent for outbound requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Base for new-style DOI URLs, also used for landing page resolution
    #[serde(default = "default_doi_resolver_base")]
    pub doi_resolver_base: String,

    /// Base for old-style DOI URLs
    #[serde(default = "default_doi_legacy_base")]
    pub doi_legacy_base: String,

    /// NCBI ID-converter endpoint
    #[serde(default = "default_ncbi_idconv_base")]
    pub ncbi_idconv_base: String,

    /// Unpaywall v2 endpoint
    #[serde(default = "default_unpaywall_base")]
    pub unpaywall_base: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FacebookConfig {
    /// App ID for the client-credentials token exchange
    pub app_id: Option<String>,

    /// App secret for the client-credentials token exchange
    pub app_secret: Option<String>,

    /// Graph API version
    #[serde(default = "default_graph_version")]
    pub api_version: String,

    /// Graph API base URL
    #[serde(default = "default_graph_base")]
    pub graph_base: String,

    /// Maximum Graph API calls per hour
    #[serde(default = "default_hourly_rate_limit")]
    pub hourly_rate_limit: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Outbound requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable outbound rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_batch_size() -> usize { 1000 }
fn default_ncbi_batch_size() -> usize { 200 }
fn default_engagement_batch_size() -> usize { 50 }
fn default_ncbi_tool() -> String { "collector".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("collector/{}", env!("CARGO_PKG_VERSION")) }
fn default_doi_resolver_base() -> String { "https://doi.org".to_string() }
fn default_doi_legacy_base() -> String { "http://dx.doi.org".to_string() }
fn default_ncbi_idconv_base() -> String { "https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/".to_string() }
fn default_unpaywall_base() -> String { "https://api.unpaywall.org/v2".to_string() }
fn default_graph_version() -> String { "3.1".to_string() }
fn default_graph_base() -> String { "https://graph.facebook.com".to_string() }
fn default_hourly_rate_limit() -> u32 { 200 }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 10 }
fn default_enabled() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "collector".to_string() }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            ncbi_batch_size: default_ncbi_batch_size(),
            engagement_batch_size: default_engagement_batch_size(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            app_email: String::new(),
            ncbi_tool: default_ncbi_tool(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
            doi_resolver_base: default_doi_resolver_base(),
            doi_legacy_base: default_doi_legacy_base(),
            ncbi_idconv_base: default_ncbi_idconv_base(),
            unpaywall_base: default_unpaywall_base(),
        }
    }
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            api_version: default_graph_version(),
            graph_base: default_graph_base(),
            hourly_rate_limit: default_hourly_rate_limit(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "sqlite://collector.db?mode=rwc")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__BATCH_SIZE=500
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize::<Self>()?.validated()
    }

    /// Reject settings the pipeline cannot honor
    pub fn validated(self) -> Result<Self, ConfigError> {
        let ncbi = self.pipeline.ncbi_batch_size;
        if ncbi == 0 || ncbi > NCBI_MAX_IDS {
            return Err(ConfigError::Message(format!(
                "pipeline.ncbi_batch_size must be between 1 and {}, got {}",
                NCBI_MAX_IDS, ncbi
            )));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Message("pipeline.batch_size must be greater than zero".to_string()));
        }
        Ok(self)
    }

    /// Get outbound request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.apis.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/collector".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                sqlx_logging: false,
            },
            pipeline: PipelineConfig::default(),
            apis: ApiConfig::default(),
            facebook: FacebookConfig::default(),
            rate_limit: RateLimitConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
