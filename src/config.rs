//! Per-vendor run configuration
//!
//! One `RunConfig` is loaded from YAML at startup and passed by reference to
//! every component. Secrets are referenced by environment variable name.
//!
//! ```yaml
//! vendor_id: acme
//! source:
//!   type: paginated_api
//!   base_url: https://api.acme.example
//!   auth:
//!     type: oauth2
//!     token_url: https://auth.acme.example/token
//!     client_id: sync
//!     client_secret_env: ACME_CLIENT_SECRET
//!   fields:
//!     sku: id
//!     brand: manufacturer.name
//!     part: mpn
//!     cost: price
//!     inventory: stock
//! transform:
//!   multiplier: "1.5"
//! rate_limit:
//!   min_delay_ms: 1000
//!   max_requests_per_hour: 3000
//! checkpoint:
//!   path: state/acme.json
//!   every_pages: 5
//! audit:
//!   dir: audit
//! aliases:
//!   - { alias: "Acme Corporation", canonical: Acme, code_prefix: ACM }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vendor_sync_types::IdentifierAlias;

use crate::audit::AuditConfig;
use crate::checkpoint::CheckpointConfig;
use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;
use crate::source::api::{ApiFieldMap, ApiSourceConfig};
use crate::source::flat_file::{FileFieldMap, FlatFileConfig};
use crate::source::retry::RetryPolicy;
use crate::source::{FlatFileSource, PaginatedApiSource, SourceAdapter};
use crate::transform::PriceTransform;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    PaginatedApi(ApiSourceConfig),
    FlatFile(FlatFileConfig),
}

impl SourceConfig {
    fn kind(&self) -> &'static str {
        match self {
            SourceConfig::PaginatedApi(_) => "api",
            SourceConfig::FlatFile(_) => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub vendor_id: String,
    /// Checkpoint key; defaults to `<vendor_id>-<api|file>`
    #[serde(default)]
    pub source_id: Option<String>,
    pub source: SourceConfig,
    #[serde(default)]
    pub transform: PriceTransform,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub aliases: Vec<IdentifierAlias>,
    /// Stamp `last_seen_at` on unchanged matches
    #[serde(default)]
    pub track_last_seen: bool,
    #[serde(default)]
    pub dry_run: bool,
    /// Consecutive failed pages after which the source counts as unreachable
    #[serde(default = "default_max_consecutive_page_failures")]
    pub max_consecutive_page_failures: u32,
    /// Override for the catalog read query of the Postgres store
    #[serde(default)]
    pub catalog_query: Option<String>,
}

fn default_max_consecutive_page_failures() -> u32 {
    3
}

fn api_has_identifier(fields: &ApiFieldMap) -> bool {
    (fields.brand.is_some() && fields.part.is_some())
        || (fields.vendor_code.is_some() && fields.part_number.is_some())
}

fn file_has_identifier(fields: &FileFieldMap) -> bool {
    (!fields.brand.is_empty() && !fields.part.is_empty())
        || (!fields.vendor_code.is_empty() && !fields.part_number.is_empty())
}

impl RunConfig {
    /// Minimal configuration with defaults everywhere else
    pub fn new(vendor_id: impl Into<String>, source: SourceConfig) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            source_id: None,
            source,
            transform: PriceTransform::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            checkpoint: CheckpointConfig::default(),
            audit: AuditConfig::default(),
            aliases: Vec::new(),
            track_last_seen: false,
            dry_run: false,
            max_consecutive_page_failures: default_max_consecutive_page_failures(),
            catalog_query: None,
        }
    }

    /// Load and validate a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.vendor_id.trim().is_empty() {
            return invalid("vendor_id must not be empty");
        }
        if self.transform.multiplier <= Decimal::ZERO {
            return invalid("transform.multiplier must be positive");
        }
        if self.checkpoint.every_pages == 0 {
            return invalid("checkpoint.every_pages must be at least 1");
        }
        if self.rate_limit.max_requests_per_hour == Some(0) {
            return invalid("rate_limit.max_requests_per_hour must be at least 1 when set");
        }
        if self.max_consecutive_page_failures == 0 {
            return invalid("max_consecutive_page_failures must be at least 1");
        }

        match &self.source {
            SourceConfig::PaginatedApi(api) => {
                if !api_has_identifier(&api.fields) {
                    return invalid("source.fields needs brand+part or vendor_code+part_number");
                }
            }
            SourceConfig::FlatFile(file) => {
                if !file_has_identifier(&file.fields) {
                    return invalid("source.fields needs brand+part or vendor_code+part_number");
                }
                if file.page_size == 0 {
                    return invalid("source.page_size must be at least 1");
                }
            }
        }
        Ok(())
    }

    pub fn source_id(&self) -> String {
        self.source_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.vendor_id, self.source.kind()))
    }

    /// Construct the adapter for this vendor, resolving secrets from the
    /// environment
    pub fn build_source(&self) -> Result<Box<dyn SourceAdapter>, ConfigError> {
        let source_id = self.source_id();
        match &self.source {
            SourceConfig::PaginatedApi(api) => {
                let credentials = api.auth.resolve()?;
                let source = PaginatedApiSource::new(
                    source_id,
                    api.clone(),
                    credentials,
                    &self.rate_limit,
                    self.retry.clone(),
                )
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Ok(Box::new(source))
            }
            SourceConfig::FlatFile(file) => {
                Ok(Box::new(FlatFileSource::new(source_id, file.clone())))
            }
        }
    }
}
