//! Error taxonomy for the reconciliation engine
//!
//! Per-record problems are never errors here: they travel as
//! [`RecordOutcome`] values and are aggregated by the run loop. The error
//! types below are for component failures, and [`SyncError`] is reserved for
//! the conditions that end a run.

use thiserror::Error;

/// Failures raised by a source adapter
#[derive(Error, Debug)]
pub enum SourceError {
    /// Timeouts, connection resets, 429/5xx after retries were exhausted
    #[error("Transient failure fetching {url}: {message}")]
    Transient { url: String, message: String },

    #[error("Vendor returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Authentication rejected by vendor: {0}")]
    Auth(String),

    #[error("Failed to decode vendor response: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Invalid source configuration: {0}")]
    Config(String),
}

impl SourceError {
    /// Whether this failure means no later request can succeed
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Failures raised by the canonical store
#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Vendor fact {0} not found")]
    NotFound(uuid::Uuid),

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

/// Conditions that end a run. The run summary is still produced.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Source unreachable after {attempts} consecutive failed pages: {last_error}")]
    SourceUnreachable { attempts: u32, last_error: String },

    #[error("Failed to load catalog: {0}")]
    Catalog(#[source] StoreError),

    #[error("Checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Audit log failure: {0}")]
    Audit(#[from] AuditError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Process exit code for this fatal condition
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Auth(_) => 2,
            Self::SourceUnreachable { .. } => 3,
            _ => 1,
        }
    }
}

/// Why a record never reached the matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Brand or part was empty after normalization
    EmptyKey,
    /// Cost could not be priced without overflowing
    InvalidCost,
}

/// Result of pushing one source record through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Dropped(DropReason),
    Unmatched { key: String },
    /// A product already decided earlier in the same run
    DuplicateInFeed { vendor_sku: String, product_key: String },
    Decided(crate::upsert::Decision),
    Failed { vendor_sku: String, reason: String },
}
