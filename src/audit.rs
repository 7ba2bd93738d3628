//! Append-only audit of reconciliation decisions
//!
//! One CSV file per run, flushed after every row so a crash loses at most the
//! row being written.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vendor_sync_types::AuditRecord;

use crate::error::AuditError;

pub const AUDIT_COLUMNS: [&str; 8] = [
    "action",
    "vendor_sku",
    "product_key",
    "old_cost",
    "new_cost",
    "old_inventory",
    "new_inventory",
    "timestamp",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Directory for audit files; audit rows are only counted when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// `audit_<vendor>_<YYYYmmddTHHMMSSZ>.csv`
pub fn audit_file_name(vendor_id: &str, started_at: DateTime<Utc>) -> String {
    let vendor: String = vendor_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("audit_{}_{}.csv", vendor, started_at.format("%Y%m%dT%H%M%SZ"))
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub struct AuditLog {
    writer: Option<csv::Writer<File>>,
    path: Option<PathBuf>,
    rows: u64,
}

impl AuditLog {
    /// Create the run's audit file and write the header row
    pub fn create(
        dir: &Path,
        vendor_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(audit_file_name(vendor_id, started_at));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(AUDIT_COLUMNS)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "Audit log opened");

        Ok(Self {
            writer: Some(writer),
            path: Some(path),
            rows: 0,
        })
    }

    pub fn disabled() -> Self {
        Self {
            writer: None,
            path: None,
            rows: 0,
        }
    }

    pub fn from_config(
        config: &AuditConfig,
        vendor_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Self, AuditError> {
        match &config.dir {
            Some(dir) => Self::create(dir, vendor_id, started_at),
            None => Ok(Self::disabled()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn append(&mut self, record: &AuditRecord) -> Result<(), AuditError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record([
                record.action.to_string(),
                record.vendor_sku.clone(),
                record.product_key.clone(),
                opt(record.old_cost),
                opt(record.new_cost),
                opt(record.old_inventory),
                opt(record.new_inventory),
                record.timestamp.to_rfc3339(),
            ])?;
            writer.flush()?;
        }
        self.rows += 1;
        Ok(())
    }
}
