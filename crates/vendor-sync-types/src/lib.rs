//! Shared data model for vendor-sync
//!
//! Every component of the reconciliation engine (source adapters, matcher,
//! reconciler, checkpointing, audit) and any out-of-core consumer of vendor
//! facts agree on the types in this crate.
//!
//! ## Rules
//!
//! 1. Money is `rust_decimal::Decimal`, never `f64`
//! 2. Enums serialize as `SCREAMING_SNAKE_CASE` strings (audit files, cursors)
//! 3. Absent incoming values are `None`, never a zero sentinel

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// VENDOR FACTS
// ============================================================================

/// One vendor's current claim about one product.
///
/// Unique per `(vendor_id, vendor_sku)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorFact {
    pub id: Uuid,
    pub vendor_id: String,
    pub vendor_sku: String,
    pub product_key: String,
    pub cost: Decimal,
    pub inventory_qty: Option<i64>,
    pub inventory_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl VendorFact {
    /// Current values in the comparable shape used by the reconciler
    pub fn values(&self) -> FactValues {
        FactValues {
            cost: Some(self.cost),
            inventory_qty: self.inventory_qty,
            inventory_text: self.inventory_text.clone(),
        }
    }
}

/// Insert payload for a new vendor fact. Creation requires a cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVendorFact {
    pub vendor_id: String,
    pub vendor_sku: String,
    pub product_key: String,
    pub cost: Decimal,
    pub inventory_qty: Option<i64>,
    pub inventory_text: Option<String>,
}

/// Target values computed from one source record after transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactValues {
    pub cost: Option<Decimal>,
    pub inventory_qty: Option<i64>,
    pub inventory_text: Option<String>,
}

/// Partial update; `None` fields are left untouched in storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactPatch {
    pub vendor_sku: Option<String>,
    pub cost: Option<Decimal>,
    pub inventory_qty: Option<i64>,
    pub inventory_text: Option<String>,
}

impl FactPatch {
    pub fn is_empty(&self) -> bool {
        self.vendor_sku.is_none()
            && self.cost.is_none()
            && self.inventory_qty.is_none()
            && self.inventory_text.is_none()
    }
}

// ============================================================================
// CATALOG & ALIASES
// ============================================================================

/// A catalog row carrying the externally relevant identifiers of one product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub product_key: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub part_number: Option<String>,
    /// Vendor-specific code formats the product is also reachable by
    #[serde(default)]
    pub vendor_codes: Vec<String>,
}

/// Vendor brand-name variant mapped to a canonical brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierAlias {
    pub alias: String,
    pub canonical: String,
    /// Prefix used by the vendor's own code format for this brand
    #[serde(default)]
    pub code_prefix: Option<String>,
}

impl IdentifierAlias {
    pub fn new(alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            canonical: canonical.into(),
            code_prefix: None,
        }
    }

    pub fn with_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.code_prefix = Some(prefix.into());
        self
    }
}

// ============================================================================
// RUN PROGRESS
// ============================================================================

/// Running counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub records_seen: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped_unchanged: u64,
    pub skipped_no_cost: u64,
    pub unmatched: u64,
    pub dropped: u64,
    pub errors: u64,
    pub duplicates_removed: u64,
    /// Later rows for a product already decided in this run
    #[serde(default)]
    pub duplicates_in_feed: u64,
}

impl RunCounters {
    /// Total SKIP decisions (unchanged + no cost)
    pub fn skipped(&self) -> u64 {
        self.skipped_unchanged + self.skipped_no_cost
    }

    /// Number of CREATE + UPDATE decisions
    pub fn writes(&self) -> u64 {
        self.created + self.updated
    }
}

/// Resumable progress marker for one run.
///
/// `next_page` is the first page not yet fully processed. It only advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionCursor {
    pub source_id: String,
    pub run_id: Uuid,
    pub next_page: u32,
    pub counters: RunCounters,
    pub updated_at: DateTime<Utc>,
}

impl IngestionCursor {
    pub fn start(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            run_id: Uuid::new_v4(),
            next_page: 0,
            counters: RunCounters::default(),
            updated_at: Utc::now(),
        }
    }

    /// Move the cursor forward; never moves it back.
    pub fn advance_to(&mut self, next_page: u32, counters: RunCounters) {
        if next_page > self.next_page {
            self.next_page = next_page;
        }
        self.counters = counters;
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// AUDIT
// ============================================================================

/// Reconciliation decision kind recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Skip,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// One append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub vendor_sku: String,
    pub product_key: String,
    pub old_cost: Option<Decimal>,
    pub new_cost: Option<Decimal>,
    pub old_inventory: Option<i64>,
    pub new_inventory: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Complete,
    Interrupted,
    Failed,
}

/// Final summary, emitted for every run including failed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub vendor_id: String,
    pub source_id: String,
    pub outcome: RunOutcome,
    pub resumed_from_page: Option<u32>,
    pub counters: RunCounters,
    pub catalog_entries: usize,
    pub catalog_collisions: usize,
    pub audit_rows: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
