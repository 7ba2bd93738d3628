//! Reconciliation upserter
//!
//! Diffs one matched record against the stored vendor fact for its
//! `(vendor, product)` pair and applies CREATE, UPDATE or SKIP:
//!
//! | stored row | incoming           | action                          |
//! |------------|--------------------|---------------------------------|
//! | none       | cost present       | CREATE                          |
//! | none       | cost absent        | SKIP ("no cost, not created")   |
//! | several    | any                | collapse to newest, then go on  |
//! | one        | some field differs | UPDATE differing fields only    |
//! | one        | nothing differs    | SKIP ("already correct")        |
//!
//! Absent incoming fields never overwrite stored values.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vendor_sync_types::{AuditAction, AuditRecord, FactPatch, FactValues, NewVendorFact, VendorFact};

use crate::error::StoreError;
use crate::store::VendorFactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Created,
    NoCost,
    Updated,
    AlreadyCorrect,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::NoCost => write!(f, "no cost, not created"),
            Self::Updated => write!(f, "updated"),
            Self::AlreadyCorrect => write!(f, "already correct"),
        }
    }
}

/// Outcome of reconciling one matched record
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: AuditAction,
    pub reason: DecisionReason,
    pub vendor_sku: String,
    pub product_key: String,
    /// Stored values before the decision, if a row existed
    pub before: Option<FactValues>,
    /// Values stored after the decision
    pub after: FactValues,
    /// Older duplicate rows removed before deciding
    pub duplicates_removed: u64,
}

impl Decision {
    pub fn audit_record(&self, timestamp: DateTime<Utc>) -> AuditRecord {
        let before = self.before.clone().unwrap_or_default();
        AuditRecord {
            action: self.action,
            vendor_sku: self.vendor_sku.clone(),
            product_key: self.product_key.clone(),
            old_cost: before.cost,
            new_cost: self.after.cost,
            old_inventory: before.inventory_qty,
            new_inventory: self.after.inventory_qty,
            timestamp,
        }
    }
}

/// Fields of `incoming` that are present and differ from `current`
pub fn diff(current: &VendorFact, vendor_sku: &str, incoming: &FactValues) -> FactPatch {
    FactPatch {
        vendor_sku: (current.vendor_sku != vendor_sku).then(|| vendor_sku.to_string()),
        cost: incoming.cost.filter(|c| *c != current.cost),
        inventory_qty: incoming
            .inventory_qty
            .filter(|q| Some(*q) != current.inventory_qty),
        inventory_text: incoming
            .inventory_text
            .clone()
            .filter(|t| Some(t) != current.inventory_text.as_ref()),
    }
}

fn merged(current: &FactValues, patch: &FactPatch) -> FactValues {
    FactValues {
        cost: patch.cost.or(current.cost),
        inventory_qty: patch.inventory_qty.or(current.inventory_qty),
        inventory_text: patch
            .inventory_text
            .clone()
            .or_else(|| current.inventory_text.clone()),
    }
}

pub struct Reconciler {
    store: Arc<dyn VendorFactStore>,
    vendor_id: String,
    dry_run: bool,
    track_last_seen: bool,
}

impl Reconciler {
    pub fn new(store: Arc<dyn VendorFactStore>, vendor_id: impl Into<String>) -> Self {
        Self {
            store,
            vendor_id: vendor_id.into(),
            dry_run: false,
            track_last_seen: false,
        }
    }

    /// Compute decisions without writing anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Stamp `last_seen_at` on unchanged matches
    pub fn track_last_seen(mut self, track: bool) -> Self {
        self.track_last_seen = track;
        self
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub async fn reconcile(
        &self,
        vendor_sku: &str,
        product_key: &str,
        incoming: FactValues,
    ) -> Result<Decision, StoreError> {
        let mut existing = self
            .store
            .facts_for_product(&self.vendor_id, product_key)
            .await?;

        let duplicates_removed = self.collapse_duplicates(&mut existing, product_key).await?;

        let Some(current) = existing.pop() else {
            return self
                .create(vendor_sku, product_key, incoming, duplicates_removed)
                .await;
        };

        let before = current.values();
        let patch = diff(&current, vendor_sku, &incoming);

        if patch.is_empty() {
            if self.track_last_seen && !self.dry_run {
                self.store.touch_last_seen(current.id).await?;
            }
            return Ok(Decision {
                action: AuditAction::Skip,
                reason: DecisionReason::AlreadyCorrect,
                vendor_sku: vendor_sku.to_string(),
                product_key: product_key.to_string(),
                after: before.clone(),
                before: Some(before),
                duplicates_removed,
            });
        }

        if !self.dry_run {
            self.store.update_fact(current.id, &patch).await?;
        }
        tracing::debug!(
            vendor_sku,
            product_key,
            cost_changed = patch.cost.is_some(),
            inventory_changed = patch.inventory_qty.is_some() || patch.inventory_text.is_some(),
            "Updating vendor fact"
        );

        Ok(Decision {
            action: AuditAction::Update,
            reason: DecisionReason::Updated,
            vendor_sku: vendor_sku.to_string(),
            product_key: product_key.to_string(),
            after: merged(&before, &patch),
            before: Some(before),
            duplicates_removed,
        })
    }

    /// Delete every row but the most recently created one. `existing` is
    /// oldest first and is left holding only the survivor.
    async fn collapse_duplicates(
        &self,
        existing: &mut Vec<VendorFact>,
        product_key: &str,
    ) -> Result<u64, StoreError> {
        if existing.len() < 2 {
            return Ok(0);
        }
        let survivor = existing.len() - 1;
        let stale: Vec<Uuid> = existing.drain(..survivor).map(|f| f.id).collect();

        tracing::info!(
            vendor_id = %self.vendor_id,
            product_key,
            removed = stale.len(),
            "Collapsing duplicate vendor facts"
        );

        if self.dry_run {
            return Ok(stale.len() as u64);
        }
        self.store.delete_facts(&stale).await
    }

    async fn create(
        &self,
        vendor_sku: &str,
        product_key: &str,
        incoming: FactValues,
        duplicates_removed: u64,
    ) -> Result<Decision, StoreError> {
        let Some(cost) = incoming.cost else {
            tracing::info!(vendor_sku, product_key, "No cost, not created");
            return Ok(Decision {
                action: AuditAction::Skip,
                reason: DecisionReason::NoCost,
                vendor_sku: vendor_sku.to_string(),
                product_key: product_key.to_string(),
                before: None,
                after: incoming,
                duplicates_removed,
            });
        };

        if !self.dry_run {
            self.store
                .create_fact(NewVendorFact {
                    vendor_id: self.vendor_id.clone(),
                    vendor_sku: vendor_sku.to_string(),
                    product_key: product_key.to_string(),
                    cost,
                    inventory_qty: incoming.inventory_qty,
                    inventory_text: incoming.inventory_text.clone(),
                })
                .await?;
        }

        Ok(Decision {
            action: AuditAction::Create,
            reason: DecisionReason::Created,
            vendor_sku: vendor_sku.to_string(),
            product_key: product_key.to_string(),
            before: None,
            after: incoming,
            duplicates_removed,
        })
    }
}
