//! In-process store backing tests and embedded runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;
use vendor_sync_types::{CatalogRow, FactPatch, NewVendorFact, VendorFact};

use super::{CatalogStore, VendorFactStore};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct StoredFact {
    seq: u64,
    fact: VendorFact,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Vec<CatalogRow>>,
    facts: RwLock<Vec<StoredFact>>,
    failing_skus: RwLock<HashSet<String>>,
    seq: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Vec<CatalogRow>) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            ..Default::default()
        }
    }

    /// Make every write for this sku fail
    pub async fn fail_writes_for(&self, vendor_sku: impl Into<String>) {
        self.failing_skus.write().await.insert(vendor_sku.into());
    }

    /// Insert a fact as if it already existed, with an explicit creation time
    pub async fn seed_fact(&self, fact: NewVendorFact, created_at: DateTime<Utc>) -> VendorFact {
        let stored = VendorFact {
            id: Uuid::new_v4(),
            vendor_id: fact.vendor_id,
            vendor_sku: fact.vendor_sku,
            product_key: fact.product_key,
            cost: fact.cost,
            inventory_qty: fact.inventory_qty,
            inventory_text: fact.inventory_text,
            created_at,
            updated_at: created_at,
            last_seen_at: None,
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.facts.write().await.push(StoredFact {
            seq,
            fact: stored.clone(),
        });
        stored
    }

    /// Snapshot of one vendor's facts ordered by product
    pub async fn facts_for_vendor(&self, vendor_id: &str) -> Vec<VendorFact> {
        let mut facts: Vec<VendorFact> = self
            .facts
            .read()
            .await
            .iter()
            .filter(|s| s.fact.vendor_id == vendor_id)
            .map(|s| s.fact.clone())
            .collect();
        facts.sort_by(|a, b| {
            a.product_key
                .cmp(&b.product_key)
                .then(a.vendor_sku.cmp(&b.vendor_sku))
        });
        facts
    }

    /// Number of successful create / update / delete calls
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn check_failure(&self, vendor_sku: &str) -> Result<(), StoreError> {
        if self.failing_skus.read().await.contains(vendor_sku) {
            return Err(StoreError::Backend(format!("injected failure for {vendor_sku}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn load_catalog(&self) -> Result<Vec<CatalogRow>, StoreError> {
        Ok(self.catalog.read().await.clone())
    }
}

#[async_trait]
impl VendorFactStore for MemoryStore {
    async fn facts_for_product(
        &self,
        vendor_id: &str,
        product_key: &str,
    ) -> Result<Vec<VendorFact>, StoreError> {
        let facts = self.facts.read().await;
        let mut matching: Vec<&StoredFact> = facts
            .iter()
            .filter(|s| s.fact.vendor_id == vendor_id && s.fact.product_key == product_key)
            .collect();
        matching.sort_by_key(|s| (s.fact.created_at, s.seq));
        Ok(matching.into_iter().map(|s| s.fact.clone()).collect())
    }

    async fn create_fact(&self, fact: NewVendorFact) -> Result<VendorFact, StoreError> {
        self.check_failure(&fact.vendor_sku).await?;
        let now = Utc::now();
        let mut facts = self.facts.write().await;

        // ON CONFLICT (vendor_id, vendor_sku) DO UPDATE
        if let Some(existing) = facts
            .iter_mut()
            .find(|s| s.fact.vendor_id == fact.vendor_id && s.fact.vendor_sku == fact.vendor_sku)
        {
            existing.fact.product_key = fact.product_key;
            existing.fact.cost = fact.cost;
            existing.fact.inventory_qty = fact.inventory_qty;
            existing.fact.inventory_text = fact.inventory_text;
            existing.fact.updated_at = now;
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(existing.fact.clone());
        }

        let stored = VendorFact {
            id: Uuid::new_v4(),
            vendor_id: fact.vendor_id,
            vendor_sku: fact.vendor_sku,
            product_key: fact.product_key,
            cost: fact.cost,
            inventory_qty: fact.inventory_qty,
            inventory_text: fact.inventory_text,
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        facts.push(StoredFact {
            seq,
            fact: stored.clone(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_fact(&self, id: Uuid, patch: &FactPatch) -> Result<(), StoreError> {
        let mut facts = self.facts.write().await;
        let stored = facts
            .iter_mut()
            .find(|s| s.fact.id == id)
            .ok_or(StoreError::NotFound(id))?;
        self.check_failure(&stored.fact.vendor_sku).await?;
        if let Some(sku) = &patch.vendor_sku {
            self.check_failure(sku).await?;
            stored.fact.vendor_sku = sku.clone();
        }

        if let Some(cost) = patch.cost {
            stored.fact.cost = cost;
        }
        if let Some(qty) = patch.inventory_qty {
            stored.fact.inventory_qty = Some(qty);
        }
        if let Some(text) = &patch.inventory_text {
            stored.fact.inventory_text = Some(text.clone());
        }
        stored.fact.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_facts(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut facts = self.facts.write().await;
        let before = facts.len();
        facts.retain(|s| !ids.contains(&s.fact.id));
        let removed = (before - facts.len()) as u64;
        self.writes.fetch_add(removed, Ordering::SeqCst);
        Ok(removed)
    }

    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError> {
        let mut facts = self.facts.write().await;
        let stored = facts
            .iter_mut()
            .find(|s| s.fact.id == id)
            .ok_or(StoreError::NotFound(id))?;
        stored.fact.last_seen_at = Some(Utc::now());
        Ok(())
    }

    async fn clear_vendor(&self, vendor_id: &str) -> Result<u64, StoreError> {
        let mut facts = self.facts.write().await;
        let before = facts.len();
        facts.retain(|s| s.fact.vendor_id != vendor_id);
        Ok((before - facts.len()) as u64)
    }
}
