//! Canonical store collaborators
//!
//! The engine only needs two things from storage: a bulk read of catalog rows
//! and point writes of vendor facts keyed by `(vendor_id, vendor_sku)`. No
//! transaction ever spans more than one record.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;
use vendor_sync_types::{CatalogRow, FactPatch, NewVendorFact, VendorFact};

use crate::error::StoreError;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::{DatabaseConfig, PgStore};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every catalog row carrying externally relevant identifiers
    async fn load_catalog(&self) -> Result<Vec<CatalogRow>, StoreError>;
}

#[async_trait]
pub trait VendorFactStore: Send + Sync {
    /// Live rows for one `(vendor, product)` pair, oldest first
    async fn facts_for_product(
        &self,
        vendor_id: &str,
        product_key: &str,
    ) -> Result<Vec<VendorFact>, StoreError>;

    /// Point upsert on `(vendor_id, vendor_sku)`
    async fn create_fact(&self, fact: NewVendorFact) -> Result<VendorFact, StoreError>;

    /// Apply only the `Some` fields of the patch
    async fn update_fact(&self, id: Uuid, patch: &FactPatch) -> Result<(), StoreError>;

    async fn delete_facts(&self, ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Staleness marker; never part of value-change semantics
    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError>;

    /// Full reset of one vendor's facts before a structural resync
    async fn clear_vendor(&self, vendor_id: &str) -> Result<u64, StoreError>;
}
