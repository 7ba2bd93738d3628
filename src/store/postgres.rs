//! PostgreSQL store
//!
//! Catalog rows come from a configurable read query; vendor facts live in
//! `vendor_facts` with a unique `(vendor_id, vendor_sku)` constraint:
//!
//! ```sql
//! CREATE TABLE vendor_facts (
//!     id             UUID PRIMARY KEY,
//!     vendor_id      TEXT NOT NULL,
//!     vendor_sku     TEXT NOT NULL,
//!     product_key    TEXT NOT NULL,
//!     cost           NUMERIC(14, 4) NOT NULL,
//!     inventory_qty  BIGINT,
//!     inventory_text TEXT,
//!     created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     last_seen_at   TIMESTAMPTZ,
//!     UNIQUE (vendor_id, vendor_sku)
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use vendor_sync_types::{CatalogRow, FactPatch, NewVendorFact, VendorFact};

use super::{CatalogStore, VendorFactStore};
use crate::error::StoreError;

pub const DEFAULT_CATALOG_QUERY: &str =
    "SELECT product_key, brand, part_number, vendor_codes FROM catalog_products";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    /// Must return `product_key, brand, part_number, vendor_codes`
    pub catalog_query: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/vendor_sync".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            catalog_query: DEFAULT_CATALOG_QUERY.to_string(),
        }
    }
}

// ============================================================================
// Private FromRow types
// ============================================================================

#[derive(sqlx::FromRow)]
struct CatalogRowRecord {
    product_key: String,
    brand: Option<String>,
    part_number: Option<String>,
    vendor_codes: Option<Vec<String>>,
}

impl From<CatalogRowRecord> for CatalogRow {
    fn from(r: CatalogRowRecord) -> Self {
        Self {
            product_key: r.product_key,
            brand: r.brand,
            part_number: r.part_number,
            vendor_codes: r.vendor_codes.unwrap_or_default(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct VendorFactRow {
    id: Uuid,
    vendor_id: String,
    vendor_sku: String,
    product_key: String,
    cost: Decimal,
    inventory_qty: Option<i64>,
    inventory_text: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
}

impl From<VendorFactRow> for VendorFact {
    fn from(r: VendorFactRow) -> Self {
        Self {
            id: r.id,
            vendor_id: r.vendor_id,
            vendor_sku: r.vendor_sku,
            product_key: r.product_key,
            cost: r.cost,
            inventory_qty: r.inventory_qty,
            inventory_text: r.inventory_text,
            created_at: r.created_at,
            updated_at: r.updated_at,
            last_seen_at: r.last_seen_at,
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    catalog_query: String,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let mut pool_options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout);
        if let Some(idle_timeout) = config.idle_timeout {
            pool_options = pool_options.idle_timeout(idle_timeout);
        }

        let pool = pool_options
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        Ok(Self {
            pool,
            catalog_query: config.catalog_query.clone(),
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            catalog_query: DEFAULT_CATALOG_QUERY.to_string(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn load_catalog(&self) -> Result<Vec<CatalogRow>, StoreError> {
        let rows = sqlx::query_as::<_, CatalogRowRecord>(&self.catalog_query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl VendorFactStore for PgStore {
    async fn facts_for_product(
        &self,
        vendor_id: &str,
        product_key: &str,
    ) -> Result<Vec<VendorFact>, StoreError> {
        let rows = sqlx::query_as::<_, VendorFactRow>(
            r#"SELECT id, vendor_id, vendor_sku, product_key, cost, inventory_qty,
                      inventory_text, created_at, updated_at, last_seen_at
               FROM vendor_facts
               WHERE vendor_id = $1 AND product_key = $2
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(vendor_id)
        .bind(product_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_fact(&self, fact: NewVendorFact) -> Result<VendorFact, StoreError> {
        let row = sqlx::query_as::<_, VendorFactRow>(
            r#"INSERT INTO vendor_facts
                   (id, vendor_id, vendor_sku, product_key, cost, inventory_qty, inventory_text)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (vendor_id, vendor_sku) DO UPDATE SET
                   product_key = EXCLUDED.product_key,
                   cost = EXCLUDED.cost,
                   inventory_qty = EXCLUDED.inventory_qty,
                   inventory_text = EXCLUDED.inventory_text,
                   updated_at = now()
               RETURNING id, vendor_id, vendor_sku, product_key, cost, inventory_qty,
                         inventory_text, created_at, updated_at, last_seen_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(&fact.vendor_id)
        .bind(&fact.vendor_sku)
        .bind(&fact.product_key)
        .bind(fact.cost)
        .bind(fact.inventory_qty)
        .bind(&fact.inventory_text)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_fact(&self, id: Uuid, patch: &FactPatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE vendor_facts SET
                   vendor_sku = COALESCE($2, vendor_sku),
                   cost = COALESCE($3, cost),
                   inventory_qty = COALESCE($4, inventory_qty),
                   inventory_text = COALESCE($5, inventory_text),
                   updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(&patch.vendor_sku)
        .bind(patch.cost)
        .bind(patch.inventory_qty)
        .bind(&patch.inventory_text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_facts(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM vendor_facts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn touch_last_seen(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE vendor_facts SET last_seen_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_vendor(&self, vendor_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM vendor_facts WHERE vendor_id = $1")
            .bind(vendor_id)
            .execute(&self.pool)
            .await?;
        info!(vendor_id, removed = result.rows_affected(), "Cleared vendor facts");
        Ok(result.rows_affected())
    }
}

/// Hide the password component of a connection string for logging
pub fn mask_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
