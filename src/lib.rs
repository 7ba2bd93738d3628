//! vendor-sync - vendor catalog reconciliation and rate-limited ingestion
//!
//! Pulls price and inventory facts from vendor feeds (paginated REST APIs,
//! CSV/XLSX exports), matches them against the internal product catalog and
//! writes them as vendor facts, idempotently and resumably.
//!
//! ## Pipeline
//! ```text
//! RateLimiter ─▶ SourceAdapter ─▶ Normalizer ─▶ CatalogMatcher ─▶ Reconciler ─▶ store
//!                     ▲                                              │
//!              CheckpointManager                                  AuditLog
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vendor_sync::{config::RunConfig, engine::SyncEngine, store::MemoryStore};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = RunConfig::from_file(std::path::Path::new("vendors/acme.yaml"))?;
//! let store = Arc::new(MemoryStore::new());
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! let report = SyncEngine::from_config(config, store.clone(), store)?
//!     .run(shutdown)
//!     .await;
//! println!("{:?}", report.summary.counters);
//! # Ok(())
//! # }
//! ```

// Error taxonomy and per-record outcomes
pub mod error;

// Run configuration
pub mod config;
pub mod logging;

// Identifier handling
pub mod matcher;
pub mod normalize;

// Vendor feeds and request budget
pub mod rate_limit;
pub mod source;

// Value transforms and writes
pub mod store;
pub mod transform;
pub mod upsert;

// Progress and audit
pub mod audit;
pub mod checkpoint;

// Run loop
pub mod engine;

pub use vendor_sync_types as types;

pub use config::RunConfig;
pub use engine::{RunReport, RunState, SyncEngine};
pub use error::{RecordOutcome, SyncError};
