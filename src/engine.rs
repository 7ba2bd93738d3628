//! Run loop
//!
//! ```text
//! INIT ─▶ FETCHING ─▶ MATCHING ─▶ RECONCILING ─┐
//!            ▲                                 │
//!            └─────────────────────────────────┘
//!            │ exhausted        │ interrupt       │ fatal
//!            ▼                  ▼                 ▼
//!        COMPLETE          INTERRUPTED          FAILED
//! ```
//!
//! One sequential worker per vendor run. The checkpoint is cleared on
//! COMPLETE and persisted on INTERRUPTED and FAILED. A [`RunSummary`] is
//! produced for every outcome.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;
use vendor_sync_types::{AuditAction, RunCounters, RunOutcome, RunSummary};

use crate::audit::AuditLog;
use crate::checkpoint::{
    CheckpointManager, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use crate::config::RunConfig;
use crate::error::{ConfigError, DropReason, RecordOutcome, SyncError};
use crate::matcher::{CatalogMatcher, MatcherStats};
use crate::normalize::{AliasTable, Normalizer};
use crate::source::{RawRecord, SourceAdapter};
use crate::store::{CatalogStore, VendorFactStore};
use crate::upsert::{DecisionReason, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Fetching,
    Matching,
    Reconciling,
    Complete,
    Interrupted,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Fetching => "FETCHING",
            Self::Matching => "MATCHING",
            Self::Reconciling => "RECONCILING",
            Self::Complete => "COMPLETE",
            Self::Interrupted => "INTERRUPTED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Final state of a run plus its summary
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub summary: RunSummary,
    pub fatal: Option<SyncError>,
}

impl RunReport {
    /// 0 unless the run ended on a fatal condition
    pub fn exit_code(&self) -> u8 {
        self.fatal.as_ref().map(SyncError::exit_code).unwrap_or(0)
    }
}

#[derive(Default)]
struct Progress {
    run_id: Option<Uuid>,
    resumed_from: Option<u32>,
    counters: RunCounters,
    matcher: MatcherStats,
    audit_rows: u64,
    checkpoint: Option<CheckpointManager>,
}

pub struct SyncEngine {
    config: RunConfig,
    source: Box<dyn SourceAdapter>,
    catalog: Arc<dyn CatalogStore>,
    facts: Arc<dyn VendorFactStore>,
    checkpoints: Option<Box<dyn CheckpointStore>>,
    state: RunState,
}

impl SyncEngine {
    pub fn new(
        config: RunConfig,
        source: Box<dyn SourceAdapter>,
        catalog: Arc<dyn CatalogStore>,
        facts: Arc<dyn VendorFactStore>,
    ) -> Self {
        // Dry runs never leave a cursor behind
        let checkpoints: Box<dyn CheckpointStore> =
            match (&config.checkpoint.path, config.dry_run) {
                (Some(path), false) => Box::new(FileCheckpointStore::new(path.clone())),
                _ => Box::new(MemoryCheckpointStore::new()),
            };

        Self {
            config,
            source,
            catalog,
            facts,
            checkpoints: Some(checkpoints),
            state: RunState::Init,
        }
    }

    /// Build the source adapter described by the config
    pub fn from_config(
        config: RunConfig,
        catalog: Arc<dyn CatalogStore>,
        facts: Arc<dyn VendorFactStore>,
    ) -> Result<Self, ConfigError> {
        let source = config.build_source()?;
        Ok(Self::new(config, source, catalog, facts))
    }

    pub fn with_checkpoint_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn enter(&mut self, state: RunState) {
        trace!(from = %self.state, to = %state, "Run state");
        self.state = state;
    }

    /// Drive the run to COMPLETE, INTERRUPTED or FAILED.
    ///
    /// Setting `shutdown` to `true` interrupts the run between records or
    /// while a page fetch is pending.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunReport {
        let started_at = Utc::now();
        let mut progress = Progress::default();

        info!(
            vendor_id = %self.config.vendor_id,
            source_id = %self.source.source_id(),
            dry_run = self.config.dry_run,
            "Starting vendor sync"
        );

        let result = self.execute(&mut progress, &mut shutdown, started_at).await;

        let (state, fatal) = match result {
            Ok(state) => (state, None),
            Err(e) => (RunState::Failed, Some(e)),
        };
        self.enter(state);

        let fatal = self.settle_checkpoint(&mut progress, state, fatal).await;
        let state = if fatal.is_some() { RunState::Failed } else { state };
        self.enter(state);

        let summary = self.summary(&progress, state, started_at);
        log_summary(&summary, fatal.as_ref());

        RunReport {
            state,
            summary,
            fatal,
        }
    }

    async fn execute(
        &mut self,
        progress: &mut Progress,
        shutdown: &mut watch::Receiver<bool>,
        started_at: DateTime<Utc>,
    ) -> Result<RunState, SyncError> {
        self.enter(RunState::Init);
        self.config.validate()?;

        let normalizer = Normalizer::new(AliasTable::new(&self.config.aliases));
        let catalog = self.catalog.load_catalog().await.map_err(SyncError::Catalog)?;
        let matcher = CatalogMatcher::build(&catalog, normalizer.aliases());
        progress.matcher = matcher.stats();
        drop(catalog);

        let store: Box<dyn CheckpointStore> = match self.checkpoints.take() {
            Some(store) => store,
            None => Box::new(MemoryCheckpointStore::new()),
        };
        let manager = CheckpointManager::open(
            store,
            self.source.source_id(),
            self.config.checkpoint.every_pages,
        )
        .await?;
        progress.run_id = Some(manager.cursor().run_id);
        progress.resumed_from = manager.resumed_from();
        progress.counters = manager.cursor().counters;
        self.source.seek(manager.cursor().next_page);
        progress.checkpoint = Some(manager);

        let mut audit =
            AuditLog::from_config(&self.config.audit, &self.config.vendor_id, started_at)?;
        let reconciler = Reconciler::new(self.facts.clone(), self.config.vendor_id.clone())
            .dry_run(self.config.dry_run)
            .track_last_seen(self.config.track_last_seen);

        let mut consecutive_failures = 0u32;
        let mut decided: HashSet<String> = HashSet::new();

        loop {
            if *shutdown.borrow() {
                return Ok(RunState::Interrupted);
            }

            self.enter(RunState::Fetching);
            let fetched = tokio::select! {
                biased;
                _ = interrupt_requested(shutdown) => return Ok(RunState::Interrupted),
                fetched = self.source.next_page() => fetched,
            };

            let page = match fetched {
                Ok(Some(page)) => page,
                Ok(None) => return Ok(RunState::Complete),
                Err(e) if e.is_auth() => return Err(SyncError::Auth(e.to_string())),
                Err(e) => {
                    consecutive_failures += 1;
                    progress.counters.pages_failed += 1;
                    warn!(
                        source_id = %self.source.source_id(),
                        page = self.source.position().saturating_sub(1),
                        consecutive_failures,
                        error = %e,
                        "Skipping failed page"
                    );
                    if consecutive_failures >= self.config.max_consecutive_page_failures {
                        return Err(SyncError::SourceUnreachable {
                            attempts: consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                    continue;
                }
            };

            consecutive_failures = 0;
            progress.counters.pages_fetched += 1;

            for record in page.records {
                if *shutdown.borrow() {
                    return Ok(RunState::Interrupted);
                }
                progress.counters.records_seen += 1;

                let outcome = self
                    .process_record(&normalizer, &matcher, &reconciler, &mut decided, record)
                    .await;
                tally(&mut progress.counters, &outcome);

                if let RecordOutcome::Decided(decision) = &outcome {
                    audit.append(&decision.audit_record(Utc::now()))?;
                    progress.audit_rows = audit.rows();
                }
            }

            if let Some(manager) = progress.checkpoint.as_mut() {
                manager.page_done(page.index + 1, progress.counters).await?;
            }
        }
    }

    async fn process_record(
        &mut self,
        normalizer: &Normalizer,
        matcher: &CatalogMatcher,
        reconciler: &Reconciler,
        decided: &mut HashSet<String>,
        record: RawRecord,
    ) -> RecordOutcome {
        self.enter(RunState::Matching);
        let Some(keys) = normalizer.keys_for(&record) else {
            return RecordOutcome::Dropped(DropReason::EmptyKey);
        };
        let Some((key, product_key)) = matcher.resolve(&keys) else {
            return RecordOutcome::Unmatched { key: keys.primary };
        };

        let vendor_sku = record.vendor_sku_or(key);
        // First row for a product wins for the rest of the run
        if decided.contains(product_key) {
            return RecordOutcome::DuplicateInFeed {
                vendor_sku,
                product_key: product_key.to_string(),
            };
        }
        let Some(values) = self.config.transform.apply(&record) else {
            return RecordOutcome::Dropped(DropReason::InvalidCost);
        };

        self.enter(RunState::Reconciling);
        match reconciler.reconcile(&vendor_sku, product_key, values).await {
            Ok(decision) => {
                decided.insert(product_key.to_string());
                RecordOutcome::Decided(decision)
            }
            Err(e) => RecordOutcome::Failed {
                vendor_sku,
                reason: e.to_string(),
            },
        }
    }

    /// Clear the cursor on completion, persist it otherwise. A checkpoint
    /// failure turns a clean outcome into a fatal one.
    async fn settle_checkpoint(
        &self,
        progress: &mut Progress,
        state: RunState,
        fatal: Option<SyncError>,
    ) -> Option<SyncError> {
        let Some(manager) = progress.checkpoint.as_mut() else {
            return fatal;
        };

        let result = match state {
            RunState::Complete => manager.finish().await,
            _ => {
                manager.record_counters(progress.counters);
                manager.persist().await
            }
        };

        match (result, fatal) {
            (Ok(()), fatal) => fatal,
            (Err(e), None) => Some(SyncError::Checkpoint(e)),
            (Err(e), Some(fatal)) => {
                error!(error = %e, "Failed to persist checkpoint after fatal error");
                Some(fatal)
            }
        }
    }

    fn summary(
        &self,
        progress: &Progress,
        state: RunState,
        started_at: DateTime<Utc>,
    ) -> RunSummary {
        let outcome = match state {
            RunState::Complete => RunOutcome::Complete,
            RunState::Interrupted => RunOutcome::Interrupted,
            _ => RunOutcome::Failed,
        };

        RunSummary {
            run_id: progress.run_id.unwrap_or_else(Uuid::new_v4),
            vendor_id: self.config.vendor_id.clone(),
            source_id: self.source.source_id().to_string(),
            outcome,
            resumed_from_page: progress.resumed_from,
            counters: progress.counters,
            catalog_entries: progress.matcher.entries,
            catalog_collisions: progress.matcher.collisions,
            audit_rows: progress.audit_rows,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone.
async fn interrupt_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn tally(counters: &mut RunCounters, outcome: &RecordOutcome) {
    match outcome {
        RecordOutcome::Dropped(reason) => {
            debug!(reason = ?reason, "Dropped record");
            counters.dropped += 1;
        }
        RecordOutcome::Unmatched { key } => {
            debug!(key = %key, "No catalog match");
            counters.unmatched += 1;
        }
        RecordOutcome::DuplicateInFeed {
            vendor_sku,
            product_key,
        } => {
            debug!(
                vendor_sku = %vendor_sku,
                product_key = %product_key,
                "Product already decided in this run"
            );
            counters.duplicates_in_feed += 1;
        }
        RecordOutcome::Decided(decision) => {
            counters.duplicates_removed += decision.duplicates_removed;
            match (decision.action, decision.reason) {
                (AuditAction::Create, _) => counters.created += 1,
                (AuditAction::Update, _) => counters.updated += 1,
                (AuditAction::Skip, DecisionReason::NoCost) => counters.skipped_no_cost += 1,
                (AuditAction::Skip, _) => counters.skipped_unchanged += 1,
            }
        }
        RecordOutcome::Failed { vendor_sku, reason } => {
            warn!(vendor_sku = %vendor_sku, reason = %reason, "Failed to persist vendor fact");
            counters.errors += 1;
        }
    }
}

fn log_summary(summary: &RunSummary, fatal: Option<&SyncError>) {
    let c = &summary.counters;
    info!(
        vendor_id = %summary.vendor_id,
        run_id = %summary.run_id,
        outcome = ?summary.outcome,
        pages = c.pages_fetched,
        pages_failed = c.pages_failed,
        records = c.records_seen,
        created = c.created,
        updated = c.updated,
        skipped = c.skipped(),
        unmatched = c.unmatched,
        dropped = c.dropped,
        errors = c.errors,
        duplicates_removed = c.duplicates_removed,
        duplicates_in_feed = c.duplicates_in_feed,
        "Vendor sync finished"
    );
    if let Some(e) = fatal {
        error!(vendor_id = %summary.vendor_id, error = %e, "Vendor sync aborted");
    }
}
