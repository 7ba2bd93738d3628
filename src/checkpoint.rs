//! Resumable progress
//!
//! The cursor is written every `every_pages` fully processed pages, on
//! interrupt, and on fatal exit. It is deleted only after a clean completion.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use vendor_sync_types::{IngestionCursor, RunCounters};

use crate::error::CheckpointError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Cursor file; no checkpointing when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_every_pages")]
    pub every_pages: u32,
}

fn default_every_pages() -> u32 {
    10
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: None,
            every_pages: default_every_pages(),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<IngestionCursor>, CheckpointError>;
    async fn save(&self, cursor: &IngestionCursor) -> Result<(), CheckpointError>;
    async fn clear(&self) -> Result<(), CheckpointError>;
}

/// JSON cursor file, replaced atomically via a sibling temp file
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<IngestionCursor>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, cursor: &IngestionCursor) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(cursor)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local cursor storage
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    cursor: Mutex<Option<IngestionCursor>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<IngestionCursor>, CheckpointError> {
        Ok(self.cursor.lock().await.clone())
    }

    async fn save(&self, cursor: &IngestionCursor) -> Result<(), CheckpointError> {
        *self.cursor.lock().await = Some(cursor.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        *self.cursor.lock().await = None;
        Ok(())
    }
}

/// Drives checkpoint cadence for one run
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    every_pages: u32,
    cursor: IngestionCursor,
    pages_since_save: u32,
    resumed_from: Option<u32>,
}

impl CheckpointManager {
    /// Load a prior cursor for `source_id`, or start fresh
    pub async fn open(
        store: Box<dyn CheckpointStore>,
        source_id: &str,
        every_pages: u32,
    ) -> Result<Self, CheckpointError> {
        let (cursor, resumed_from) = match store.load().await? {
            Some(cursor) if cursor.source_id == source_id => {
                tracing::info!(
                    source_id,
                    run_id = %cursor.run_id,
                    next_page = cursor.next_page,
                    "Resuming from checkpoint"
                );
                let page = cursor.next_page;
                (cursor, Some(page))
            }
            Some(other) => {
                tracing::warn!(
                    expected = source_id,
                    found = %other.source_id,
                    "Ignoring checkpoint for a different source"
                );
                (IngestionCursor::start(source_id), None)
            }
            None => (IngestionCursor::start(source_id), None),
        };

        Ok(Self {
            store,
            every_pages: every_pages.max(1),
            cursor,
            pages_since_save: 0,
            resumed_from,
        })
    }

    pub fn cursor(&self) -> &IngestionCursor {
        &self.cursor
    }

    pub fn resumed_from(&self) -> Option<u32> {
        self.resumed_from
    }

    /// Record a fully processed page; persists when the cadence is reached
    pub async fn page_done(
        &mut self,
        next_page: u32,
        counters: RunCounters,
    ) -> Result<bool, CheckpointError> {
        self.cursor.advance_to(next_page, counters);
        self.pages_since_save += 1;
        if self.pages_since_save < self.every_pages {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Carry counters for a partly processed page without moving the cursor
    pub fn record_counters(&mut self, counters: RunCounters) {
        let next_page = self.cursor.next_page;
        self.cursor.advance_to(next_page, counters);
    }

    /// Write the current cursor now
    pub async fn persist(&mut self) -> Result<(), CheckpointError> {
        self.store.save(&self.cursor).await?;
        self.pages_since_save = 0;
        tracing::info!(
            source_id = %self.cursor.source_id,
            next_page = self.cursor.next_page,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Clean completion
    pub async fn finish(&mut self) -> Result<(), CheckpointError> {
        self.store.clear().await?;
        tracing::debug!(source_id = %self.cursor.source_id, "Checkpoint cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state/acme.json"));
        assert!(store.load().await.unwrap().is_none());

        let mut cursor = IngestionCursor::start("acme-api");
        cursor.advance_to(4, RunCounters::default());
        store.save(&cursor).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cursor));
        assert!(!store.temp_path().exists());

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileCheckpointStore::new(path);
        assert!(matches!(
            store.load().await,
            Err(CheckpointError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_saves_on_cadence() {
        let mut manager = CheckpointManager::open(Box::new(MemoryCheckpointStore::new()), "src", 2)
            .await
            .unwrap();
        assert!(!manager.page_done(1, RunCounters::default()).await.unwrap());
        assert!(manager.page_done(2, RunCounters::default()).await.unwrap());
        assert!(!manager.page_done(3, RunCounters::default()).await.unwrap());
        assert_eq!(manager.cursor().next_page, 3);
    }

    #[tokio::test]
    async fn test_counters_saved_mid_page_keep_position() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("cursor.json"));
        let mut manager = CheckpointManager::open(Box::new(store.clone()), "src", 10)
            .await
            .unwrap();
        manager.page_done(2, RunCounters::default()).await.unwrap();

        let partial = RunCounters {
            records_seen: 7,
            created: 5,
            ..Default::default()
        };
        manager.record_counters(partial);
        manager.persist().await.unwrap();

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.next_page, 2);
        assert_eq!(saved.counters, partial);
    }

    #[tokio::test]
    async fn test_resume_and_source_mismatch() {
        let store = MemoryCheckpointStore::new();
        let mut cursor = IngestionCursor::start("src-a");
        cursor.advance_to(7, RunCounters::default());
        store.save(&cursor).await.unwrap();

        let resumed = CheckpointManager::open(Box::new(store), "src-a", 5).await.unwrap();
        assert_eq!(resumed.resumed_from(), Some(7));
        assert_eq!(resumed.cursor().run_id, cursor.run_id);

        let other = MemoryCheckpointStore::new();
        other.save(&cursor).await.unwrap();
        let fresh = CheckpointManager::open(Box::new(other), "src-b", 5).await.unwrap();
        assert_eq!(fresh.resumed_from(), None);
        assert_eq!(fresh.cursor().next_page, 0);
    }
}
