//! In-process catalog and cursor stores
//!
//! Writes are staged per transaction and applied atomically on commit, with the
//! same constraints the Postgres schema enforces: unique natural keys, one
//! extension per card, extensions only for existing cards. Individual natural
//! keys can be marked as failing to exercise rollback paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CatalogStore, CatalogTransaction, ImportCursorStore};
use crate::catalog::{CatalogRecord, ExistingCard, GameExtension, NaturalKey};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct CatalogState {
    records: HashMap<Uuid, CatalogRecord>,
    by_key: HashMap<NaturalKey, Uuid>,
    extensions: HashMap<Uuid, GameExtension>,
}

impl CatalogState {
    fn existing(&self, id: Uuid) -> Option<ExistingCard> {
        self.records.get(&id).map(|record| ExistingCard {
            record: record.clone(),
            extension: self.extensions.get(&id).cloned(),
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<CatalogState>,
    failing: Mutex<HashSet<NaturalKey>>,
    lookups: AtomicUsize,
    commits: AtomicUsize,
}

/// Cloning shares the underlying catalog
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    shared: Arc<Shared>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write touching `key` fail until cleared
    pub async fn fail_on(&self, key: NaturalKey) {
        self.shared.failing.lock().await.insert(key);
    }

    pub async fn clear_failures(&self) {
        self.shared.failing.lock().await.clear();
    }

    /// Drop a card's extension row, leaving the base record in place
    pub async fn remove_extension(&self, card_id: Uuid) -> bool {
        self.shared.state.lock().await.extensions.remove(&card_id).is_some()
    }

    pub async fn record_count(&self) -> usize {
        self.shared.state.lock().await.records.len()
    }

    pub async fn extension_count(&self) -> usize {
        self.shared.state.lock().await.extensions.len()
    }

    /// Number of lookup round trips served so far
    pub fn lookup_count(&self) -> usize {
        self.shared.lookups.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_by_natural_key(&self, key: &NaturalKey) -> Result<Option<ExistingCard>> {
        self.shared.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock().await;
        Ok(state.by_key.get(key).and_then(|id| state.existing(*id)))
    }

    async fn find_many_by_natural_keys(
        &self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, ExistingCard>> {
        self.shared.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.shared.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = state.by_key.get(key)?;
                Some((key.clone(), state.existing(*id)?))
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    CreateRecord(CatalogRecord),
    UpdateRecord(CatalogRecord),
    CreateExtension(Uuid, GameExtension),
    UpdateExtension(Uuid, GameExtension),
}

/// Ids and keys introduced by earlier writes of the same transaction
#[derive(Debug, Default)]
struct Overlay {
    records: HashMap<Uuid, NaturalKey>,
    keys: HashSet<NaturalKey>,
    extensions: HashSet<Uuid>,
}

impl Overlay {
    fn key_of(&self, state: &CatalogState, card_id: Uuid) -> Option<NaturalKey> {
        self.records
            .get(&card_id)
            .cloned()
            .or_else(|| state.records.get(&card_id).map(CatalogRecord::natural_key))
    }

    /// Check one write against committed state plus this overlay, then absorb it
    fn admit(&mut self, state: &CatalogState, write: &StagedWrite) -> Result<()> {
        match write {
            StagedWrite::CreateRecord(record) => {
                let key = record.natural_key();
                if state.by_key.contains_key(&key) || self.keys.contains(&key) {
                    return Err(SyncError::Storage(format!("duplicate natural key {key}")));
                }
                if state.records.contains_key(&record.id) || self.records.contains_key(&record.id) {
                    return Err(SyncError::Storage(format!("duplicate card id {}", record.id)));
                }
                self.keys.insert(key.clone());
                self.records.insert(record.id, key);
            },
            StagedWrite::UpdateRecord(record) => {
                let Some(current) = state.records.get(&record.id) else {
                    return Err(SyncError::Storage(format!("no card {}", record.id)));
                };
                if current.natural_key() != record.natural_key() {
                    return Err(SyncError::Storage(format!(
                        "natural key of card {} cannot change",
                        record.id
                    )));
                }
            },
            StagedWrite::CreateExtension(card_id, extension) => {
                let Some(key) = self.key_of(state, *card_id) else {
                    return Err(SyncError::Storage(format!("extension for unknown card {card_id}")));
                };
                if key.game != extension.game() {
                    return Err(SyncError::Storage(format!(
                        "{} extension for {key}",
                        extension.game()
                    )));
                }
                if state.extensions.contains_key(card_id) || !self.extensions.insert(*card_id) {
                    return Err(SyncError::Storage(format!("card {card_id} already has an extension")));
                }
            },
            StagedWrite::UpdateExtension(card_id, _) => {
                if !state.extensions.contains_key(card_id) {
                    return Err(SyncError::Storage(format!("no extension for card {card_id}")));
                }
            },
        }
        Ok(())
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    staged: Vec<StagedWrite>,
}

impl MemoryTransaction {
    async fn stage(&mut self, write: StagedWrite) -> Result<()> {
        let state = self.shared.state.lock().await;

        let mut overlay = Overlay::default();
        for earlier in &self.staged {
            overlay.admit(&state, earlier)?;
        }

        let key = match &write {
            StagedWrite::CreateRecord(r) | StagedWrite::UpdateRecord(r) => Some(r.natural_key()),
            StagedWrite::CreateExtension(id, _) | StagedWrite::UpdateExtension(id, _) => {
                overlay.key_of(&state, *id)
            },
        };
        if let Some(key) = key {
            if self.shared.failing.lock().await.contains(&key) {
                return Err(SyncError::Storage(format!("injected failure for {key}")));
            }
        }

        overlay.admit(&state, &write)?;
        drop(state);

        self.staged.push(write);
        Ok(())
    }
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn create_record(&mut self, record: &CatalogRecord) -> Result<()> {
        self.stage(StagedWrite::CreateRecord(record.clone())).await
    }

    async fn update_record(&mut self, record: &CatalogRecord) -> Result<()> {
        self.stage(StagedWrite::UpdateRecord(record.clone())).await
    }

    async fn create_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()> {
        self.stage(StagedWrite::CreateExtension(card_id, extension.clone()))
            .await
    }

    async fn update_extension(&mut self, card_id: Uuid, extension: &GameExtension) -> Result<()> {
        self.stage(StagedWrite::UpdateExtension(card_id, extension.clone()))
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.shared.state.lock().await;

        // Another transaction may have committed a conflicting key since staging
        let mut overlay = Overlay::default();
        for write in &self.staged {
            overlay.admit(&state, write)?;
        }

        for write in self.staged {
            match write {
                StagedWrite::CreateRecord(record) => {
                    state.by_key.insert(record.natural_key(), record.id);
                    state.records.insert(record.id, record);
                },
                StagedWrite::UpdateRecord(record) => {
                    if let Some(current) = state.records.get_mut(&record.id) {
                        let created_at = current.created_at;
                        *current = CatalogRecord { created_at, ..record };
                    }
                },
                StagedWrite::CreateExtension(card_id, extension)
                | StagedWrite::UpdateExtension(card_id, extension) => {
                    state.extensions.insert(card_id, extension);
                },
            }
        }

        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// In-process [`ImportCursorStore`]; cloning shares the cursors
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    cursors: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportCursorStore for MemoryCursorStore {
    async fn get(&self, source_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.cursors.lock().await.get(source_id).copied())
    }

    async fn set(&self, source_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        let entry = cursors.entry(source_id.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }
}
